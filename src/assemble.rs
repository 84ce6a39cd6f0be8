//! Per-volume book assembly: cover, chapters in order, credits, then one `.epub` per volume.
//!
//! A chapter or image that cannot be fetched is logged and left out. Only directory creation
//! and archive writing abort the run.

use crate::epub::{xml_escape, EpubBuilder, EpubError, DEFAULT_STYLESHEET};
use crate::model::{Series, Volume};
use crate::normalize::normalize;
use crate::scraper::{ChapterExtractor, Fetcher, ImageCache};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOOK_LANGUAGE: &str = "vi";
const CREDITS_TITLE: &str = "Credits";
const CREDITS_FILE: &str = "credits.xhtml";

/// Fatal assembly errors.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Series {id} has no volumes; nothing to write.")]
    EmptySeries { id: String },

    #[error("Volume range {from}-{to} selects nothing: series has {count} volume(s).")]
    EmptySelection { from: usize, to: usize, count: usize },

    #[error("Cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: EpubError,
    },

    #[error(transparent)]
    Epub(#[from] EpubError),
}

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub output_root: PathBuf,
    pub cache_root: PathBuf,
    /// The link the run was started with; used as book identifier and in the credits.
    pub link: String,
    pub render_notes: bool,
    pub stylesheet: String,
    /// 1-based inclusive volume range. `None` means all.
    pub volumes: Option<(usize, usize)>,
    /// Show a progress bar per volume.
    pub progress: bool,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            cache_root: PathBuf::from("tmp"),
            link: String::new(),
            render_notes: true,
            stylesheet: DEFAULT_STYLESHEET.to_string(),
            volumes: None,
            progress: false,
        }
    }
}

/// Write one book per selected volume, in order. Returns the written paths.
pub fn archive_series(
    series: &Series,
    fetcher: &mut Fetcher,
    opts: &AssembleOptions,
) -> Result<Vec<PathBuf>, AssembleError> {
    let selected = selected_volumes(series, opts.volumes)?;
    let images = ImageCache::new(&opts.cache_root, series);
    create_dir(images.dir())?;

    let mut written = Vec::with_capacity(selected.len());
    for index in selected {
        written.push(assemble_volume(series, index, fetcher, &images, opts)?);
    }
    Ok(written)
}

/// 0-based indexes of the volumes to build.
pub fn selected_volumes(
    series: &Series,
    range: Option<(usize, usize)>,
) -> Result<Vec<usize>, AssembleError> {
    let count = series.volumes.len();
    if count == 0 {
        return Err(AssembleError::EmptySeries {
            id: series.id.clone(),
        });
    }
    let (from, to) = range.unwrap_or((1, count));
    let selected: Vec<usize> = (from.max(1)..=to.min(count)).map(|n| n - 1).collect();
    if selected.is_empty() {
        return Err(AssembleError::EmptySelection { from, to, count });
    }
    Ok(selected)
}

/// Build and write the book for `series.volumes[index]`.
///
/// The cover is the volume's own image; when that cannot be cached the series cover is used.
pub fn assemble_volume(
    series: &Series,
    index: usize,
    fetcher: &mut Fetcher,
    images: &ImageCache,
    opts: &AssembleOptions,
) -> Result<PathBuf, AssembleError> {
    let Some(volume) = series.volumes.get(index) else {
        return Err(AssembleError::EmptySelection {
            from: index + 1,
            to: index + 1,
            count: series.volumes.len(),
        });
    };
    info!(
        "Volume {}/{}: {} ({} chapters)",
        index + 1,
        series.volumes.len(),
        volume.title,
        volume.chapters.len()
    );

    let mut book = EpubBuilder::new(format!("{} - {}", series.title, volume.title));
    book.set_author(&series.author);
    book.set_language(BOOK_LANGUAGE);
    book.set_identifier(&opts.link);
    book.set_description(series.description.join("\n"));
    book.add_css(opts.stylesheet.as_str());

    let cover = images
        .resolve(fetcher, &mut book, &volume.cover, false)
        .or_else(|| images.resolve(fetcher, &mut book, &series.cover, false));
    match cover {
        Some(href) => book.set_cover(&href)?,
        None => warn!("Volume {}: no cover image", volume.title),
    }

    let bar = progress_bar(opts.progress, volume);
    let extractor = ChapterExtractor::new(images, opts.render_notes);
    for (j, chapter) in volume.chapters.iter().enumerate() {
        bar.set_message(chapter.title.clone());
        match extractor.extract(fetcher, &mut book, &chapter.url) {
            Some(body) => {
                book.add_section(body, chapter.title.as_str(), format!("chapter-{}.xhtml", j + 1))?
            }
            None => warn!("Chapter {} ({}) skipped", chapter.title, chapter.url),
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    book.add_section(footer_section(series, &opts.link), CREDITS_TITLE, CREDITS_FILE)?;

    let path = volume_output_path(&opts.output_root, series, index, volume);
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    book.write(&path).map_err(|e| AssembleError::Write {
        path: path.clone(),
        source: e,
    })?;
    info!(
        "Wrote {} ({} of {} chapters)",
        path.display(),
        book.sections().len() - 1,
        volume.chapters.len()
    );
    Ok(path)
}

/// Credits page: series title, people, and the link the book was made from.
pub fn footer_section(series: &Series, link: &str) -> String {
    let link = xml_escape(link);
    format!(
        r#"<h2 class="chapter-header">{title}</h2><hr class="header"/><div class="reading-content"><p>Tác giả: {author} - Minh hoạ: {artist}</p><p>Dịch giả: {translator} - Nhóm dịch: {group}</p><p>Link gốc: <a href="{link}">{link}</a></p></div>"#,
        title = xml_escape(&series.title),
        author = xml_escape(&series.author),
        artist = xml_escape(&series.artist),
        translator = xml_escape(&series.translator),
        group = xml_escape(&series.group),
        link = link,
    )
}

/// `<output_root>/<id>/<id> <normalized volume title> - <index + 1>.epub`
pub fn volume_output_path(
    output_root: &Path,
    series: &Series,
    index: usize,
    volume: &Volume,
) -> PathBuf {
    output_root.join(&series.id).join(format!(
        "{} {} - {}.epub",
        series.id,
        normalize(&volume.title),
        index + 1
    ))
}

fn create_dir(path: &Path) -> Result<(), AssembleError> {
    std::fs::create_dir_all(path).map_err(|e| AssembleError::CreateDir {
        path: path.to_path_buf(),
        source: e,
    })
}

fn progress_bar(enabled: bool, volume: &Volume) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(volume.chapters.len() as u64);
    let style = ProgressStyle::with_template("{prefix} [{bar:40}] {pos}/{len} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏ ");
    bar.set_style(style);
    bar.set_prefix(volume.title.clone());
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Chapter;
    use crate::scraper::testing::*;
    use std::io::Read;
    use zip::read::ZipArchive;

    const COVER: &str = "https://i.docln.net/covers/v1.jpg";
    const CH1: &str = "https://docln.net/truyen/77-demo/c1-mo-dau";
    const CH2: &str = "https://docln.net/truyen/77-demo/c2-chuong-1";

    const CHAPTER_PAGE: &str = r#"<html><body>
<div class="title-top"><h4>Mở đầu</h4><h6>Tập 1 - <time datetime="2024-01-02T03:04:05+07:00">x</time></h6></div>
<div id="chapter-content"><p id="p1">Xin chào.</p><p>quảng cáo</p></div>
</body></html>"#;

    fn series() -> Series {
        Series {
            id: "77-demo".to_string(),
            title: "Truyện Demo".to_string(),
            cover: "https://docln.net/img/nocover.jpg".to_string(),
            description: vec!["Mô tả.".to_string()],
            author: "A & B".to_string(),
            artist: "C".to_string(),
            translator: "D".to_string(),
            group: "E".to_string(),
            volumes: vec![Volume {
                title: "Tập 1: Khởi đầu".to_string(),
                cover: COVER.to_string(),
                chapters: vec![
                    Chapter {
                        title: "Mở đầu".to_string(),
                        url: CH1.to_string(),
                    },
                    Chapter {
                        title: "Chương 1".to_string(),
                        url: CH2.to_string(),
                    },
                ],
            }],
            base_url: "https://docln.net".to_string(),
            ..Default::default()
        }
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let file = std::fs::File::open(path).unwrap();
        let zip = ZipArchive::new(file).unwrap();
        zip.file_names().map(String::from).collect()
    }

    #[test]
    fn failed_chapter_is_skipped_and_credits_appended() {
        let out = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new()
            .route(COVER, vec![Reply::ok("jpeg")])
            .route(CH1, vec![Reply::ok(CHAPTER_PAGE)])
            .route(CH2, vec![Reply::Fail]);
        let (mut fetcher, _) = fetcher(&transport, 2);
        let opts = AssembleOptions {
            output_root: out.path().to_path_buf(),
            cache_root: cache.path().to_path_buf(),
            link: "https://docln.net/truyen/77-demo".to_string(),
            ..Default::default()
        };

        let written = archive_series(&series(), &mut fetcher, &opts).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0],
            out.path().join("77-demo").join("77-demo Tap 1 Khoi dau - 1.epub")
        );
        assert_eq!(transport.calls_to(CH2), 3);

        let names = entry_names(&written[0]);
        let sections: Vec<&String> = names
            .iter()
            .filter(|n| n.ends_with(".xhtml") && *n != "OEBPS/nav.xhtml" && *n != "OEBPS/cover.xhtml")
            .collect();
        assert_eq!(sections, vec!["OEBPS/chapter-1.xhtml", "OEBPS/credits.xhtml"]);
        assert!(names.iter().any(|n| n.ends_with(".jpg")));

        let file = std::fs::File::open(&written[0]).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let mut chapter = String::new();
        zip.by_name("OEBPS/chapter-1.xhtml")
            .unwrap()
            .read_to_string(&mut chapter)
            .unwrap();
        assert!(chapter.contains("<p>Xin chào.</p>"));
        assert!(!chapter.contains("quảng cáo"));
    }

    #[test]
    fn empty_series_writes_nothing() {
        let out = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new();
        let (mut fetcher, _) = fetcher(&transport, 2);
        let mut s = series();
        s.volumes.clear();
        let opts = AssembleOptions {
            output_root: out.path().to_path_buf(),
            cache_root: out.path().join("tmp"),
            ..Default::default()
        };

        let result = archive_series(&s, &mut fetcher, &opts);
        assert!(matches!(result, Err(AssembleError::EmptySeries { .. })));
        assert_eq!(transport.total_calls(), 0);
        assert!(!out.path().join("77-demo").exists());
    }

    #[test]
    fn cover_falls_back_to_series_cover() {
        let out = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new()
            .route(COVER, vec![Reply::Status(404, Vec::new())])
            .route("https://docln.net/img/nocover.jpg", vec![Reply::ok("fallback")])
            .route(CH1, vec![Reply::ok(CHAPTER_PAGE)])
            .route(CH2, vec![Reply::ok(CHAPTER_PAGE)]);
        let (mut fetcher, _) = fetcher(&transport, 2);
        let opts = AssembleOptions {
            output_root: out.path().join("output"),
            cache_root: out.path().join("tmp"),
            ..Default::default()
        };

        let written = archive_series(&series(), &mut fetcher, &opts).unwrap();
        let names = entry_names(&written[0]);
        assert!(names.contains(&"OEBPS/cover.xhtml".to_string()));
        assert!(names.contains(&"OEBPS/chapter-2.xhtml".to_string()));
        assert_eq!(transport.referer_of("https://docln.net/img/nocover.jpg"), None);
    }

    #[test]
    fn volume_selection() {
        let mut s = series();
        s.volumes.push(Volume::default());
        s.volumes.push(Volume::default());
        assert_eq!(selected_volumes(&s, None).unwrap(), vec![0, 1, 2]);
        assert_eq!(selected_volumes(&s, Some((2, 3))).unwrap(), vec![1, 2]);
        assert_eq!(selected_volumes(&s, Some((2, 9))).unwrap(), vec![1, 2]);
        assert!(matches!(
            selected_volumes(&s, Some((5, 6))),
            Err(AssembleError::EmptySelection { count: 3, .. })
        ));
    }

    #[test]
    fn output_path_uses_normalized_title_and_one_based_index() {
        let s = series();
        let path = volume_output_path(Path::new("output"), &s, 4, &s.volumes[0]);
        assert_eq!(
            path,
            PathBuf::from("output/77-demo/77-demo Tap 1 Khoi dau - 5.epub")
        );
    }

    #[test]
    fn footer_lists_credits_and_link() {
        let footer = footer_section(&series(), "https://docln.net/truyen/77-demo?a=1&b=2");
        assert!(footer.contains("<h2 class=\"chapter-header\">Truyện Demo</h2>"));
        assert!(footer.contains("Tác giả: A &amp; B - Minh hoạ: C"));
        assert!(footer.contains("Dịch giả: D - Nhóm dịch: E"));
        assert!(footer.contains(
            r#"<a href="https://docln.net/truyen/77-demo?a=1&amp;b=2">https://docln.net/truyen/77-demo?a=1&amp;b=2</a>"#
        ));
    }
}
