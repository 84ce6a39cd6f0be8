//! EPUB writer. Collects metadata, one stylesheet, images and ordered HTML sections,
//! then packages EPUB 3 (mimetype, container, OPF, nav, NCX, cover page, sections, assets).

use std::collections::HashMap;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const STYLESHEET_HREF: &str = "styles/epub.css";

/// Stylesheet compiled into the binary; used unless the config names another file.
pub const DEFAULT_STYLESHEET: &str = include_str!("epub.css");

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: book has no sections.")]
    NoSections,

    #[error("Section file name {filename} is already used in this book.")]
    DuplicateSection { filename: String },

    #[error("Cover {href} is not an image registered with this book.")]
    UnknownImage { href: String },

    #[error("Cannot add image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// One reading-order section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    /// File name inside the book, e.g. `chapter-1.xhtml`.
    pub filename: String,
    /// HTML fragment placed inside `<body>`.
    pub body: String,
}

#[derive(Debug, Clone)]
struct ImageItem {
    id: String,
    href: String,
    path: PathBuf,
    media_type: &'static str,
}

/// In-memory book. Images stay on disk until [EpubBuilder::write].
#[derive(Debug, Default)]
pub struct EpubBuilder {
    title: String,
    author: String,
    language: String,
    identifier: String,
    description: String,
    stylesheet: Option<String>,
    images: Vec<ImageItem>,
    image_by_path: HashMap<PathBuf, usize>,
    cover: Option<usize>,
    sections: Vec<Section>,
}

impl EpubBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            language: "en".to_string(),
            ..Default::default()
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_author(&mut self, author: impl Into<String>) {
        self.author = author.into();
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = identifier.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Register the stylesheet linked from every page. Returns its href.
    pub fn add_css(&mut self, content: impl Into<String>) -> &'static str {
        self.stylesheet = Some(content.into());
        STYLESHEET_HREF
    }

    /// Register an image file and return the href sections should use.
    ///
    /// The same path always yields the same href; the file is read when the book is written.
    pub fn add_image(&mut self, path: &Path) -> Result<String, EpubError> {
        if let Some(&i) = self.image_by_path.get(path) {
            return Ok(self.images[i].href.clone());
        }
        let meta = std::fs::metadata(path).map_err(|e| EpubError::Image {
            path: path.to_path_buf(),
            source: e,
        })?;
        if !meta.is_file() {
            return Err(EpubError::Image {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file"),
            });
        }

        let index = self.images.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("image-{}", index + 1));
        let mut href = format!("images/{}", name);
        if self.images.iter().any(|img| img.href == href) {
            href = format!("images/{}-{}", index + 1, name);
        }
        self.images.push(ImageItem {
            id: format!("img-{}", index + 1),
            href: href.clone(),
            path: path.to_path_buf(),
            media_type: image_media_type(path),
        });
        self.image_by_path.insert(path.to_path_buf(), index);
        Ok(href)
    }

    /// Use an already registered image (by href) as the cover.
    pub fn set_cover(&mut self, href: &str) -> Result<(), EpubError> {
        let index = self
            .images
            .iter()
            .position(|img| img.href == href)
            .ok_or_else(|| EpubError::UnknownImage {
                href: href.to_string(),
            })?;
        self.cover = Some(index);
        Ok(())
    }

    /// Append a section in reading order.
    pub fn add_section(
        &mut self,
        body: impl Into<String>,
        title: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<(), EpubError> {
        let filename = filename.into();
        if self.sections.iter().any(|s| s.filename == filename) {
            return Err(EpubError::DuplicateSection { filename });
        }
        self.sections.push(Section {
            title: title.into(),
            filename,
            body: body.into(),
        });
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Package the book at `path`, replacing any existing file.
    pub fn write(&self, path: &Path) -> Result<(), EpubError> {
        if self.title.trim().is_empty() {
            return Err(EpubError::EmptyTitle);
        }
        if self.sections.is_empty() {
            return Err(EpubError::NoSections);
        }

        let file = std::fs::File::create(path).map_err(|e| EpubError::CreateFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut zip = ZipWriter::new(file);

        let options_stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        let options_deflate = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        // Mimetype first, uncompressed
        zip.start_file("mimetype", options_stored)?;
        zip.write_all(MIMETYPE)?;

        zip.start_file("META-INF/container.xml", options_deflate)?;
        zip.write_all(CONTAINER_XML)?;

        self.write_opf(&mut zip, options_deflate)?;
        self.write_nav_xhtml(&mut zip, options_deflate)?;
        self.write_ncx(&mut zip, options_deflate)?;
        self.write_cover_xhtml(&mut zip, options_deflate)?;
        self.write_sections(&mut zip, options_deflate)?;

        if let Some(css) = &self.stylesheet {
            zip.start_file(format!("{}{}", OEBPS_PREFIX, STYLESHEET_HREF), options_deflate)?;
            zip.write_all(css.as_bytes())?;
        }

        for img in &self.images {
            let data = std::fs::read(&img.path).map_err(|e| EpubError::Image {
                path: img.path.clone(),
                source: e,
            })?;
            zip.start_file(format!("{}{}", OEBPS_PREFIX, img.href), options_stored)?;
            zip.write_all(&data)?;
        }

        zip.finish()?;
        Ok(())
    }

    fn identifier(&self) -> String {
        if self.identifier.is_empty() {
            "urn:hakoscrape:book".to_string()
        } else {
            self.identifier.clone()
        }
    }

    fn stylesheet_link(&self) -> String {
        match self.stylesheet {
            Some(_) => format!(
                r#"  <link rel="stylesheet" type="text/css" href="{}"/>
"#,
                STYLESHEET_HREF
            ),
            None => String::new(),
        }
    }

    fn write_opf(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let mut manifest = String::from(
            r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
"#,
        );
        if self.stylesheet.is_some() {
            manifest.push_str(&format!(
                r#"    <item id="css" href="{}" media-type="text/css"/>
"#,
                STYLESHEET_HREF
            ));
        }
        for (i, img) in self.images.iter().enumerate() {
            let properties = if self.cover == Some(i) {
                r#" properties="cover-image""#
            } else {
                ""
            };
            manifest.push_str(&format!(
                r#"    <item id="{}" href="{}" media-type="{}"{}/>
"#,
                img.id,
                xml_escape(&img.href),
                img.media_type,
                properties
            ));
        }
        if self.cover.is_some() {
            manifest.push_str(
                r#"    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>
"#,
            );
        }
        for (i, section) in self.sections.iter().enumerate() {
            manifest.push_str(&format!(
                r#"    <item id="section-{}" href="{}" media-type="application/xhtml+xml"/>
"#,
                i + 1,
                xml_escape(&section.filename)
            ));
        }

        // Spine: cover, then sections. Nav is not in spine.
        let mut spine = String::new();
        if self.cover.is_some() {
            spine.push_str("    <itemref idref=\"cover\"/>\n");
        }
        for i in 0..self.sections.len() {
            spine.push_str(&format!("    <itemref idref=\"section-{}\"/>\n", i + 1));
        }

        let cover_meta = match self.cover.map(|i| &self.images[i]) {
            Some(img) => format!("\n    <meta name=\"cover\" content=\"{}\"/>", img.id),
            None => String::new(),
        };
        let description_el = if self.description.is_empty() {
            String::new()
        } else {
            format!(
                "\n    <dc:description>{}</dc:description>",
                xml_escape(&self.description)
            )
        };
        let modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{language}</dc:language>{description_el}
    <meta property="dcterms:modified">{modified}</meta>{cover_meta}
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
            id = xml_escape(&self.identifier()),
            title = xml_escape(&self.title),
            creator = xml_escape(&self.author),
            language = xml_escape(&self.language),
            description_el = description_el,
            modified = modified,
            cover_meta = cover_meta,
            manifest = manifest,
            spine = spine,
        );

        zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
        zip.write_all(opf.as_bytes())?;
        Ok(())
    }

    fn write_nav_xhtml(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let mut nav_links = String::new();
        for section in &self.sections {
            nav_links.push_str(&format!(
                r#"      <li><a href="{}">{}</a></li>
"#,
                xml_escape(&section.filename),
                xml_escape(&section.title)
            ));
        }
        let nav = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>{}</h1>
    <ol>
{}    </ol>
  </nav>
</body>
</html>
"#,
            xml_escape(&self.title),
            xml_escape(&self.title),
            nav_links
        );
        zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
        zip.write_all(nav.as_bytes())?;
        Ok(())
    }

    fn write_ncx(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let mut nav_points = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            nav_points.push_str(&format!(
                r#"    <navPoint id="navpoint-{}" playOrder="{}">
      <navLabel><text>{}</text></navLabel>
      <content src="{}"/>
    </navPoint>
"#,
                i + 1,
                i + 1,
                xml_escape(&section.title),
                xml_escape(&section.filename)
            ));
        }
        let ncx = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
            xml_escape(&self.identifier()),
            xml_escape(&self.title),
            nav_points
        );
        zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
        zip.write_all(ncx.as_bytes())?;
        Ok(())
    }

    fn write_cover_xhtml(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        let img = match self.cover.map(|i| &self.images[i]) {
            Some(img) => img,
            None => return Ok(()),
        };
        let cover_xhtml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>Cover</title>
{}</head>
<body>
  <div class="cover">
    <img src="{}" alt="{}"/>
  </div>
</body>
</html>
"#,
            self.stylesheet_link(),
            xml_escape(&img.href),
            xml_escape(&self.title)
        );
        zip.start_file(format!("{}cover.xhtml", OEBPS_PREFIX), options)?;
        zip.write_all(cover_xhtml.as_bytes())?;
        Ok(())
    }

    fn write_sections(
        &self,
        zip: &mut ZipWriter<impl Write + Seek>,
        options: SimpleFileOptions,
    ) -> Result<(), EpubError> {
        for section in &self.sections {
            let html = format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
{css}</head>
<body>
{body}
</body>
</html>
"#,
                lang = xml_escape(&self.language),
                title = xml_escape(&section.title),
                css = self.stylesheet_link(),
                body = section.body
            );
            zip.start_file(format!("{}{}", OEBPS_PREFIX, section.filename), options)?;
            zip.write_all(html.as_bytes())?;
        }
        Ok(())
    }
}

fn image_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
