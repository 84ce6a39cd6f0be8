//! Content-addressed image cache: `<cache_root>/<series_id>/<sha256(url)><ext>`.
//!
//! A file present at the cache path is trusted as-is (no TTL, no verification), so the
//! directory doubles as a resumable cache across runs.

use crate::epub::EpubBuilder;
use crate::model::Series;
use crate::scraper::client::{Fetcher, Response};
use crate::scraper::error::ScraperError;
use log::{debug, warn};
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Extensions kept as-is (compared case-insensitively).
const WHITELIST_EXTS: [&str; 4] = [".png", ".jpeg", ".jpg", ".webp"];
const DEFAULT_EXT: &str = ".jpg";

/// Hex SHA-256 of the source URL.
pub fn hash_url(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Whitelisted, lowercased extension of the URL path, or `.jpg`.
pub fn image_extension(url: &str) -> &'static str {
    let path = match Url::parse(url) {
        Ok(u) => u.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let ext = Path::new(&path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    WHITELIST_EXTS
        .iter()
        .find(|w| w.eq_ignore_ascii_case(&ext))
        .copied()
        .unwrap_or(DEFAULT_EXT)
}

/// Image cache for one series.
#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
    base_url: String,
    referer: String,
}

impl ImageCache {
    pub fn new(cache_root: &Path, series: &Series) -> Self {
        Self {
            dir: cache_root.join(&series.id),
            base_url: series.base_url.clone(),
            referer: series.referer(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Same URL, same path, in this run and the next.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", hash_url(url), image_extension(url)))
    }

    /// Resolve `src` against the series base URL. Empty sources resolve to nothing.
    pub fn absolute_url(&self, src: &str) -> Option<String> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }
        let joined = Url::parse(&self.base_url).and_then(|base| base.join(src));
        match joined {
            Ok(u) => Some(u.to_string()),
            Err(_) => Url::parse(src).ok().map(|u| u.to_string()),
        }
    }

    /// Cache (or reuse) the image at `src`, register it with `book`, and return its href.
    ///
    /// `None` means "omit this image": the source was empty, the server answered non-200,
    /// or the retry ceiling ran out.
    pub fn resolve(
        &self,
        fetcher: &mut Fetcher,
        book: &mut EpubBuilder,
        src: &str,
        use_referer: bool,
    ) -> Option<String> {
        let url = self.absolute_url(src)?;
        let path = self.cache_path(&url);
        let referer = if use_referer {
            Some(self.referer.as_str())
        } else {
            None
        };

        fetcher
            .retry(&format!("Image {}", url), |f| {
                if path.is_file() {
                    debug!("Image {}: cached at {}", url, path.display());
                    return register(book, &path).map(Some);
                }

                let mut response = f.get(&url, referer)?;
                if !response.is_ok() {
                    warn!("Image {}: HTTP {}. Dropped.", url, response.status());
                    return Ok(None);
                }
                self.store(&mut response, &path)?;
                register(book, &path).map(Some)
            })
            .flatten()
    }

    /// Stream the body to a sibling `.part` file, then rename into place so a torn download
    /// never looks like a cache hit.
    fn store(
        &self,
        response: &mut Response,
        path: &Path,
    ) -> Result<(), ScraperError> {
        let cache_err = |e: std::io::Error| ScraperError::CacheWrite {
            path: path.to_path_buf(),
            source: e,
        };
        std::fs::create_dir_all(&self.dir).map_err(cache_err)?;
        let part = part_path(path);
        let result = std::fs::File::create(&part)
            .and_then(|mut out| response.copy_to(&mut out))
            .and_then(|_| std::fs::rename(&part, path));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&part);
            return Err(cache_err(e));
        }
        Ok(())
    }
}

/// `<hash><ext>.part`, next to the final file.
fn part_path(path: &Path) -> PathBuf {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

fn register(book: &mut EpubBuilder, path: &Path) -> Result<String, ScraperError> {
    book.add_image(path)
        .map_err(|e| ScraperError::CacheRegister {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
