//! Metadata tree extracted from a series landing page: series owns volumes owns chapters.

use serde::{Deserialize, Serialize};

/// One series (the landing page).
///
/// `id` and `base_url` both come from the page's share link and are never recomputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: String,
    pub title: String,
    pub cover: String,
    /// Summary paragraphs in page order.
    pub description: Vec<String>,
    pub status: String,
    pub author: String,
    pub artist: String,
    pub translator: String,
    pub group: String,
    pub volumes: Vec<Volume>,
    /// Origin used to resolve relative links and sent as Referer. Not serialized.
    #[serde(skip)]
    pub base_url: String,
}

/// One volume, packaged as one EPUB. Position in [Series::volumes] gives the 1-based file index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub title: String,
    pub cover: String,
    pub chapters: Vec<Chapter>,
}

/// One chapter link in source-page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// Absolute URL (base URL + relative href).
    pub url: String,
}

impl Series {
    /// Referer value for image requests: the base URL with a trailing slash.
    pub fn referer(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }

    pub fn chapter_count(&self) -> usize {
        self.volumes.iter().map(|v| v.chapters.len()).sum()
    }
}
