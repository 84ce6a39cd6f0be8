//! Shared error type for fetching, parsing, and image caching.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed transport failure. reqwest errors in production, scripted errors in tests.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Scraper error for HTTP, parsing, and cache cases.
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus {
        status: u16,
        url: String,
        /// Optional context (e.g. "series page", "chapter") for programmatic use.
        context: Option<String>,
    },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Could not parse series page: {message}")]
    ParseSeriesPage { message: String },

    #[error("Series page lists no volumes. Wrong link, or the series does not exist?")]
    EmptyVolumeList,

    #[error("Failed to write cached image {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to add cached image {path} to the book: {reason}")]
    CacheRegister { path: PathBuf, reason: String },
}

impl ScraperError {
    /// Returns `true` for failures that count against the retry budget.
    ///
    /// Non-200 statuses, bad URLs and landing-page problems are terminal: another
    /// attempt would see the same answer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScraperError::Network { .. }
                | ScraperError::BodyRead { .. }
                | ScraperError::CacheWrite { .. }
                | ScraperError::CacheRegister { .. }
        )
    }
}
