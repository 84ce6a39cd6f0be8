//! Site scraping: rate-limited fetcher, series landing page, chapter pages, and the image cache.

mod client;
mod error;

pub mod chapter;
pub mod images;
pub mod series;

pub use chapter::ChapterExtractor;
pub use client::{
    Fetcher, FetcherBuilder, HttpTransport, Response, Sleeper, ThreadSleeper, Transport,
    DEFAULT_MAX_RETRIES, RATE_LIMIT_COOLDOWN,
};
pub use error::{ScraperError, TransportError};
pub use images::ImageCache;

#[cfg(test)]
pub(crate) use client::testing;

use scraper::Selector;

/// Parse a CSS selector or return an error (avoids panics from Selector::parse).
pub(crate) fn parse_selector(sel: &str) -> Result<Selector, ScraperError> {
    Selector::parse(sel).map_err(|e| ScraperError::InvalidSelector {
        selector: sel.to_string(),
        reason: e.to_string(),
    })
}
