//! hakoscrape: CLI crawler for Hako / docln light-novel series, writing one EPUB per volume.

pub mod assemble;
pub mod cli;
pub mod config;
pub mod epub;
pub mod model;
pub mod normalize;
pub mod scraper;

// Re-exports for CLI and consumers.
pub use assemble::{archive_series, AssembleError, AssembleOptions};
pub use epub::{EpubBuilder, EpubError};
pub use model::{Chapter, Series, Volume};
pub use normalize::normalize;
pub use scraper::{Fetcher, FetcherBuilder, ScraperError};
