//! CLI parsing and orchestration. Parses args, fetches the series page, writes one EPUB per
//! volume. Maps errors to exit codes.

use crate::assemble::{archive_series, selected_volumes, volume_output_path, AssembleError, AssembleOptions};
use crate::config::{self, Config};
use crate::epub::DEFAULT_STYLESHEET;
use crate::model::Series;
use crate::scraper::series::fetch_series;
use crate::scraper::{Fetcher, FetcherBuilder, ScraperError, DEFAULT_MAX_RETRIES};
use clap::Parser;
use log::info;
use reqwest::Url;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_CACHE_DIR: &str = "tmp";
const SERIES_JSON: &str = "series.json";

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Assemble(#[from] AssembleError),

    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_)
            | CliRunError::Assemble(AssembleError::EmptySelection { .. }) => 1,
            CliRunError::Scraper(_) | CliRunError::Assemble(AssembleError::EmptySeries { .. }) => {
                2
            }
            CliRunError::Assemble(_) | CliRunError::Output { .. } => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hakoscrape")]
#[command(about = "Download a light-novel series from Hako / docln and write one EPUB per volume")]
#[command(
    after_help = "Config file keys (output_dir, cache_dir, user_agent, timeout_secs, request_delay_secs, retries, retry_backoff_secs, notes, stylesheet) are read from ./hakoscrape.toml or the user config directory. CLI flags override config."
)]
pub struct Args {
    /// Series page URL, e.g. https://docln.net/truyen/1234-some-series
    pub link: String,

    /// Retry ceiling for each chapter and image (default 10). 0 retries forever.
    #[arg(long)]
    pub retries: Option<u32>,

    /// Request timeout in seconds (default 10).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not append translator notes after their paragraph.
    #[arg(long)]
    pub no_notes: bool,

    /// Output root; books go to <output>/<series id>/ (default ./output).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Image cache root (default ./tmp). Reused across runs.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Minimum delay between requests in seconds (default 0).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Only build these volumes (1-based inclusive), e.g. 1-3 or 2-2.
    #[arg(long, value_parser = parse_volume_range)]
    pub volumes: Option<(usize, usize)>,

    /// Also write the parsed series as series.json next to the books.
    #[arg(long)]
    pub json: bool,

    /// Parse the series page, print what would be written, and stop.
    #[arg(long)]
    pub dry_run: bool,

    /// Only log warnings and errors; no progress bars.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Log level used when RUST_LOG is not set.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

fn parse_volume_range(s: &str) -> Result<(usize, usize), String> {
    let s = s.trim();
    let (from_str, to_str) = s.split_once('-').ok_or_else(|| {
        format!(
            "Invalid --volumes: expected 'from-to' (e.g. 1-3), got '{}'",
            s
        )
    })?;
    let from_str = from_str.trim();
    let to_str = to_str.trim();
    let from: usize = from_str.parse().map_err(|_| {
        format!(
            "Invalid --volumes: '{}' is not a valid start volume number",
            from_str
        )
    })?;
    let to: usize = to_str.parse().map_err(|_| {
        format!(
            "Invalid --volumes: '{}' is not a valid end volume number",
            to_str
        )
    })?;
    if from == 0 {
        return Err("Invalid --volumes: volumes are numbered from 1".to_string());
    }
    if from > to {
        return Err(format!(
            "Invalid --volumes: start ({}) must be <= end ({})",
            from, to
        ));
    }
    Ok((from, to))
}

/// Merge CLI flags over config over defaults.
fn resolve_settings(
    args: &Args,
    config: Option<&Config>,
) -> Result<(FetcherBuilder, AssembleOptions), CliRunError> {
    let mut builder = Fetcher::builder().max_retries(
        args.retries
            .or_else(|| config.and_then(|c| c.retries))
            .unwrap_or(DEFAULT_MAX_RETRIES),
    );
    if let Some(secs) = args.timeout.or_else(|| config.and_then(|c| c.timeout_secs)) {
        builder = builder.timeout_secs(secs);
    }
    if let Some(secs) = args
        .delay
        .or_else(|| config.and_then(|c| c.request_delay_secs))
    {
        builder = builder.delay_secs(secs);
    }
    if let Some(ua) = args
        .user_agent
        .clone()
        .or_else(|| config.and_then(|c| c.user_agent.clone()))
    {
        builder = builder.user_agent(ua);
    }
    if let Some(backoff) = config.and_then(|c| c.retry_backoff_secs.clone()) {
        builder = builder.retry_backoff_secs(backoff);
    }

    let stylesheet = match config.and_then(|c| c.stylesheet.as_ref()) {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            CliRunError::InvalidInput(format!("Cannot read stylesheet {}: {}", path.display(), e))
        })?,
        None => DEFAULT_STYLESHEET.to_string(),
    };

    let opts = AssembleOptions {
        output_root: args
            .output
            .clone()
            .or_else(|| config.and_then(|c| c.output_dir.clone()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        cache_root: args
            .cache_dir
            .clone()
            .or_else(|| config.and_then(|c| c.cache_dir.clone()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
        link: args.link.trim().to_string(),
        render_notes: !args.no_notes && config.and_then(|c| c.notes).unwrap_or(true),
        stylesheet,
        volumes: args.volumes,
        progress: !args.quiet,
    };
    Ok((builder, opts))
}

fn log_summary(series: &Series) {
    info!("{} [{}] ({})", series.title, series.id, series.status);
    info!("Author: {} - Artist: {}", series.author, series.artist);
    info!("Translator: {} - Group: {}", series.translator, series.group);
    info!(
        "{} volume(s), {} chapter(s)",
        series.volumes.len(),
        series.chapter_count()
    );
}

fn write_series_json(series: &Series, opts: &AssembleOptions) -> Result<PathBuf, CliRunError> {
    let dir = opts.output_root.join(&series.id);
    let path = dir.join(SERIES_JSON);
    let output_err = |e: std::io::Error| CliRunError::Output {
        path: path.clone(),
        source: e,
    };
    std::fs::create_dir_all(&dir).map_err(output_err)?;
    let json = serde_json::to_string_pretty(series)
        .map_err(|e| output_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    std::fs::write(&path, json).map_err(output_err)?;
    Ok(path)
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    Url::parse(args.link.trim()).map_err(|e| {
        CliRunError::InvalidInput(format!(
            "Expected a series URL. Example: https://docln.net/truyen/1234-some-series Invalid: {}: {}",
            args.link, e
        ))
    })?;

    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let (builder, opts) = resolve_settings(args, config.as_ref())?;
    let mut fetcher = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let series = fetch_series(&mut fetcher, &opts.link)?;
    log_summary(&series);

    if args.dry_run {
        for index in selected_volumes(&series, opts.volumes)? {
            let volume = &series.volumes[index];
            eprintln!(
                "{} ({} chapters) -> {}",
                volume.title,
                volume.chapters.len(),
                volume_output_path(&opts.output_root, &series, index, volume).display()
            );
        }
        return Ok(());
    }

    if args.json {
        let path = write_series_json(&series, &opts)?;
        info!("Wrote {}", path.display());
    }

    let written = archive_series(&series, &mut fetcher, &opts)?;
    info!("Done: {} book(s) in {}", written.len(), opts.output_root.join(&series.id).display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Volume;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["hakoscrape", "https://docln.net/truyen/1-x"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parse_volume_range_valid() {
        assert_eq!(parse_volume_range("1-3").unwrap(), (1, 3));
        assert_eq!(parse_volume_range("2-2").unwrap(), (2, 2));
        assert_eq!(parse_volume_range("  3 - 7  ").unwrap(), (3, 7));
    }

    #[test]
    fn parse_volume_range_rejects_bad_input() {
        assert!(parse_volume_range("1").is_err());
        assert!(parse_volume_range("a-b").is_err());
        assert!(parse_volume_range("0-2").is_err());
        assert!(parse_volume_range("5-1").is_err());
    }

    #[test]
    fn defaults_without_config() {
        let a = args(&[]);
        let (_, opts) = resolve_settings(&a, None).unwrap();
        assert_eq!(opts.output_root, PathBuf::from("output"));
        assert_eq!(opts.cache_root, PathBuf::from("tmp"));
        assert!(opts.render_notes);
        assert!(opts.progress);
        assert_eq!(opts.stylesheet, DEFAULT_STYLESHEET);
        assert_eq!(opts.volumes, None);
        assert_eq!(a.log_level(), "info");
    }

    #[test]
    fn flags_override_config() {
        let config: Config = toml::from_str(
            r#"
            output_dir = "from-config"
            cache_dir = "cache-config"
            notes = true
        "#,
        )
        .unwrap();
        let a = args(&["-o", "from-flag", "--no-notes", "--volumes", "2-4", "-q"]);
        let (_, opts) = resolve_settings(&a, Some(&config)).unwrap();
        assert_eq!(opts.output_root, PathBuf::from("from-flag"));
        assert_eq!(opts.cache_root, PathBuf::from("cache-config"));
        assert!(!opts.render_notes);
        assert!(!opts.progress);
        assert_eq!(opts.volumes, Some((2, 4)));
        assert_eq!(a.log_level(), "warn");
    }

    #[test]
    fn config_can_disable_notes() {
        let config: Config = toml::from_str("notes = false").unwrap();
        let (_, opts) = resolve_settings(&args(&[]), Some(&config)).unwrap();
        assert!(!opts.render_notes);
    }

    #[test]
    fn missing_stylesheet_is_invalid_input() {
        let config: Config = toml::from_str(r#"stylesheet = "/nonexistent/hakoscrape.css""#).unwrap();
        let err = resolve_settings(&args(&[]), Some(&config)).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        let argv = ["hakoscrape", "https://docln.net/truyen/1-x", "-q", "-v"];
        assert!(Args::try_parse_from(argv).is_err());
        assert_eq!(args(&["--verbose"]).log_level(), "debug");
    }

    #[test]
    fn invalid_link_exits_with_1() {
        let a = Args::try_parse_from(["hakoscrape", "not a link"]).unwrap();
        let err = run(&a).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn series_json_omits_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let series = Series {
            id: "1-x".to_string(),
            title: "X".to_string(),
            base_url: "https://docln.net".to_string(),
            volumes: vec![Volume::default()],
            ..Default::default()
        };
        let opts = AssembleOptions {
            output_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let path = write_series_json(&series, &opts).unwrap();
        assert_eq!(path, dir.path().join("1-x").join("series.json"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"title\": \"X\""));
        assert!(!text.contains("docln.net"));
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Assemble(AssembleError::EmptySelection {
                from: 3,
                to: 4,
                count: 1
            })
            .exit_code(),
            1
        );
        assert_eq!(CliRunError::Scraper(ScraperError::EmptyVolumeList).exit_code(), 2);
        assert_eq!(
            CliRunError::Assemble(AssembleError::EmptySeries { id: "1".into() }).exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Assemble(AssembleError::Epub(crate::epub::EpubError::NoSections))
                .exit_code(),
            3
        );
    }
}
