//! Blocking HTTP fetcher with a fixed browser User-Agent, unconditional HTTP 429 cooldown,
//! optional politeness delay, and a bounded retry helper for callers.

use crate::scraper::error::ScraperError;
use log::{debug, warn};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:108.0) Gecko/20100101 Firefox/108.0";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DELAY_SECS: u64 = 0;
const MAX_REDIRECTS: usize = 10;

/// Default retry ceiling for chapter and image operations. 0 means unlimited.
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Wait after an HTTP 429 before sending the same request again.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// A response whose body has not been read yet.
pub struct Response {
    status: u16,
    url: String,
    body: Box<dyn Read + Send>,
}

impl Response {
    pub fn new(status: u16, url: impl Into<String>, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            url: url.into(),
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Only 200 counts as success; every caller treats other statuses as terminal.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Read the whole body as text (lossy UTF-8).
    pub fn text(mut self) -> Result<String, ScraperError> {
        let mut buf = Vec::new();
        self.body
            .read_to_end(&mut buf)
            .map_err(|e| ScraperError::BodyRead {
                url: self.url.clone(),
                source: e,
            })?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Stream the body into `out`.
    pub fn copy_to(&mut self, out: &mut impl Write) -> std::io::Result<u64> {
        std::io::copy(&mut self.body, out)
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Sends one GET request. Implementations must not retry.
pub trait Transport {
    fn send(&self, url: &str, referer: Option<&str>) -> Result<Response, ScraperError>;
}

/// reqwest-backed transport. The client carries the User-Agent and the per-request timeout.
#[derive(Debug)]
pub struct HttpTransport {
    inner: reqwest::blocking::Client,
}

impl Transport for HttpTransport {
    fn send(&self, url: &str, referer: Option<&str>) -> Result<Response, ScraperError> {
        let mut request = self.inner.get(url);
        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }
        let response = request.send().map_err(|e| {
            if e.is_builder() {
                ScraperError::InvalidUrl {
                    input: url.to_string(),
                    reason: e.to_string(),
                }
            } else {
                ScraperError::Network {
                    url: url.to_string(),
                    source: Box::new(e),
                }
            }
        })?;
        let status = response.status().as_u16();
        Ok(Response::new(status, url, Box::new(response)))
    }
}

/// Blocking wait. Swapped out in tests so cooldowns cost nothing.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Fetcher shared by every stage of a run.
pub struct Fetcher {
    transport: Box<dyn Transport>,
    sleeper: Box<dyn Sleeper>,
    delay: Duration,
    last_request: Option<Instant>,
    cooldown: Duration,
    max_retries: u32,
    backoff_secs: Vec<u64>,
}

impl Fetcher {
    /// Build a fetcher with default User-Agent, timeout, and retry ceiling.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::default()
    }

    /// GET `url`, sending `referer` only when it is non-empty.
    ///
    /// HTTP 429 closes the response, sleeps for the cooldown and resends, without limit and
    /// without touching any retry budget. Transport failures are returned to the caller.
    /// Any other status is returned as-is.
    pub fn get(&mut self, url: &str, referer: Option<&str>) -> Result<Response, ScraperError> {
        let referer = referer.filter(|r| !r.is_empty());
        loop {
            self.wait_delay();
            let response = self.transport.send(url, referer);
            self.last_request = Some(Instant::now());
            let response = response?;
            if response.status() == 429 {
                drop(response);
                warn!(
                    "Rate limited at {}; waiting {}s before retrying.",
                    url,
                    self.cooldown.as_secs()
                );
                self.sleeper.sleep(self.cooldown);
                continue;
            }
            return Ok(response);
        }
    }

    /// Run `op` until it succeeds, fails terminally, or exhausts the retry ceiling.
    ///
    /// With a ceiling of `n > 0`, `op` runs at most `n + 1` times. A ceiling of 0 retries forever.
    /// Every failure ends in `None`; the caller skips whatever `what` describes.
    pub fn retry<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&mut Self) -> Result<T, ScraperError>,
    ) -> Option<T> {
        let mut attempt: u32 = 0;
        loop {
            match op(self) {
                Ok(value) => return Some(value),
                Err(e) if e.is_retryable() => {
                    if self.max_retries > 0 && attempt >= self.max_retries {
                        warn!("{}: giving up after {} attempts: {}", what, attempt + 1, e);
                        return None;
                    }
                    debug!("{}: attempt {} failed: {}", what, attempt + 1, e);
                    if let Some(secs) = self.backoff_for(attempt) {
                        self.sleeper.sleep(Duration::from_secs(secs));
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{}: {}", what, e);
                    return None;
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Option<u64> {
        self.backoff_secs
            .get(attempt as usize)
            .or_else(|| self.backoff_secs.last())
            .copied()
            .filter(|secs| *secs > 0)
    }

    fn wait_delay(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                self.sleeper.sleep(self.delay - elapsed);
            }
        }
    }
}

/// Builder for [Fetcher] with optional User-Agent, delay, timeout, and retry settings.
#[derive(Debug)]
pub struct FetcherBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    max_retries: u32,
    retry_backoff_secs: Vec<u64>,
    cooldown: Duration,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_secs: Vec::new(),
            cooldown: RATE_LIMIT_COOLDOWN,
        }
    }
}

impl FetcherBuilder {
    /// Set a custom User-Agent. If not set, a Firefox User-Agent is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Minimum delay between consecutive requests in seconds. Default 0.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    /// Per-request deadline in seconds. Default 10.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Retry ceiling for [Fetcher::retry]. 0 means unlimited. Default 10.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Wait in seconds before each retry; the last value is reused. Default: no wait.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    /// Override the HTTP 429 cooldown. Default 60 seconds.
    pub fn rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Build the reqwest client and wrap it.
    pub fn build(self) -> Result<Fetcher, reqwest::Error> {
        let user_agent = self
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(self.build_with(HttpTransport { inner }, ThreadSleeper))
    }

    /// Wrap a custom transport and sleeper (scripted responses, recorded waits).
    pub fn build_with(
        self,
        transport: impl Transport + 'static,
        sleeper: impl Sleeper + 'static,
    ) -> Fetcher {
        Fetcher {
            transport: Box::new(transport),
            sleeper: Box::new(sleeper),
            delay: Duration::from_secs(self.delay_secs),
            last_request: None,
            cooldown: self.cooldown,
            max_retries: self.max_retries,
            backoff_secs: self.retry_backoff_secs,
        }
    }
}
