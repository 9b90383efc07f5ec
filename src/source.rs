//! Data acquisition: tabular feeds read from CSV files or sheet export URLs.
//!
//! Every network read is bounded: a client timeout per request, a capped
//! number of retries with exponential backoff, and a TTL cache that serves
//! the last good copy when the upstream is down.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SourceLocation;
use crate::error::{EngineError, EngineResult};
use crate::models::RawRecord;

/// A feed of flat string-keyed rows. Row order carries no meaning.
#[async_trait]
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> EngineResult<Vec<RawRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    label,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Parses CSV text into rows keyed by (trimmed) header. Blank rows are
/// skipped; short rows simply lack the trailing fields. Bytes that are not
/// UTF-8 are replaced, and a row the reader cannot parse at all is dropped
/// without losing the rest of the feed.
pub fn parse_csv_records<R: std::io::Read>(reader: R) -> EngineResult<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|field| String::from_utf8_lossy(field).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for result in reader.byte_records() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(error = %err, "skipping unreadable CSV row");
                skipped += 1;
                continue;
            }
        };
        let values: Vec<String> = row
            .iter()
            .map(|field| String::from_utf8_lossy(field).trim().to_string())
            .collect();
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(RawRecord::from_pairs(headers.iter().cloned().zip(values)));
    }
    if skipped > 0 {
        debug!(kept = rows.len(), skipped, "parsed CSV with unreadable rows");
    }
    Ok(rows)
}

pub struct EmptySource {
    name: String,
}

impl EmptySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl RecordSource for EmptySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> EngineResult<Vec<RawRecord>> {
        Ok(Vec::new())
    }
}

pub struct CsvFileSource {
    name: String,
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl RecordSource for CsvFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> EngineResult<Vec<RawRecord>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|err| {
            EngineError::unavailable(&self.name, format!("{}: {err}", self.path.display()))
        })?;
        let rows = parse_csv_records(bytes.as_slice())?;
        debug!(source = %self.name, rows = rows.len(), "read CSV file");
        Ok(rows)
    }
}

/// Sheet CSV export over HTTP, trying each URL in order.
pub struct HttpCsvSource {
    name: String,
    client: Client,
    urls: Vec<String>,
    retry: RetryPolicy,
}

impl HttpCsvSource {
    pub fn new(
        name: impl Into<String>,
        urls: Vec<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> EngineResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            client,
            urls,
            retry,
        })
    }

    async fn fetch_url(&self, url: &str) -> EngineResult<Vec<RawRecord>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::unavailable(
                &self.name,
                format!("HTTP {status} from {url}"),
            ));
        }

        let body = response.text().await?;
        // a private sheet answers with an HTML sign-in page instead of CSV
        if body.trim_start().starts_with('<') {
            return Err(EngineError::unavailable(
                &self.name,
                format!("{url} returned HTML, not CSV"),
            ));
        }
        parse_csv_records(body.as_bytes())
    }
}

#[async_trait]
impl RecordSource for HttpCsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> EngineResult<Vec<RawRecord>> {
        let mut last_error = None;
        for url in &self.urls {
            match retry_with_backoff(&self.retry, &self.name, || self.fetch_url(url)).await {
                Ok(rows) => {
                    info!(source = %self.name, %url, rows = rows.len(), "fetched sheet export");
                    return Ok(rows);
                }
                Err(err) => {
                    warn!(source = %self.name, %url, error = %err, "sheet export failed");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| EngineError::unavailable(&self.name, "no URLs configured")))
    }
}

struct CacheEntry {
    fetched_at: Instant,
    rows: Vec<RawRecord>,
}

/// TTL cache in front of another source. A fresh entry skips the fetch; a
/// failed fetch falls back to the stale entry when there is one.
pub struct CachedSource<S> {
    inner: S,
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl<S: RecordSource> CachedSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

#[async_trait]
impl<S: RecordSource> RecordSource for CachedSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self) -> EngineResult<Vec<RawRecord>> {
        let mut entry = self.entry.lock().await;
        if let Some(cached) = entry.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                debug!(source = %self.inner.name(), "cache hit");
                return Ok(cached.rows.clone());
            }
        }

        match self.inner.fetch().await {
            Ok(rows) => {
                *entry = Some(CacheEntry {
                    fetched_at: Instant::now(),
                    rows: rows.clone(),
                });
                Ok(rows)
            }
            Err(err) => match entry.as_ref() {
                Some(stale) => {
                    warn!(
                        source = %self.inner.name(),
                        error = %err,
                        age_secs = stale.fetched_at.elapsed().as_secs(),
                        "serving stale cache"
                    );
                    Ok(stale.rows.clone())
                }
                None => Err(err),
            },
        }
    }
}

/// Builds the source for a configured location, wrapped in a TTL cache.
pub fn build_source(
    name: &str,
    location: &SourceLocation,
    ttl: Duration,
    timeout: Duration,
    retry: RetryPolicy,
) -> EngineResult<Box<dyn RecordSource>> {
    let source: Box<dyn RecordSource> = match location {
        SourceLocation::None => Box::new(EmptySource::new(name)),
        SourceLocation::File(path) => {
            Box::new(CachedSource::new(CsvFileSource::new(name, path.clone()), ttl))
        }
        SourceLocation::Urls(urls) => Box::new(CachedSource::new(
            HttpCsvSource::new(name, urls.clone(), timeout, retry)?,
            ttl,
        )),
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        calls: AtomicUsize,
        fail_after: usize,
    }

    impl ScriptedSource {
        fn new(fail_after: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_after,
            }
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self) -> EngineResult<Vec<RawRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_after {
                return Err(EngineError::unavailable("scripted", "upstream down"));
            }
            Ok(vec![RawRecord::from_pairs([("call", call.to_string())])])
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(10));
    }

    #[test]
    fn parses_csv_with_padded_headers_and_blank_rows() {
        let text = "Timestamp , Email Address ,Event\n\
                    9/5/2025 18:00:00,a@umich.edu,\"1. GBM, with Ford\"\n\
                    ,,\n\
                    9/6/2025 18:00:00,b@umich.edu\n";
        let rows = parse_csv_records(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Email Address"), Some("a@umich.edu"));
        assert_eq!(rows[0].get("Event"), Some("1. GBM, with Ford"));
        assert_eq!(rows[1].get("Event"), None);
    }

    #[test]
    fn non_utf8_row_does_not_sink_the_feed() {
        let mut bytes = b"Email,Full Name,Event\na@umich.edu,Ana,GBM\nb@umich.edu,Ren".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b"e,P-Zone\nc@umich.edu,Cy,Social\n");

        let rows = parse_csv_records(bytes.as_slice()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("Full Name"), Some("Ana"));
        assert_eq!(rows[1].get("Email"), Some("b@umich.edu"));
        assert_eq!(rows[1].get("Full Name"), Some("Ren\u{FFFD}e"));
        assert_eq!(rows[2].get("Event"), Some("Social"));
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
        };
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = retry_with_backoff(&policy, "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::unavailable("test", "flaky"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result: EngineResult<()> = retry_with_backoff(&RetryPolicy::none(), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::unavailable("test", "down"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_cache_skips_fetch() {
        let cached = CachedSource::new(ScriptedSource::new(usize::MAX), Duration::from_secs(300));
        cached.fetch().await.unwrap();
        let second = cached.fetch().await.unwrap();
        assert_eq!(second[0].get("call"), Some("0"));
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        cached.invalidate().await;
        let third = cached.fetch().await.unwrap();
        assert_eq!(third[0].get("call"), Some("1"));
    }

    #[tokio::test]
    async fn stale_cache_covers_upstream_failure() {
        let cached = CachedSource::new(ScriptedSource::new(1), Duration::ZERO);
        let first = cached.fetch().await.unwrap();
        let second = cached.fetch().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_without_cache_propagates() {
        let cached = CachedSource::new(ScriptedSource::new(0), Duration::from_secs(60));
        assert!(matches!(
            cached.fetch().await,
            Err(EngineError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn reads_csv_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Email,Event,Uniqname").unwrap();
        writeln!(file, "a@umich.edu,GBM,abc").unwrap();

        let source = CsvFileSource::new("snapshot", file.path());
        let rows = source.fetch().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("Uniqname"), Some("abc"));

        let missing = CsvFileSource::new("snapshot", "/nonexistent/event_data.csv");
        assert!(matches!(
            missing.fetch().await,
            Err(EngineError::SourceUnavailable { .. })
        ));
    }
}
