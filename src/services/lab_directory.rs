use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Cached allow-list of lab identifiers fetched from a remote CSV.
///
/// The set is reloaded when older than the configured TTL. A failed reload
/// keeps serving the last good set (empty on a cold start), so validation
/// degrades instead of erroring. Only one reload runs at a time and the
/// cache lock is never held across the HTTP fetch; readers keep getting the
/// stale set while a reload is in flight.
pub struct LabDirectory {
    http: reqwest::Client,
    source: Option<String>,
    ttl: Duration,
    cache: RwLock<Cached>,
    reloading: Mutex<()>,
}

struct Cached {
    labs: Arc<HashSet<String>>,
    fetched_at: Option<Instant>,
}

impl LabDirectory {
    pub fn new(url: &str, ttl: Duration) -> Result<Self, LabDirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self::with_cache(http, Some(url.to_string()), ttl, HashSet::new(), None))
    }

    /// A directory with a fixed set that never reloads.
    pub fn fixed<I, S>(labs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_cache(
            reqwest::Client::new(),
            None,
            Duration::MAX,
            labs.into_iter().map(Into::into).collect(),
            Some(Instant::now()),
        )
    }

    fn with_cache(
        http: reqwest::Client,
        source: Option<String>,
        ttl: Duration,
        labs: HashSet<String>,
        fetched_at: Option<Instant>,
    ) -> Self {
        Self {
            http,
            source,
            ttl,
            cache: RwLock::new(Cached {
                labs: Arc::new(labs),
                fetched_at,
            }),
            reloading: Mutex::new(()),
        }
    }

    /// Current allow-list, reloading first if the cached copy is stale.
    ///
    /// On a cold start callers wait for the first load. Afterwards a stale
    /// set is reloaded by whichever caller gets there first, and everyone
    /// else is served the stale set until the new one is swapped in.
    pub async fn valid_lab_ids(&self) -> Arc<HashSet<String>> {
        let (labs, cold) = {
            let cache = self.cache.read().await;
            if !self.is_stale(&cache) {
                return Arc::clone(&cache.labs);
            }
            (Arc::clone(&cache.labs), cache.fetched_at.is_none())
        };

        let _guard = if cold {
            self.reloading.lock().await
        } else {
            match self.reloading.try_lock() {
                Ok(guard) => guard,
                Err(_) => return labs,
            }
        };

        // Another caller may have reloaded while we waited for the guard.
        {
            let cache = self.cache.read().await;
            if !self.is_stale(&cache) {
                return Arc::clone(&cache.labs);
            }
        }
        self.reload().await
    }

    pub async fn contains(&self, lab_id: &str) -> bool {
        self.valid_lab_ids().await.contains(lab_id)
    }

    /// Force a reload regardless of the TTL.
    pub async fn refresh(&self) -> Arc<HashSet<String>> {
        let _guard = self.reloading.lock().await;
        self.reload().await
    }

    fn is_stale(&self, cache: &Cached) -> bool {
        match (&self.source, cache.fetched_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(_), Some(at)) => at.elapsed() >= self.ttl,
        }
    }

    /// Fetch without holding the cache lock, then swap the result in.
    /// Callers hold `reloading`.
    async fn reload(&self) -> Arc<HashSet<String>> {
        let Some(url) = self.source.as_deref() else {
            return Arc::clone(&self.cache.read().await.labs);
        };

        let fetched = self.fetch(url).await;

        let mut cache = self.cache.write().await;
        match fetched {
            Ok(labs) => {
                tracing::info!(count = labs.len(), "Loaded lab directory");
                cache.labs = Arc::new(labs);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    cached = cache.labs.len(),
                    "Lab directory fetch failed, keeping last known set"
                );
            }
        }
        // Failed fetches also wait a full TTL.
        cache.fetched_at = Some(Instant::now());
        Arc::clone(&cache.labs)
    }

    async fn fetch(&self, url: &str) -> Result<HashSet<String>, LabDirectoryError> {
        let body = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_lab_ids(&body)
    }
}

/// Parse the lab list: strip a leading BOM and take the trimmed first
/// column of every non-empty row.
pub fn parse_lab_ids(body: &str) -> Result<HashSet<String>, LabDirectoryError> {
    let cleaned = body.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(cleaned.as_bytes());

    let mut labs = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(first) = record.get(0) {
            let lab_id = first.trim();
            if !lab_id.is_empty() {
                labs.insert(lab_id.to_string());
            }
        }
    }
    Ok(labs)
}

#[derive(Debug, thiserror::Error)]
pub enum LabDirectoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed lab list: {0}")]
    Csv(#[from] csv::Error),
}
