//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::cache::{CacheEngine, DurableStore, FileStore, NullStore};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::requests::validate_key;
use crate::models::{GetResponse, HasResponse, HealthResponse, SetRequest, SetResponse, StatsResponse};
use crate::upstream::UpstreamClient;

/// Values served over HTTP are arbitrary JSON documents.
pub type JsonCache = CacheEngine<serde_json::Value>;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Shared cache engine handle
    pub cache: JsonCache,
    /// Source for `/fetch` misses, if configured
    pub upstream: Option<UpstreamClient>,
    /// Lifetime of upstream responses
    pub upstream_max_age: Duration,
}

impl AppState {
    /// Creates a new AppState around `cache` with no upstream.
    pub fn new(cache: JsonCache) -> Self {
        Self {
            cache,
            upstream: None,
            upstream_max_age: Config::default().upstream_max_age,
        }
    }

    /// Adds an upstream for `/fetch` requests.
    pub fn with_upstream(mut self, upstream: UpstreamClient, max_age: Duration) -> Self {
        self.upstream = Some(upstream);
        self.upstream_max_age = max_age;
        self
    }

    /// Creates a new AppState from configuration.
    ///
    /// Builds the one cache engine the process uses.
    pub fn from_config(config: &Config) -> Self {
        let durable: Arc<dyn DurableStore> = match &config.durable_dir {
            Some(dir) => {
                info!("Durable records stored in {}", dir.display());
                Arc::new(FileStore::new(dir.clone()))
            }
            None => {
                info!("No DURABLE_DIR set, durable storage disabled");
                Arc::new(NullStore)
            }
        };

        let cache = CacheEngine::with_clock(
            durable,
            Arc::new(crate::clock::SystemClock),
            config.default_max_age,
        );
        let state = Self::new(cache);

        match &config.upstream_url {
            Some(url) => {
                info!("Forwarding /fetch misses to {}", url);
                state.with_upstream(UpstreamClient::new(url.as_str()), config.upstream_max_age)
            }
            None => state,
        }
    }
}

/// Key under which upstream GET responses for `path` are cached.
pub fn fetch_key(path: &str) -> String {
    format!("get:{}", path)
}

fn check_key(key: &str) -> Result<()> {
    match validate_key(key) {
        Some(error_msg) => Err(CacheError::InvalidRequest(error_msg)),
        None => Ok(()),
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value under a key, optionally with its own max age.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let max_age = req
        .max_age_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.cache.default_max_age());
    state.cache.set_with_max_age(&req.key, req.value, max_age);

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
///
/// Returns the cached value. If a fetch for the key is running, waits for it.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    check_key(&key)?;
    let value = state.cache.get(&key).await?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for GET /has/:key
pub async fn has_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HasResponse>> {
    check_key(&key)?;
    let exists = state.cache.has(&key);

    Ok(Json(HasResponse::new(key, exists)))
}

/// Handler for GET /fetch/*path
///
/// Serves the upstream document at `path` through the cache. Concurrent
/// requests for the same path share one upstream request.
pub async fn fetch_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<GetResponse>> {
    let path = format!("/{}", path.trim_start_matches('/'));
    let key = fetch_key(&path);
    check_key(&key)?;

    let value = match &state.upstream {
        Some(upstream) => {
            let upstream = upstream.clone();
            let fetch = async move { upstream.get_json(&path).await };
            state
                .cache
                .get_with(&key, fetch, Some(state.upstream_max_age))
                .await?
        }
        None => state.cache.get(&key).await?,
    };

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
