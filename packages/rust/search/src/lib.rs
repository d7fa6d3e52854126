//! Web search provider used by the searcher stage.
//!
//! The pipeline only depends on the [`SearchProvider`] trait; [`TavilyClient`]
//! is the production implementation talking to the Tavily search API.

use async_trait::async_trait;
use dossier_shared::{DossierError, Result, SearchHit, TavilyConfig, resolve_secret};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

/// Default timeout in seconds for search requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("dossier/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Anything that can turn a query into a list of raw web results.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchHit>>;
}

// ---------------------------------------------------------------------------
// Tavily
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Tavily API client.
pub struct TavilyClient {
    api_key: String,
    endpoint: Url,
    client: Client,
}

impl TavilyClient {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            DossierError::validation(format!("invalid search base URL {base_url}: {e}"))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("search")
            .map_err(|e| DossierError::validation(format!("invalid search endpoint: {e}")))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DossierError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            endpoint,
            client,
        })
    }

    /// Build a client from the `[tavily]` config section, reading the key from its env var.
    pub fn from_config(config: &TavilyConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env)?;
        Self::new(api_key, &config.base_url)
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    #[instrument(skip_all, fields(query = %query, max_results = max_results))]
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchHit>> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| DossierError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DossierError::Network(format!(
                "search API returned HTTP {status}: {body}"
            )));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| DossierError::Network(format!("failed to parse search response: {e}")))?;

        let mut hits = parsed.results;
        hits.truncate(max_results as usize);

        info!(hits = hits.len(), "search complete");
        debug!(urls = ?hits.iter().map(|h| h.url.as_str()).collect::<Vec<_>>());

        Ok(hits)
    }
}
