use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db;
use crate::error::CatalogError;
use crate::models::Case;

const USER_AGENT: &str = concat!("classroom-jury/", env!("CARGO_PKG_VERSION"));
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub const NO_CASES_MESSAGE: &str = "No cases available. Try again later.";

/// Where case definitions come from.
pub enum CaseSource {
    Http { client: reqwest::Client, url: String },
    File(PathBuf),
}

impl CaseSource {
    pub fn http(url: impl Into<String>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(CaseSource::Http {
            client,
            url: url.into(),
        })
    }

    /// Picks the file source over the URL when both are somehow present.
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>, CatalogError> {
        if let Some(path) = &settings.cases_file {
            return Ok(Some(CaseSource::File(path.clone())));
        }
        settings.cases_url.as_deref().map(Self::http).transpose()
    }

    pub async fn fetch(&self) -> Result<Vec<Case>, CatalogError> {
        match self {
            CaseSource::Http { client, url } => {
                debug!(url = %url, "fetching case catalog");
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| CatalogError::Network(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(CatalogError::Status(status.as_u16()));
                }

                response
                    .json::<Vec<Case>>()
                    .await
                    .map_err(|e| CatalogError::Decode(e.to_string()))
            }
            CaseSource::File(path) => {
                debug!(path = %path.display(), "reading case catalog");
                let body = tokio::fs::read_to_string(path).await?;
                Ok(serde_json::from_str(&body)?)
            }
        }
    }
}

/// A catalog read. `error` is set when the source could not be reached; in
/// that case `cases` is empty.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub cases: Vec<Case>,
    pub error: Option<String>,
}

impl CatalogSnapshot {
    pub fn find(&self, case_id: i64) -> Option<&Case> {
        self.cases.iter().find(|case| case.id == case_id)
    }

    /// True when the source failed and there is nothing to score against.
    pub fn is_unavailable(&self) -> bool {
        self.cases.is_empty() && self.error.is_some()
    }
}

/// Case catalog backed by a source and a time-bounded cache in the database.
pub struct CaseCatalog {
    pool: SqlitePool,
    source: Option<CaseSource>,
    ttl: Duration,
}

impl CaseCatalog {
    pub fn new(pool: SqlitePool, source: Option<CaseSource>, ttl: Duration) -> Self {
        Self { pool, source, ttl }
    }

    /// Returns the cached catalog while it is fresh, otherwise refetches.
    /// Never fails: fetch errors produce an empty snapshot carrying the error.
    pub async fn load(&self, force_refresh: bool) -> CatalogSnapshot {
        if !force_refresh {
            if let Some(cases) = self.cached().await {
                debug!(cases = cases.len(), "case catalog served from cache");
                return CatalogSnapshot { cases, error: None };
            }
        }

        match self.refresh().await {
            Ok(cases) => CatalogSnapshot { cases, error: None },
            Err(err) => {
                warn!(error = %err, "case catalog unavailable");
                CatalogSnapshot {
                    cases: Vec::new(),
                    error: Some(format!("Error loading cases: {err}")),
                }
            }
        }
    }

    async fn cached(&self) -> Option<Vec<Case>> {
        let (payload, fetched_at) = match db::load_case_cache(&self.pool).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "could not read case cache");
                return None;
            }
        };

        let fresh = (Utc::now() - fetched_at)
            .to_std()
            .map(|age| age < self.ttl)
            .unwrap_or(false);
        if !fresh {
            return None;
        }

        serde_json::from_str(&payload).ok()
    }

    async fn refresh(&self) -> Result<Vec<Case>, CatalogError> {
        let source = self.source.as_ref().ok_or(CatalogError::NoSource)?;
        let cases = source.fetch().await?;
        info!(cases = cases.len(), "case catalog fetched");

        match serde_json::to_string(&cases) {
            Ok(payload) => {
                if let Err(err) = db::store_case_cache(&self.pool, &payload, Utc::now()).await {
                    warn!(error = %err, "could not cache case catalog");
                }
            }
            Err(err) => warn!(error = %err, "could not serialize case catalog"),
        }

        Ok(cases)
    }
}
