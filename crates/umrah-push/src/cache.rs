//! Versioned offline cache of the application shell.
//!
//! The allow-listed assets are fetched into the current cache version at
//! install; activation drops every other version. Requests are answered
//! cache-first, then from the network; a navigation that fails offline gets
//! the cached offline page.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::{debug, info, warn};

use umrah_store::{CachedAsset, Database};

use crate::config::WorkerConfig;
use crate::error::{PushError, Result};

/// A response body fetched from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

/// [`AssetFetcher`] over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PushError::FetchStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        debug!(url = %url, bytes = body.len(), "Fetched asset");
        Ok(FetchedAsset {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

/// Outcome of the install step. Failures never block activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    OfflineFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Application path, e.g. `/manifest.json`.
    pub path: String,
    /// Page navigation (as opposed to a subresource).
    pub navigation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl FetchResponse {
    fn from_cache(asset: CachedAsset, source: ResponseSource) -> Self {
        Self {
            status: asset.status,
            content_type: asset.content_type,
            body: asset.body,
            source,
        }
    }
}

pub struct OfflineCache {
    db: Mutex<Database>,
    config: WorkerConfig,
}

impl OfflineCache {
    pub fn new(db: Database, config: &WorkerConfig) -> Self {
        Self {
            db: Mutex::new(db),
            config: config.clone(),
        }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    /// Fetch every allow-listed asset into the current cache version.
    pub async fn install(&self, fetcher: &dyn AssetFetcher) -> InstallReport {
        let mut report = InstallReport::default();
        for path in &self.config.precache {
            let url = self.config.asset_url(path);
            let stored = match fetcher.fetch(&url).await {
                Ok(fetched) => {
                    let mut asset = CachedAsset::new(
                        self.config.cache_name.as_str(),
                        path.as_str(),
                        fetched.content_type,
                        fetched.body,
                    );
                    asset.status = fetched.status;
                    self.db().put_asset(&asset).map_err(PushError::from)
                }
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => report.cached += 1,
                Err(e) => {
                    warn!(path = %path, error = %e, "Asset not cached");
                    report.failed.push(path.clone());
                }
            }
        }
        info!(
            cache = %self.config.cache_name,
            cached = report.cached,
            failed = report.failed.len(),
            "Offline cache populated"
        );
        report
    }

    /// Drop every cache version but the current one.
    pub fn activate(&self) -> Result<usize> {
        let purged = self.db().purge_other_caches(&self.config.cache_name)?;
        if purged > 0 {
            info!(cache = %self.config.cache_name, purged, "Old cache versions purged");
        }
        Ok(purged)
    }

    pub fn lookup(&self, path: &str) -> Result<Option<CachedAsset>> {
        Ok(self.db().get_asset(&self.config.cache_name, path)?)
    }

    /// Answer a request cache-first, falling through to the network.
    pub async fn respond(
        &self,
        request: &FetchRequest,
        fetcher: &dyn AssetFetcher,
    ) -> Result<FetchResponse> {
        match self.lookup(&request.path) {
            Ok(Some(asset)) => return Ok(FetchResponse::from_cache(asset, ResponseSource::Cache)),
            Ok(None) => {}
            Err(e) => debug!(path = %request.path, error = %e, "Cache lookup failed"),
        }

        let url = self.config.asset_url(&request.path);
        match fetcher.fetch(&url).await {
            Ok(fetched) => Ok(FetchResponse {
                status: fetched.status,
                content_type: fetched.content_type,
                body: fetched.body,
                source: ResponseSource::Network,
            }),
            Err(e) if request.navigation => {
                debug!(path = %request.path, error = %e, "Navigation offline, serving offline page");
                match self.lookup(&self.config.offline_page) {
                    Ok(Some(page)) => Ok(FetchResponse::from_cache(
                        page,
                        ResponseSource::OfflineFallback,
                    )),
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}
