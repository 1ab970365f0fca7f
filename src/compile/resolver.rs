//! Maps a missing package (as named by the compiler) to a published
//! archive and makes it available in the local cache.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::config::RegistryConfig;
use crate::testgen::cache::{Coordinates, DependencyCache};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("empty package identifier")]
    EmptyIdentifier,
    #[error("no published archive provides `{0}`")]
    NotFound(String),
    #[error("download of {url} failed with status {status}")]
    DownloadFailed { url: String, status: u16 },
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid registry url: {0}")]
    Url(#[from] url::ParseError),
    #[error("cache i/o: {0}")]
    Io(#[from] io::Error),
}

/// Remote package index. `search` answers with at most one best match.
pub trait PackageRegistry: Send + Sync {
    fn search(&self, identifier: &str) -> Result<Option<Coordinates>, ResolveError>;

    /// Streams the archive for `coords` into `dest`.
    fn download(&self, coords: &Coordinates, dest: &Path) -> Result<(), ResolveError>;
}

/// What the retry loop needs from dependency resolution.
pub trait Resolve: Send + Sync {
    fn resolve(&self, identifier: &str) -> Result<PathBuf, ResolveError>;
}

/* ============================================================
   Maven Central
   ============================================================ */

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: Option<SearchDocs>,
}

#[derive(Debug, Deserialize)]
struct SearchDocs {
    #[serde(default)]
    docs: Vec<Coordinates>,
}

#[derive(Debug, Clone)]
pub struct MavenCentral {
    client: Client,
    search_url: String,
    download_base: String,
}

impl MavenCentral {
    pub fn new(cfg: &RegistryConfig) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("evogen/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            search_url: cfg.search_url.clone(),
            download_base: cfg.download_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn search_url(&self, identifier: &str) -> Result<Url, ResolveError> {
        let query = format!("fc:\"{identifier}\"");
        Ok(Url::parse_with_params(
            &self.search_url,
            &[("q", query.as_str()), ("rows", "1"), ("wt", "json")],
        )?)
    }

    pub fn download_url(&self, coords: &Coordinates) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.download_base,
            coords.group.replace('.', "/"),
            coords.artifact,
            coords.version,
            coords.file_name()
        )
    }
}

impl PackageRegistry for MavenCentral {
    fn search(&self, identifier: &str) -> Result<Option<Coordinates>, ResolveError> {
        let url = self.search_url(identifier)?;
        debug!(%url, "registry search");

        let resp = self.client.get(url).send()?;
        if !resp.status().is_success() {
            return Ok(None);
        }

        let body: SearchResponse = resp.json()?;
        Ok(body
            .response
            .and_then(|r| r.docs.into_iter().next()))
    }

    fn download(&self, coords: &Coordinates, dest: &Path) -> Result<(), ResolveError> {
        let url = self.download_url(coords);
        info!(%url, "downloading archive");

        let mut resp = self.client.get(&url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ResolveError::DownloadFailed {
                url,
                status: status.as_u16(),
            });
        }

        let mut file = File::create(dest)?;
        resp.copy_to(&mut file)?;
        file.sync_all()?;
        Ok(())
    }
}

/* ============================================================
   Resolver
   ============================================================ */

pub struct DependencyResolver<R> {
    registry: R,
    cache: Arc<DependencyCache>,
}

impl<R: PackageRegistry> DependencyResolver<R> {
    pub fn new(registry: R, cache: Arc<DependencyCache>) -> Self {
        Self { registry, cache }
    }

    pub fn cache(&self) -> &DependencyCache {
        &self.cache
    }
}

impl<R: PackageRegistry> Resolve for DependencyResolver<R> {
    fn resolve(&self, identifier: &str) -> Result<PathBuf, ResolveError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ResolveError::EmptyIdentifier);
        }

        let coords = self
            .registry
            .search(identifier)?
            .ok_or_else(|| ResolveError::NotFound(identifier.to_string()))?;

        if let Some(hit) = self.cache.lookup(&coords) {
            info!(archive = %hit.display(), "found archive in local cache");
            return Ok(hit);
        }

        self.cache
            .install(&coords, |staging| self.registry.download(&coords, staging))
    }
}
