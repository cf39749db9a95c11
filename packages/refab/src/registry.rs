//! Per-ecosystem registry clients.
//!
//! Each supported ecosystem gets a typed client exposing package and
//! version metadata plus artifact download, backed by one shared HTTP
//! client and the scoped in-memory [`cache`]. The [`Registry`]
//! multiplexer dispatches on [`Ecosystem`] and normalizes the fields
//! inference cares about into [`PackageInfo`].

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{instrument, trace};
use url::Url;

use crate::{
    Error, Result,
    target::{Ecosystem, Target},
};

pub mod cache;
pub mod cratesio;
pub mod debian;
pub mod maven;
pub mod npm;
pub mod pypi;
pub mod rubygems;

/// Normalized package metadata: the repository candidates inference scans,
/// in preference order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    /// Explicit source-code URL, the strongest signal.
    pub repository: Option<String>,
    pub homepage: Option<String>,
    pub bug_tracker: Option<String>,
}

impl PackageInfo {
    /// Repository candidates in preference order, skipping empties.
    pub fn repo_candidates(&self) -> impl Iterator<Item = &str> {
        [
            self.repository.as_deref(),
            self.homepage.as_deref(),
            self.bug_tracker.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|candidate| !candidate.is_empty())
    }
}

/// Shared HTTP plumbing for the per-ecosystem clients: one reqwest client
/// plus the scoped response cache.
#[derive(Clone, Debug)]
pub struct HttpClient {
    http: reqwest::Client,
    cache: Arc<cache::ScopedCache>,
}

impl HttpClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: Arc::new(cache::ScopedCache::new()),
        }
    }

    pub fn cache(&self) -> &Arc<cache::ScopedCache> {
        &self.cache
    }

    /// GET a URL, serving repeats from the scoped cache.
    #[instrument(skip(self))]
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(bytes) = self.cache.get(url) {
            trace!(len = bytes.len(), "registry cache hit");
            return Ok(bytes);
        }
        let response = self.http.get(url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await?.to_vec();
                self.cache.put(url, bytes.clone());
                Ok(bytes)
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound(url.to_string())),
            status => Err(Error::Http {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// GET a URL and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bytes = self.get_bytes(url).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// The registry multiplexer: typed per-ecosystem clients behind one
/// dispatcher.
#[derive(Clone, Debug)]
pub struct Registry {
    pub npm: npm::Client,
    pub pypi: pypi::Client,
    pub cratesio: cratesio::Client,
    pub maven: maven::Client,
    pub debian: debian::Client,
    pub rubygems: rubygems::Client,
    http: HttpClient,
}

impl Registry {
    pub fn new() -> Self {
        let http = HttpClient::new();
        Self {
            npm: npm::Client::new(http.clone()),
            pypi: pypi::Client::new(http.clone()),
            cratesio: cratesio::Client::new(http.clone()),
            maven: maven::Client::new(http.clone()),
            debian: debian::Client::new(http.clone()),
            rubygems: rubygems::Client::new(http.clone()),
            http,
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// The canonical published URL for a target's artifact.
    pub fn release_url(&self, target: &Target) -> Result<Url> {
        match target.ecosystem {
            Ecosystem::Npm => self.npm.release_url(target),
            Ecosystem::Pypi => self.pypi.release_url(target),
            Ecosystem::CratesIo => self.cratesio.release_url(target),
            Ecosystem::Maven => self.maven.release_url(target),
            Ecosystem::Debian => self.debian.release_url(target),
            Ecosystem::RubyGems => self.rubygems.release_url(target),
            Ecosystem::Go => Err(Error::UnsupportedEcosystem("go".to_string())),
        }
    }

    /// Download the target's published artifact bytes.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn artifact_bytes(&self, target: &Target) -> Result<Vec<u8>> {
        // pypi artifacts live at per-file hashed URLs; resolve via the
        // release file list rather than a constructed path.
        if target.ecosystem == Ecosystem::Pypi {
            return self.pypi.artifact_bytes(target).await;
        }
        let url = self.release_url(target)?;
        self.http.get_bytes(url.as_str()).await
    }

    /// Normalized package metadata for inference.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn package_info(&self, target: &Target) -> Result<PackageInfo> {
        match target.ecosystem {
            Ecosystem::Npm => self.npm.package_info(&target.package, &target.version).await,
            Ecosystem::Pypi => self.pypi.package_info(&target.package, &target.version).await,
            Ecosystem::CratesIo => self.cratesio.package_info(&target.package).await,
            Ecosystem::Maven => self.maven.package_info(&target.package, &target.version).await,
            Ecosystem::Debian => self.debian.package_info(&target.package).await,
            Ecosystem::RubyGems => self.rubygems.package_info(&target.package).await,
            Ecosystem::Go => Err(Error::UnsupportedEcosystem("go".to_string())),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
