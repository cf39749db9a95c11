//! npm registry client.

use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::{Error, Result, registry::{HttpClient, PackageInfo}, target::Target};

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// npm `repository` fields appear both as bare strings and as objects.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Repository {
    Url(String),
    Object { url: Option<String> },
}

impl Repository {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::Object { url } => url.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Bugs {
    Url(String),
    Object { url: Option<String> },
}

impl Bugs {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::Object { url } => url.as_deref(),
        }
    }
}

/// One published version's metadata document.
#[derive(Clone, Debug, Deserialize)]
pub struct Version {
    pub name: String,
    pub version: String,
    pub repository: Option<Repository>,
    pub homepage: Option<String>,
    pub bugs: Option<Bugs>,
    pub dist: Option<Dist>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Dist {
    pub tarball: String,
    pub shasum: Option<String>,
}

/// Client for the npm registry API.
#[derive(Clone, Debug)]
pub struct Client {
    http: HttpClient,
    base: String,
}

impl Client {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base: DEFAULT_REGISTRY.to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    /// Fetch one version's metadata document.
    #[instrument(skip(self))]
    pub async fn version(&self, package: &str, version: &str) -> Result<Version> {
        let url = format!("{}/{package}/{version}", self.base);
        self.http.get_json(&url).await
    }

    /// The canonical tarball URL: `<registry>/<pkg>/-/<pkg>-<ver>.tgz`.
    pub fn release_url(&self, target: &Target) -> Result<Url> {
        let url = format!("{}/{}/-/{}", self.base, target.package, target.artifact);
        Url::parse(&url).map_err(|err| Error::Configuration(format!("bad npm url: {err}")))
    }

    pub async fn package_info(&self, package: &str, version: &str) -> Result<PackageInfo> {
        let doc = self.version(package, version).await?;
        Ok(PackageInfo {
            name: doc.name,
            repository: doc.repository.as_ref().and_then(Repository::url).map(String::from),
            homepage: doc.homepage,
            bug_tracker: doc.bugs.as_ref().and_then(Bugs::url).map(String::from),
        })
    }
}
