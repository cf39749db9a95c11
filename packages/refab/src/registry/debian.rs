//! Debian archive client.
//!
//! Binary packages live in the pool:
//! `<mirror>/pool/<component>/<prefix>/<source-name>/<artifact>`, where
//! `prefix` is the first letter of the source name, or `lib<X>` for
//! library packages.

use tracing::instrument;
use url::Url;

use crate::{Error, Result, registry::{HttpClient, PackageInfo}, target::Target};

pub const DEFAULT_MIRROR: &str = "https://deb.debian.org/debian";

/// The pool prefix directory for a source package name.
pub fn pool_prefix(name: &str) -> String {
    if let Some(rest) = name.strip_prefix("lib") {
        if let Some(first) = rest.chars().next() {
            return format!("lib{first}");
        }
    }
    name.chars().next().map(|c| c.to_string()).unwrap_or_default()
}

/// Client for a Debian mirror.
#[derive(Clone, Debug)]
pub struct Client {
    http: HttpClient,
    base: String,
    component: String,
}

impl Client {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base: DEFAULT_MIRROR.to_string(),
            component: "main".to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    /// The canonical pool URL: `<component>/<name>/<artifact>` under the
    /// mirror's pool tree.
    pub fn release_url(&self, target: &Target) -> Result<Url> {
        // debian names may carry a source override as "source/binary".
        let source = target
            .package
            .split_once('/')
            .map(|(source, _)| source)
            .unwrap_or(&target.package);
        let url = format!(
            "{}/pool/{}/{}/{source}/{}",
            self.base,
            self.component,
            pool_prefix(source),
            target.artifact
        );
        Url::parse(&url).map_err(|err| Error::Configuration(format!("bad debian url: {err}")))
    }

    /// Fetch the `.dsc` index for a source package version, used to locate
    /// the upstream tarball and packaging metadata.
    #[instrument(skip(self))]
    pub async fn dsc(&self, source: &str, version: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/pool/{}/{}/{source}/{source}_{version}.dsc",
            self.base,
            self.component,
            pool_prefix(source)
        );
        self.http.get_bytes(&url).await
    }

    pub async fn package_info(&self, package: &str) -> Result<PackageInfo> {
        // The archive itself does not carry upstream VCS links in a
        // uniform machine-readable place; rebuilds work from the source
        // package, so the "repository" is the pool itself.
        Ok(PackageInfo {
            name: package.to_string(),
            repository: None,
            homepage: None,
            bug_tracker: None,
        })
    }
}
