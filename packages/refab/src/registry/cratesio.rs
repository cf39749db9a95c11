//! crates.io registry client.

use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::{Error, Result, registry::{HttpClient, PackageInfo}, target::Target};

pub const DEFAULT_API: &str = "https://crates.io";
pub const DEFAULT_STATIC: &str = "https://static.crates.io";

#[derive(Clone, Debug, Deserialize)]
pub struct CrateResponse {
    #[serde(rename = "crate")]
    pub krate: Crate,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Crate {
    pub name: String,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VersionResponse {
    pub version: VersionRecord,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VersionRecord {
    pub num: String,
    #[serde(default)]
    pub dl_path: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub rust_version: Option<String>,
}

/// Client for the crates.io API and static download host.
#[derive(Clone, Debug)]
pub struct Client {
    http: HttpClient,
    api: String,
    statics: String,
}

impl Client {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            api: DEFAULT_API.to_string(),
            statics: DEFAULT_STATIC.to_string(),
        }
    }

    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self
    }

    /// Fetch top-level crate metadata.
    #[instrument(skip(self))]
    pub async fn package(&self, name: &str) -> Result<Crate> {
        let url = format!("{}/api/v1/crates/{name}", self.api);
        let response: CrateResponse = self.http.get_json(&url).await?;
        Ok(response.krate)
    }

    /// Fetch one version's metadata.
    #[instrument(skip(self))]
    pub async fn version(&self, name: &str, version: &str) -> Result<VersionRecord> {
        let url = format!("{}/api/v1/crates/{name}/{version}", self.api);
        let response: VersionResponse = self.http.get_json(&url).await?;
        Ok(response.version)
    }

    /// The canonical crate file URL:
    /// `<registry>/crates/<pkg>/<pkg>-<ver>.crate`.
    pub fn release_url(&self, target: &Target) -> Result<Url> {
        let url = format!(
            "{}/crates/{}/{}",
            self.statics, target.package, target.artifact
        );
        Url::parse(&url).map_err(|err| Error::Configuration(format!("bad crates url: {err}")))
    }

    pub async fn package_info(&self, name: &str) -> Result<PackageInfo> {
        let krate = self.package(name).await?;
        Ok(PackageInfo {
            name: krate.name,
            repository: krate.repository,
            homepage: krate.homepage,
            bug_tracker: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    #[test]
    fn crate_response_decodes() {
        let response: CrateResponse = serde_json::from_str(
            r#"{
                "crate": {
                    "name": "bytes",
                    "repository": "https://github.com/tokio-rs/bytes",
                    "homepage": null,
                    "documentation": "https://docs.rs/bytes"
                }
            }"#,
        )
        .unwrap();
        pretty_assert_eq!(response.krate.name, "bytes");
        pretty_assert_eq!(
            response.krate.repository.as_deref(),
            Some("https://github.com/tokio-rs/bytes")
        );
    }

    #[test]
    fn version_response_decodes() {
        let response: VersionResponse = serde_json::from_str(
            r#"{
                "version": {
                    "num": "1.0.0",
                    "dl_path": "/api/v1/crates/bytes/1.0.0/download",
                    "checksum": "ad7c7af8a9a8d0fd4aae93aafa80c2bc65434a07ea0e7026aff2cbdf3cc6cfd8"
                }
            }"#,
        )
        .unwrap();
        pretty_assert_eq!(response.version.num, "1.0.0");
    }
}
