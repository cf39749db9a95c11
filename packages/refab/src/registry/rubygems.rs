//! RubyGems registry client.

use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::{Error, Result, registry::{HttpClient, PackageInfo}, target::Target};

pub const DEFAULT_REGISTRY: &str = "https://rubygems.org";

#[derive(Clone, Debug, Deserialize)]
pub struct Gem {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub source_code_uri: Option<String>,
    #[serde(default)]
    pub homepage_uri: Option<String>,
    #[serde(default)]
    pub bug_tracker_uri: Option<String>,
}

/// Client for the RubyGems API.
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

    /// Fetch gem metadata (latest published version's document).
    #[instrument(skip(self))]
    pub async fn package(&self, name: &str) -> Result<Gem> {
        let url = format!("{}/api/v1/gems/{name}.json", self.base);
        self.http.get_json(&url).await
    }

    /// The canonical gem URL: `<registry>/gems/<pkg>-<ver>.gem`.
    pub fn release_url(&self, target: &Target) -> Result<Url> {
        let url = format!("{}/gems/{}", self.base, target.artifact);
        Url::parse(&url).map_err(|err| Error::Configuration(format!("bad rubygems url: {err}")))
    }

    pub async fn package_info(&self, name: &str) -> Result<PackageInfo> {
        let gem = self.package(name).await?;
        Ok(PackageInfo {
            name: gem.name,
            repository: gem.source_code_uri,
            homepage: gem.homepage_uri,
            bug_tracker: gem.bug_tracker_uri,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    #[test]
    fn gem_document_decodes() {
        let gem: Gem = serde_json::from_str(
            r#"{
                "name": "rake",
                "version": "13.0.6",
                "source_code_uri": "https://github.com/ruby/rake",
                "homepage_uri": "https://github.com/ruby/rake",
                "bug_tracker_uri": null
            }"#,
        )
        .unwrap();
        pretty_assert_eq!(gem.name, "rake");
        pretty_assert_eq!(
            gem.source_code_uri.as_deref(),
            Some("https://github.com/ruby/rake")
        );
    }
}
