//! PyPI registry client.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::{Error, Result, registry::{HttpClient, PackageInfo}, target::Target};

pub const DEFAULT_REGISTRY: &str = "https://pypi.org";

#[derive(Clone, Debug, Deserialize)]
pub struct Project {
    pub info: Info,
    /// Files published for the queried release.
    #[serde(default)]
    pub urls: Vec<ReleaseFile>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Info {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub home_page: Option<String>,
    /// Free-form label -> URL map; source and tracker links usually live
    /// here rather than in `home_page`.
    #[serde(default)]
    pub project_urls: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReleaseFile {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub digests: BTreeMap<String, String>,
}

/// Client for the PyPI JSON API.
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

    /// Fetch release metadata for one version.
    #[instrument(skip(self))]
    pub async fn release(&self, package: &str, version: &str) -> Result<Project> {
        let url = format!("{}/pypi/{package}/{version}/json", self.base);
        self.http.get_json(&url).await
    }

    /// Resolve the published file matching the target's artifact name.
    pub async fn release_file(&self, target: &Target) -> Result<ReleaseFile> {
        let project = self.release(&target.package, &target.version).await?;
        project
            .urls
            .into_iter()
            .find(|file| file.filename == target.artifact)
            .ok_or_else(|| Error::NotFound(format!("pypi file {}", target.artifact)))
    }

    /// The canonical URL for a release file. PyPI file URLs are hashed
    /// per-file, so this resolves through the release file list.
    pub fn release_url(&self, target: &Target) -> Result<Url> {
        // Sync callers only need a nominal URL; the hashed per-file URL is
        // resolved by `release_file` when downloading.
        let url = format!(
            "{}/project/{}/{}/#files/{}",
            self.base, target.package, target.version, target.artifact
        );
        Url::parse(&url).map_err(|err| Error::Configuration(format!("bad pypi url: {err}")))
    }

    /// Download the artifact via its resolved per-file URL.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn artifact_bytes(&self, target: &Target) -> Result<Vec<u8>> {
        let file = self.release_file(target).await?;
        self.http.get_bytes(&file.url).await
    }

    pub async fn package_info(&self, package: &str, version: &str) -> Result<PackageInfo> {
        let project = self.release(package, version).await?;
        let urls = project.info.project_urls.unwrap_or_default();
        let find = |keys: &[&str]| -> Option<String> {
            urls.iter()
                .find(|(label, _)| {
                    let label = label.to_ascii_lowercase();
                    keys.iter().any(|key| label.contains(key))
                })
                .map(|(_, url)| url.clone())
        };
        Ok(PackageInfo {
            name: project.info.name,
            repository: find(&["source", "repository", "code"]),
            homepage: project
                .info
                .home_page
                .filter(|page| !page.is_empty())
                .or_else(|| find(&["homepage"])),
            bug_tracker: find(&["tracker", "issues", "bug"]),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    #[test]
    fn project_document_decodes() {
        let project: Project = serde_json::from_str(
            r#"{
                "info": {
                    "name": "sampleproject",
                    "version": "1.2.0",
                    "home_page": "",
                    "project_urls": {
                        "Source": "https://github.com/pypa/sampleproject",
                        "Bug Tracker": "https://github.com/pypa/sampleproject/issues"
                    }
                },
                "urls": [
                    {
                        "filename": "sampleproject-1.2.0-py2.py3-none-any.whl",
                        "url": "https://files.pythonhosted.org/packages/ab/cd/sampleproject-1.2.0-py2.py3-none-any.whl",
                        "digests": {"sha256": "deadbeef"}
                    }
                ]
            }"#,
        )
        .unwrap();
        pretty_assert_eq!(project.info.name, "sampleproject");
        pretty_assert_eq!(project.urls.len(), 1);
    }

    #[test]
    fn project_urls_drive_package_info_fields() {
        let urls: BTreeMap<String, String> = [
            ("Source".to_string(), "https://github.com/pypa/sampleproject".to_string()),
            ("Bug Tracker".to_string(), "https://github.com/pypa/sampleproject/issues".to_string()),
        ]
        .into_iter()
        .collect();
        let info = Info {
            name: "sampleproject".to_string(),
            version: "1.2.0".to_string(),
            home_page: Some(String::new()),
            project_urls: Some(urls),
        };
        // Field selection logic is exercised through package_info in
        // integration; here we pin the label matching contract.
        let label_matches = info
            .project_urls
            .unwrap()
            .into_iter()
            .filter(|(label, _)| label.to_ascii_lowercase().contains("source"))
            .count();
        pretty_assert_eq!(label_matches, 1);
    }
}
