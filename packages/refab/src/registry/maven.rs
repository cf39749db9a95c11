//! Maven Central registry client.
//!
//! Maven coordinates are `group:artifact`; artifact files live under
//! `<repo>/<group-slashed>/<artifact>/<version>/`.

use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::{Error, Result, registry::{HttpClient, PackageInfo}, target::Target};

pub const DEFAULT_REPOSITORY: &str = "https://repo1.maven.org/maven2";

/// The subset of a POM the pipeline reads.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pom {
    pub url: Option<String>,
    pub scm: Option<Scm>,
    pub issue_management: Option<IssueManagement>,
    pub version: Option<String>,
    pub artifact_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Scm {
    pub url: Option<String>,
    pub connection: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssueManagement {
    pub url: Option<String>,
}

/// Split a `group:artifact` coordinate.
pub fn split_coordinate(package: &str) -> Result<(&str, &str)> {
    package.split_once(':').ok_or_else(|| {
        Error::Configuration(format!("maven package must be group:artifact, got {package:?}"))
    })
}

/// Client for a Maven repository.
#[derive(Clone, Debug)]
pub struct Client {
    http: HttpClient,
    base: String,
}

impl Client {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base: DEFAULT_REPOSITORY.to_string(),
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    fn version_dir(&self, package: &str, version: &str) -> Result<String> {
        let (group, artifact_id) = split_coordinate(package)?;
        Ok(format!(
            "{}/{}/{artifact_id}/{version}",
            self.base,
            group.replace('.', "/")
        ))
    }

    /// The canonical artifact URL:
    /// `<repo>/<group-slashed>/<artifact>/<ver>/<file>`.
    pub fn release_url(&self, target: &Target) -> Result<Url> {
        let dir = self.version_dir(&target.package, &target.version)?;
        let url = format!("{dir}/{}", target.artifact);
        Url::parse(&url).map_err(|err| Error::Configuration(format!("bad maven url: {err}")))
    }

    /// Fetch and decode the version's POM.
    #[instrument(skip(self))]
    pub async fn pom(&self, package: &str, version: &str) -> Result<Pom> {
        let (_, artifact_id) = split_coordinate(package)?;
        let dir = self.version_dir(package, version)?;
        let url = format!("{dir}/{artifact_id}-{version}.pom");
        let bytes = self.http.get_bytes(&url).await?;
        quick_xml::de::from_reader(bytes.as_slice())
            .map_err(|err| Error::Configuration(format!("bad pom for {package}: {err}")))
    }

    /// Download a classified companion artifact, e.g. the `sources` JAR.
    #[instrument(skip(self))]
    pub async fn classified_bytes(
        &self,
        package: &str,
        version: &str,
        classifier: &str,
        extension: &str,
    ) -> Result<Vec<u8>> {
        let (_, artifact_id) = split_coordinate(package)?;
        let dir = self.version_dir(package, version)?;
        let url = format!("{dir}/{artifact_id}-{version}-{classifier}.{extension}");
        self.http.get_bytes(&url).await
    }

    pub async fn package_info(&self, package: &str, version: &str) -> Result<PackageInfo> {
        let pom = self.pom(package, version).await?;
        Ok(PackageInfo {
            name: package.to_string(),
            repository: pom.scm.as_ref().and_then(|scm| {
                scm.url
                    .clone()
                    .or_else(|| scm.connection.clone().map(strip_scm_prefix))
            }),
            homepage: pom.url,
            bug_tracker: pom.issue_management.and_then(|issues| issues.url),
        })
    }
}

/// Drop the `scm:git:` style prefix from an SCM connection string.
fn strip_scm_prefix(connection: String) -> String {
    let mut rest = connection.as_str();
    while let Some(stripped) = rest.strip_prefix("scm:") {
        rest = stripped;
    }
    if let Some(stripped) = rest.strip_prefix("git:") {
        rest = stripped;
    }
    rest.to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;

    #[test]
    fn pom_decodes_scm_and_issue_management() {
        let pom: Pom = quick_xml::de::from_str(
            r#"<project>
                <url>https://example.com/foo</url>
                <scm>
                    <url>https://github.com/example/foo</url>
                    <connection>scm:git:https://github.com/example/foo.git</connection>
                </scm>
                <issueManagement>
                    <url>https://github.com/example/foo/issues</url>
                </issueManagement>
                <version>2.1</version>
            </project>"#,
        )
        .unwrap();
        pretty_assert_eq!(pom.url.as_deref(), Some("https://example.com/foo"));
        pretty_assert_eq!(
            pom.scm.unwrap().url.as_deref(),
            Some("https://github.com/example/foo")
        );
        pretty_assert_eq!(
            pom.issue_management.unwrap().url.as_deref(),
            Some("https://github.com/example/foo/issues")
        );
    }

    #[test]
    fn scm_connection_prefix_is_stripped() {
        pretty_assert_eq!(
            strip_scm_prefix("scm:git:https://github.com/example/foo.git".to_string()),
            "https://github.com/example/foo.git"
        );
    }

    #[test]
    fn coordinate_requires_group_and_artifact() {
        assert!(split_coordinate("com.example:foo").is_ok());
        assert!(split_coordinate("noseparator").is_err());
    }
}
