//! Rebuild targets and their identifier encodings.
//!
//! A [`Target`] names exactly one published artifact:
//! `(ecosystem, package, version, artifact)`. Package and artifact follow
//! ecosystem-native identifier rules, which means some of them carry
//! characters (`/` in npm scopes, `:` in Maven coordinates) that storage
//! backends cannot accept verbatim. [`TargetEncoding`] provides the
//! reversible re-encodings used for asset paths and document keys.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumIter, EnumString};

use crate::{Error, Result};

/// Package ecosystems the pipeline understands.
///
/// `go` is declared for wire compatibility but has no registry support;
/// operations on it fail with [`Error::UnsupportedEcosystem`].
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    StrumDisplay,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Pypi,
    #[strum(serialize = "cratesio")]
    CratesIo,
    Maven,
    Debian,
    Go,
    #[strum(serialize = "rubygems")]
    RubyGems,
}

impl Ecosystem {
    /// The default artifact name for a package version, used when the
    /// caller omits the artifact.
    ///
    /// Returns `None` for ecosystems where the artifact name is not
    /// derivable from the package and version alone (debian, go; pypi
    /// sdists vs. wheels are resolved against the release file list by
    /// the registry client instead).
    pub fn default_artifact(&self, package: &str, version: &str) -> Option<String> {
        match self {
            Self::Npm => {
                // Scoped packages publish tarballs named after the bare
                // package name: @scope/name -> name-1.0.0.tgz
                let bare = package.rsplit('/').next().unwrap_or(package);
                Some(format!("{bare}-{version}.tgz"))
            }
            Self::Pypi => {
                let normalized = package.replace('-', "_");
                Some(format!("{normalized}-{version}-py3-none-any.whl"))
            }
            Self::CratesIo => Some(format!("{package}-{version}.crate")),
            Self::Maven => {
                let artifact_id = package.rsplit(':').next().unwrap_or(package);
                Some(format!("{artifact_id}-{version}.jar"))
            }
            Self::RubyGems => Some(format!("{package}-{version}.gem")),
            Self::Debian | Self::Go => None,
        }
    }
}

/// One published artifact: the subject of a rebuild attempt and of the
/// resulting attestations.
///
/// Targets are immutable; equality is structural and the 4-tuple uniquely
/// names an attestation's subject.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize)]
#[display("{ecosystem}/{package}@{version} ({artifact})")]
pub struct Target {
    pub ecosystem: Ecosystem,
    pub package: String,
    pub version: String,
    pub artifact: String,
}

impl Target {
    /// Create a target with an explicit artifact name.
    pub fn new(
        ecosystem: Ecosystem,
        package: impl Into<String>,
        version: impl Into<String>,
        artifact: impl Into<String>,
    ) -> Self {
        Self {
            ecosystem,
            package: package.into(),
            version: version.into(),
            artifact: artifact.into(),
        }
    }

    /// Create a target, inferring the artifact name per ecosystem.
    pub fn with_default_artifact(
        ecosystem: Ecosystem,
        package: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self> {
        let package = package.into();
        let version = version.into();
        let artifact = ecosystem
            .default_artifact(&package, &version)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "artifact name must be given explicitly for {ecosystem}"
                ))
            })?;
        Ok(Self {
            ecosystem,
            package,
            version,
            artifact,
        })
    }
}

/// Reversible encodings for ecosystem-native identifiers.
///
/// The filesystem encoding folds both `/` and `:` to `~`; decoding picks
/// the original separator from the ecosystem (npm packages contain `/`,
/// Maven coordinates contain `:`, no ecosystem uses both). The document
/// encoding keeps `:` folding but maps `/` to `!` since some document
/// stores treat `~` specially in key paths.
#[derive(Copy, Clone, Eq, PartialEq, Debug, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum TargetEncoding {
    Filesystem,
    Document,
}

impl TargetEncoding {
    /// Encode a package identifier for this backend.
    pub fn encode(&self, package: &str) -> String {
        match self {
            Self::Filesystem => package.replace(['/', ':'], "~"),
            Self::Document => package.replace('/', "!").replace(':', "~"),
        }
    }

    /// Decode an encoded package identifier back to its ecosystem-native
    /// form.
    pub fn decode(&self, ecosystem: Ecosystem, encoded: &str) -> String {
        let native_separator = match ecosystem {
            Ecosystem::Maven => ':',
            _ => '/',
        };
        match self {
            Self::Filesystem => encoded.replace('~', &native_separator.to_string()),
            Self::Document => encoded
                .replace('!', "/")
                .replace('~', &native_separator.to_string()),
        }
    }

    /// Characters this backend cannot accept in a single path component.
    pub fn forbidden(&self) -> &'static [char] {
        match self {
            Self::Filesystem => &['/'],
            Self::Document => &['/'],
        }
    }
}
