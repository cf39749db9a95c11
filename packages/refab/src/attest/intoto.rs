//! in-toto v1 statement and SLSA v1 provenance types.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::DigestSet;

/// in-toto v1 statement type.
pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v1";
/// SLSA provenance v1 predicate type.
pub const SLSA_PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v1";
/// Build type for the rebuild statement.
pub const BUILD_TYPE_REBUILD: &str = "https://docs.oss-rebuild.dev/builds/Rebuild@v0.1";
/// Build type for the artifact equivalence statement.
pub const BUILD_TYPE_EQUIVALENCE: &str =
    "https://docs.oss-rebuild.dev/builds/ArtifactEquivalence@v0.1";
/// DSSE payload type for in-toto statements.
pub const PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// An in-toto v1 statement with a SLSA provenance predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: String,
    pub subject: Vec<ResourceDescriptor>,
    pub predicate_type: String,
    pub predicate: Predicate,
}

impl Statement {
    pub fn new(subject: Vec<ResourceDescriptor>, predicate: Predicate) -> Self {
        Self {
            statement_type: STATEMENT_TYPE.to_string(),
            subject,
            predicate_type: SLSA_PREDICATE_TYPE.to_string(),
            predicate,
        }
    }
}

/// A named, addressable resource with digests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "DigestSet::is_empty")]
    pub digest: DigestSet,
}

impl ResourceDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_digest(mut self, digest: DigestSet) -> Self {
        self.digest = digest;
        self
    }
}

/// SLSA provenance v1 predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub build_definition: BuildDefinition,
    pub run_details: RunDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    pub build_type: String,
    pub external_parameters: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub internal_parameters: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolved_dependencies: Vec<ResourceDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub builder: Builder,
    pub metadata: BuildMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub byproducts: Vec<ResourceDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Builder {
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_on: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn statement_wire_format() {
        let statement = Statement::new(
            vec![
                ResourceDescriptor::named("bytes-1.0.0.crate").with_digest(
                    [("sha256".to_string(), "cafe".to_string())].into_iter().collect(),
                ),
            ],
            Predicate {
                build_definition: BuildDefinition {
                    build_type: BUILD_TYPE_REBUILD.to_string(),
                    external_parameters: json!({"package": "bytes"}),
                    internal_parameters: Value::Null,
                    resolved_dependencies: vec![
                        ResourceDescriptor::named("source")
                            .with_uri("git+http://github.com/foo/bar"),
                    ],
                },
                run_details: RunDetails {
                    builder: Builder {
                        id: "https://builder.example/v1".to_string(),
                    },
                    metadata: BuildMetadata {
                        invocation_id: Some("build-1".to_string()),
                        ..Default::default()
                    },
                    byproducts: Vec::new(),
                },
            },
        );

        let value = serde_json::to_value(&statement).unwrap();
        pretty_assert_eq!(value["_type"], "https://in-toto.io/Statement/v1");
        pretty_assert_eq!(value["predicateType"], "https://slsa.dev/provenance/v1");
        pretty_assert_eq!(
            value["predicate"]["buildDefinition"]["buildType"],
            BUILD_TYPE_REBUILD
        );
        pretty_assert_eq!(
            value["predicate"]["runDetails"]["metadata"]["invocationId"],
            "build-1"
        );
        pretty_assert_eq!(value["subject"][0]["digest"]["sha256"], "cafe");

        let decoded: Statement = serde_json::from_value(value).unwrap();
        pretty_assert_eq!(decoded, statement);
    }
}
