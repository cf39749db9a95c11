//! Attestation assembly, signing, and publication.
//!
//! A successful rebuild yields exactly two statements:
//!
//! 1. `ArtifactEquivalence@v0.1` — the upstream artifact is the subject;
//!    the rebuilt and upstream artifacts are resolved dependencies; the
//!    stabilized digest is a byproduct.
//! 2. `Rebuild@v0.1` — the rebuilt artifact is the subject; external
//!    parameters carry the target tuple; resolved dependencies list the
//!    git source first, then each builder image, then the manual build
//!    definition when one was used; byproducts are `build.json`, the
//!    `Dockerfile`, and `steps.json`.
//!
//! Statements are signed into DSSE envelopes and published as
//! newline-delimited JSON under the target's `AttestationBundle` asset,
//! equivalence first.

use clients::executor::v1::BuildReport;
use serde_json::json;
use sha2::{Digest as _, Sha256};
use tracing::{debug, instrument};

use crate::{
    Error, Result,
    assets::{Asset, AssetKind, AssetStore},
    hash::DigestSet,
    strategy::Location,
    target::Target,
    verify::ArtifactSummary,
};

pub mod dsse;
pub mod intoto;

use dsse::{Envelope, EnvelopeVerifier, Signer};
use intoto::{
    BUILD_TYPE_EQUIVALENCE, BUILD_TYPE_REBUILD, BuildDefinition, BuildMetadata, Builder,
    PAYLOAD_TYPE, Predicate, ResourceDescriptor, RunDetails, Statement,
};

/// sha256 digest set for a blob of attestation metadata.
pub fn digest_of(bytes: &[u8]) -> DigestSet {
    [("sha256".to_string(), hex::encode(Sha256::digest(bytes)))]
        .into_iter()
        .collect()
}

/// Everything the two statements are assembled from.
pub struct AttestationInputs<'a> {
    pub target: &'a Target,
    pub rebuild: &'a ArtifactSummary,
    pub upstream: &'a ArtifactSummary,
    pub location: &'a Location,
    pub report: &'a BuildReport,
    pub dockerfile: &'a str,
    pub build_info_json: &'a [u8],
    pub steps_json: &'a [u8],
    /// Present when a manual build definition drove this rebuild.
    pub build_def: Option<ResourceDescriptor>,
}

impl AttestationInputs<'_> {
    fn external_parameters(&self) -> serde_json::Value {
        json!({
            "ecosystem": self.target.ecosystem.to_string(),
            "package": self.target.package,
            "version": self.target.version,
            "artifact": self.target.artifact,
        })
    }

    fn metadata(&self) -> BuildMetadata {
        BuildMetadata {
            invocation_id: Some(self.report.build_id.to_string()),
            started_on: Some(self.report.started_at),
            finished_on: Some(self.report.finished_at),
        }
    }
}

/// The `ArtifactEquivalence@v0.1` statement.
pub fn equivalence_statement(inputs: &AttestationInputs<'_>) -> Statement {
    let subject = ResourceDescriptor::named(inputs.target.artifact.clone())
        .with_uri(inputs.upstream.uri.clone())
        .with_digest(inputs.upstream.hash.clone());
    Statement::new(
        vec![subject],
        Predicate {
            build_definition: BuildDefinition {
                build_type: BUILD_TYPE_EQUIVALENCE.to_string(),
                external_parameters: inputs.external_parameters(),
                internal_parameters: serde_json::Value::Null,
                resolved_dependencies: vec![
                    ResourceDescriptor::named("rebuild")
                        .with_uri(inputs.rebuild.uri.clone())
                        .with_digest(inputs.rebuild.hash.clone()),
                    ResourceDescriptor::named("upstream")
                        .with_uri(inputs.upstream.uri.clone())
                        .with_digest(inputs.upstream.hash.clone()),
                ],
            },
            run_details: RunDetails {
                builder: Builder {
                    id: inputs.report.builder_id.clone(),
                },
                metadata: inputs.metadata(),
                byproducts: vec![
                    ResourceDescriptor::named("stabilized")
                        .with_digest(inputs.rebuild.stabilized_hash.clone()),
                ],
            },
        },
    )
}

/// The `Rebuild@v0.1` statement.
pub fn rebuild_statement(inputs: &AttestationInputs<'_>) -> Statement {
    let subject = ResourceDescriptor::named(inputs.target.artifact.clone())
        .with_uri(inputs.rebuild.uri.clone())
        .with_digest(inputs.rebuild.hash.clone());

    let ref_digest_key = if inputs.location.git_ref.len() == 64 {
        "sha256"
    } else {
        "sha1"
    };
    let mut resolved = vec![
        ResourceDescriptor::named("source")
            .with_uri(format!("git+{}", inputs.location.repo))
            .with_digest(
                [(ref_digest_key.to_string(), inputs.location.git_ref.clone())]
                    .into_iter()
                    .collect(),
            ),
    ];
    for step in &inputs.report.steps {
        let digest = step
            .digest
            .split_once(':')
            .map(|(algorithm, value)| (algorithm.to_string(), value.to_string()))
            .unwrap_or_else(|| ("sha256".to_string(), step.digest.clone()));
        resolved.push(
            ResourceDescriptor::named(step.image.clone())
                .with_uri(step.image.clone())
                .with_digest([digest].into_iter().collect()),
        );
    }
    if let Some(build_def) = &inputs.build_def {
        resolved.push(build_def.clone());
    }

    let mut external_parameters = inputs.external_parameters();
    if let Some(build_def) = &inputs.build_def {
        if let Some(uri) = &build_def.uri {
            external_parameters["buildConfigSource"] = json!(uri);
        }
    }

    Statement::new(
        vec![subject],
        Predicate {
            build_definition: BuildDefinition {
                build_type: BUILD_TYPE_REBUILD.to_string(),
                external_parameters,
                internal_parameters: serde_json::Value::Null,
                resolved_dependencies: resolved,
            },
            run_details: RunDetails {
                builder: Builder {
                    id: inputs.report.builder_id.clone(),
                },
                metadata: inputs.metadata(),
                byproducts: vec![
                    ResourceDescriptor::named("build.json")
                        .with_digest(digest_of(inputs.build_info_json)),
                    ResourceDescriptor::named("Dockerfile")
                        .with_digest(digest_of(inputs.dockerfile.as_bytes())),
                    ResourceDescriptor::named("steps.json")
                        .with_digest(digest_of(inputs.steps_json)),
                ],
            },
        },
    )
}

/// An ordered sequence of DSSE envelopes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bundle(pub Vec<Envelope>);

impl Bundle {
    /// Sign statements into a bundle, preserving order.
    pub fn sign(signer: &dyn Signer, statements: &[Statement]) -> Result<Self> {
        let mut envelopes = Vec::with_capacity(statements.len());
        for statement in statements {
            let payload = serde_json::to_vec(statement)?;
            envelopes.push(dsse::sign_envelope(signer, PAYLOAD_TYPE, &payload)?);
        }
        Ok(Self(envelopes))
    }

    /// Encode as newline-delimited JSON, one envelope per line.
    pub fn to_ndjson(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for envelope in &self.0 {
            serde_json::to_writer(&mut out, envelope)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    /// Decode from newline-delimited JSON.
    pub fn from_ndjson(bytes: &[u8]) -> Result<Self> {
        let mut envelopes = Vec::new();
        for line in bytes.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            envelopes.push(serde_json::from_slice(line)?);
        }
        Ok(Self(envelopes))
    }

    /// Decode every payload as an in-toto statement, verifying signatures
    /// first when a verifier is given.
    pub fn statements(&self, verifier: Option<&EnvelopeVerifier>) -> Result<Vec<Statement>> {
        let mut statements = Vec::with_capacity(self.0.len());
        for envelope in &self.0 {
            if let Some(verifier) = verifier {
                verifier.verify(envelope)?;
            }
            statements.push(serde_json::from_slice(&envelope.payload_bytes()?)?);
        }
        Ok(statements)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Write the bundle as the target's `AttestationBundle` asset.
///
/// The bundle path is single-writer: an existing bundle fails with
/// [`Error::BundleExists`] unless `overwrite` is set.
#[instrument(skip(store, bundle), fields(target = %target))]
pub async fn publish(
    store: &dyn AssetStore,
    target: &Target,
    bundle: &Bundle,
    overwrite: bool,
) -> Result<()> {
    let asset = Asset::new(AssetKind::AttestationBundle, target.clone());
    if !overwrite && store.exists(&asset).await? {
        return Err(Error::BundleExists);
    }
    let bytes = bundle.to_ndjson()?;
    store.write_bytes(&asset, bytes).await?;
    debug!(envelopes = bundle.len(), "published attestation bundle");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clients::executor::v1::{BuildStatus, StepImage};
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::{assets::MemoryStore, target::Ecosystem};

    fn summary(uri: &str, digest: &str, stabilized: &str) -> ArtifactSummary {
        ArtifactSummary {
            uri: uri.to_string(),
            hash: [("sha256".to_string(), digest.to_string())].into_iter().collect(),
            stabilized_hash: [("sha256".to_string(), stabilized.to_string())]
                .into_iter()
                .collect(),
        }
    }

    fn target() -> Target {
        Target::new(Ecosystem::CratesIo, "bytes", "1.0.0", "bytes-1.0.0.crate")
    }

    fn report() -> BuildReport {
        BuildReport::builder()
            .build_id(Uuid::nil())
            .status(BuildStatus::Success)
            .builder_id("https://builder.example/v1")
            .started_at("2021-01-01T00:00:00Z".parse().unwrap())
            .finished_at("2021-01-01T00:05:00Z".parse().unwrap())
            .steps(vec![
                StepImage::builder()
                    .image("docker.io/library/alpine:3.19")
                    .digest("sha256:feedface")
                    .build(),
            ])
            .build()
    }

    fn inputs<'a>(
        target: &'a Target,
        rebuild: &'a ArtifactSummary,
        upstream: &'a ArtifactSummary,
        location: &'a Location,
        report: &'a BuildReport,
    ) -> AttestationInputs<'a> {
        AttestationInputs {
            target,
            rebuild,
            upstream,
            location,
            report,
            dockerfile: "FROM alpine:3.19",
            build_info_json: b"{\"build\":true}",
            steps_json: b"[]",
            build_def: None,
        }
    }

    #[test]
    fn rebuild_statement_layout() {
        let target = target();
        let rebuild = summary("gs://run/rebuild", "aaaa", "cccc");
        let upstream = summary("https://static.crates.io/crates/bytes/bytes-1.0.0.crate", "bbbb", "cccc");
        let location = Location {
            repo: "http://github.com/foo/bar".to_string(),
            git_ref: "0123456789abcdef0123456789abcdef01234567".to_string(),
            dir: String::new(),
        };
        let report = report();
        let statement =
            rebuild_statement(&inputs(&target, &rebuild, &upstream, &location, &report));

        let value = serde_json::to_value(&statement).unwrap();
        pretty_assert_eq!(value["subject"][0]["digest"]["sha256"], "aaaa");
        pretty_assert_eq!(
            value["predicate"]["buildDefinition"]["externalParameters"],
            serde_json::json!({
                "ecosystem": "cratesio",
                "package": "bytes",
                "version": "1.0.0",
                "artifact": "bytes-1.0.0.crate",
            })
        );
        let deps = &value["predicate"]["buildDefinition"]["resolvedDependencies"];
        // Ordering: git source first, then builder images.
        pretty_assert_eq!(deps[0]["uri"], "git+http://github.com/foo/bar");
        pretty_assert_eq!(
            deps[0]["digest"]["sha1"],
            "0123456789abcdef0123456789abcdef01234567"
        );
        pretty_assert_eq!(deps[1]["digest"]["sha256"], "feedface");
        let byproducts = &value["predicate"]["runDetails"]["byproducts"];
        pretty_assert_eq!(byproducts[0]["name"], "build.json");
        pretty_assert_eq!(byproducts[1]["name"], "Dockerfile");
        pretty_assert_eq!(byproducts[2]["name"], "steps.json");
        pretty_assert_eq!(
            value["predicate"]["runDetails"]["metadata"]["invocationId"],
            Uuid::nil().to_string()
        );
    }

    #[test]
    fn equivalence_statement_layout() {
        let target = target();
        let rebuild = summary("gs://run/rebuild", "aaaa", "cccc");
        let upstream = summary("https://upstream/bytes-1.0.0.crate", "bbbb", "cccc");
        let location = Location::default();
        let report = report();
        let statement =
            equivalence_statement(&inputs(&target, &rebuild, &upstream, &location, &report));

        let value = serde_json::to_value(&statement).unwrap();
        // Subject is the upstream artifact.
        pretty_assert_eq!(value["subject"][0]["digest"]["sha256"], "bbbb");
        let deps = &value["predicate"]["buildDefinition"]["resolvedDependencies"];
        pretty_assert_eq!(deps[0]["name"], "rebuild");
        pretty_assert_eq!(deps[1]["name"], "upstream");
        pretty_assert_eq!(
            value["predicate"]["runDetails"]["byproducts"][0]["digest"]["sha256"],
            "cccc"
        );
    }

    #[test]
    fn bundle_ndjson_roundtrip_and_verification() {
        let target = target();
        let rebuild = summary("gs://run/rebuild", "aaaa", "cccc");
        let upstream = summary("https://upstream", "bbbb", "cccc");
        let location = Location::default();
        let report = report();
        let inputs = inputs(&target, &rebuild, &upstream, &location, &report);

        let statements = [equivalence_statement(&inputs), rebuild_statement(&inputs)];
        let signer = dsse::Ed25519Signer::from_bytes(&[3u8; 32]);
        let bundle = Bundle::sign(&signer, &statements).unwrap();
        pretty_assert_eq!(bundle.len(), 2);

        let encoded = bundle.to_ndjson().unwrap();
        pretty_assert_eq!(encoded.iter().filter(|b| **b == b'\n').count(), 2);

        let decoded = Bundle::from_ndjson(&encoded).unwrap();
        pretty_assert_eq!(decoded, bundle);

        let verifier = EnvelopeVerifier::new([signer.verifying_key()]);
        let recovered = decoded.statements(Some(&verifier)).unwrap();
        pretty_assert_eq!(recovered.len(), 2);
        // Stream order: equivalence, then rebuild.
        pretty_assert_eq!(
            recovered[0].predicate.build_definition.build_type,
            BUILD_TYPE_EQUIVALENCE
        );
        pretty_assert_eq!(
            recovered[1].predicate.build_definition.build_type,
            BUILD_TYPE_REBUILD
        );
    }

    #[test_log::test(tokio::test)]
    async fn publish_is_single_writer() {
        let store = MemoryStore::new();
        let target = target();
        let signer = dsse::Ed25519Signer::from_bytes(&[3u8; 32]);
        let bundle = Bundle::sign(&signer, &[]).unwrap();

        publish(&store, &target, &bundle, false).await.unwrap();
        let err = publish(&store, &target, &bundle, false).await.unwrap_err();
        assert!(matches!(err, Error::BundleExists));
        // Overwrite is gated behind the explicit flag.
        publish(&store, &target, &bundle, true).await.unwrap();
    }
}
