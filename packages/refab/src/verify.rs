//! Artifact summarization and equivalence comparison.
//!
//! A [`ArtifactSummary`] captures two digest sets for one artifact: the
//! raw bytes as published/built, and the stabilized canonical form. The
//! pass predicate for a rebuild is stabilized equality; raw equality is
//! not required.

use tracing::{debug, instrument};

use crate::{
    Result,
    assets::{Asset, AssetKind, AssetStore},
    hash::{DigestSet, MultiHash},
    registry::Registry,
    stabilize::Stabilizer,
    target::Target,
};

/// Raw and stabilized digests for one artifact.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArtifactSummary {
    pub uri: String,
    pub hash: DigestSet,
    pub stabilized_hash: DigestSet,
}

/// Summarize one artifact already held in memory.
///
/// The input makes a single pass: bytes tee into the raw hasher while the
/// stabilizer consumes them, and the stabilizer's output feeds the
/// stabilized hasher.
pub fn summarize_bytes(
    uri: impl Into<String>,
    bytes: &[u8],
    stabilizer: &Stabilizer,
) -> Result<ArtifactSummary> {
    let mut raw = MultiHash::standard();
    raw.write(bytes);

    let mut stabilized = MultiHash::standard();
    stabilizer.run(bytes, &mut stabilized)?;

    Ok(ArtifactSummary {
        uri: uri.into(),
        hash: raw.digest_set(),
        stabilized_hash: stabilized.digest_set(),
    })
}

/// Summarize the rebuilt artifact from the asset store.
#[instrument(skip(store), fields(target = %target))]
pub async fn summarize_rebuild(
    store: &dyn AssetStore,
    target: &Target,
) -> Result<ArtifactSummary> {
    let asset = Asset::new(AssetKind::Rebuild, target.clone());
    let bytes = store.read_bytes(&asset).await?;
    let stabilizer = Stabilizer::for_target(target);
    let summary = summarize_bytes(store.url(&asset), &bytes, &stabilizer)?;
    debug!(len = bytes.len(), "summarized rebuilt artifact");
    Ok(summary)
}

/// Summarize the upstream artifact fetched from its canonical URL.
#[instrument(skip(registry), fields(target = %target))]
pub async fn summarize_upstream(
    registry: &Registry,
    target: &Target,
) -> Result<ArtifactSummary> {
    let url = registry.release_url(target)?;
    let bytes = registry.artifact_bytes(target).await?;
    let stabilizer = Stabilizer::for_target(target);
    let summary = summarize_bytes(url, &bytes, &stabilizer)?;
    debug!(len = bytes.len(), "summarized upstream artifact");
    Ok(summary)
}

/// The equivalence predicate: stabilized digests match.
///
/// Raw inequality with stabilized equality is still a pass; the
/// stabilizer exists precisely to discount declared nondeterminism.
pub fn equivalent(rebuild: &ArtifactSummary, upstream: &ArtifactSummary) -> bool {
    !rebuild.stabilized_hash.is_empty() && rebuild.stabilized_hash == upstream.stabilized_hash
}
