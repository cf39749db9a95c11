//! Content-addressed storage of per-target rebuild artifacts.
//!
//! Every byte the pipeline persists (the rebuilt artifact, the upstream
//! copy, build definitions, debug logs, the attestation bundle) is an
//! [`Asset`]: a `(kind, target)` pair. Stores address assets by a virtual
//! path `<ecosystem>/<encoded-package>/<version>/<artifact>/<file-name>`,
//! where the package component is re-encoded reversibly for the backend
//! (see [`TargetEncoding`]).
//!
//! Backends: [`MemoryStore`] here, [`fs::FilesystemStore`],
//! [`gcs::GcsStore`], and the layered [`cache::CachedStore`].

use std::pin::Pin;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use dashmap::DashMap;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumString};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{
    Error, Result,
    target::{Target, TargetEncoding},
};

pub mod cache;
pub mod fs;
pub mod gcs;

/// The kinds of per-target assets the pipeline reads and writes.
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
    Serialize,
    Deserialize,
)]
pub enum AssetKind {
    /// The artifact produced by our rebuild.
    Rebuild,
    /// The artifact as published upstream.
    Upstream,
    /// The rendered container build script.
    Dockerfile,
    /// Build metadata recorded from the executor (`build.json`).
    BuildInfo,
    /// Resolved builder container image digests (`steps.json`).
    ContainerImage,
    /// The signed DSSE envelope bundle.
    AttestationBundle,
    /// Captured build logs.
    DebugLogs,
    /// Recorded network traffic from the proxy sidecar.
    ProxyNetlog,
    /// Syscall-monitor JSONL log.
    TetragonLog,
    /// A manual build definition, when one was supplied.
    BuildDef,
}

impl AssetKind {
    /// The file name this kind stores under within the target's directory.
    ///
    /// The rebuilt artifact keeps the artifact name itself so that the
    /// stored tree mirrors what a registry would serve.
    pub fn file_name(&self, target: &Target) -> String {
        match self {
            Self::Rebuild => target.artifact.clone(),
            Self::Upstream => "upstream".to_string(),
            Self::Dockerfile => "Dockerfile".to_string(),
            Self::BuildInfo => "build.json".to_string(),
            Self::ContainerImage => "steps.json".to_string(),
            Self::AttestationBundle => "rebuild.intoto.jsonl".to_string(),
            Self::DebugLogs => "build.log".to_string(),
            Self::ProxyNetlog => "netlog.json".to_string(),
            Self::TetragonLog => "tetragon.jsonl".to_string(),
            Self::BuildDef => "build-definition.yaml".to_string(),
        }
    }
}

/// One addressable asset: a kind scoped to a target.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Display, Serialize, Deserialize)]
#[display("{kind} for {target}")]
pub struct Asset {
    pub kind: AssetKind,
    pub target: Target,
}

impl Asset {
    pub fn new(kind: AssetKind, target: Target) -> Self {
        Self { kind, target }
    }

    /// The virtual path of this asset under the given encoding.
    pub fn path(&self, encoding: TargetEncoding) -> Utf8PathBuf {
        let target = &self.target;
        Utf8PathBuf::from(target.ecosystem.to_string())
            .join(encoding.encode(&target.package))
            .join(&target.version)
            .join(&target.artifact)
            .join(self.kind.file_name(target))
    }
}

/// Boxed async byte stream returned by asset readers.
pub type AssetReader = Pin<Box<dyn AsyncRead + Send>>;

/// Content-addressed read/write of per-target artifacts.
///
/// Writers are scoped: partial writes are never visible, contents appear
/// under the asset's path only after `write` returns success.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Open the asset for reading. Misses fail with
    /// [`Error::AssetNotFound`].
    async fn reader(&self, asset: &Asset) -> Result<AssetReader>;

    /// Write the asset from the given stream, returning the byte count.
    async fn write(
        &self,
        asset: &Asset,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// A URI describing where the asset lives in this store.
    fn url(&self, asset: &Asset) -> String;

    /// Whether the asset exists in this store.
    async fn exists(&self, asset: &Asset) -> Result<bool> {
        match self.reader(asset).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Read the full asset contents into memory.
    async fn read_bytes(&self, asset: &Asset) -> Result<Vec<u8>> {
        let mut reader = self.reader(asset).await?;
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    /// Write the asset from an in-memory buffer.
    async fn write_bytes(&self, asset: &Asset, bytes: Vec<u8>) -> Result<u64> {
        let mut cursor = std::io::Cursor::new(bytes);
        self.write(asset, &mut cursor).await
    }
}

/// In-memory asset store, used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<Utf8PathBuf, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn reader(&self, asset: &Asset) -> Result<AssetReader> {
        let path = asset.path(TargetEncoding::Filesystem);
        let blob = self
            .blobs
            .get(&path)
            .ok_or_else(|| Error::AssetNotFound(asset.to_string()))?;
        Ok(Box::pin(std::io::Cursor::new(blob.value().clone())))
    }

    async fn write(
        &self,
        asset: &Asset,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let mut buffer = Vec::new();
        body.read_to_end(&mut buffer).await?;
        let len = buffer.len() as u64;
        self.blobs.insert(asset.path(TargetEncoding::Filesystem), buffer);
        Ok(len)
    }

    fn url(&self, asset: &Asset) -> String {
        format!("memory://{}", asset.path(TargetEncoding::Filesystem))
    }
}
