use std::sync::Arc;

use camino::Utf8PathBuf;
use color_eyre::{Result, eyre::Context as _};

use refab::{
    assets::{AssetStore, fs::FilesystemStore, gcs::GcsStore},
    target::{Ecosystem, Target},
};

pub mod get;
pub mod list;
pub mod run;

/// Asset store selection shared by every command.
#[derive(Clone, clap::Args, Debug)]
pub struct StoreOptions {
    /// Root of the filesystem asset store.
    #[arg(long = "store", env = "REFAB_STORE", default_value = "./assets")]
    pub store: Utf8PathBuf,

    /// GCS bucket backing the asset store instead of the filesystem.
    #[arg(long = "bucket", env = "REFAB_BUCKET")]
    pub bucket: Option<String>,

    /// Object prefix within the bucket, typically a run id.
    #[arg(long = "bucket-prefix", env = "REFAB_BUCKET_PREFIX", default_value = "")]
    pub bucket_prefix: String,
}

impl StoreOptions {
    pub fn open(&self) -> Arc<dyn AssetStore> {
        match &self.bucket {
            Some(bucket) => Arc::new(GcsStore::new(bucket.clone(), self.bucket_prefix.clone())),
            None => Arc::new(FilesystemStore::new(self.store.clone())),
        }
    }
}

/// Parse the positional target arguments, inferring the artifact name
/// per ecosystem when it is omitted.
pub fn parse_target(
    ecosystem: &str,
    package: &str,
    version: &str,
    artifact: Option<&str>,
) -> Result<Target> {
    let ecosystem: Ecosystem = ecosystem
        .parse()
        .with_context(|| format!("unknown ecosystem {ecosystem:?}"))?;
    match artifact {
        Some(artifact) => Ok(Target::new(ecosystem, package, version, artifact)),
        None => Target::with_default_artifact(ecosystem, package, version)
            .context("artifact name required for this ecosystem"),
    }
}
