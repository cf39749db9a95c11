use clap::Args;
use color_eyre::{Result, eyre::bail};
use tracing::instrument;
use walkdir::WalkDir;

use refab::target::{Ecosystem, TargetEncoding};

use super::StoreOptions;

#[derive(Clone, Args, Debug)]
pub struct Options {
    pub ecosystem: String,
    pub package: String,
    /// Restrict the listing to one version.
    pub version: Option<String>,

    #[command(flatten)]
    store: StoreOptions,
}

/// Enumerate stored attestation bundles under the target prefix.
///
/// Listing walks the filesystem store layout
/// `<ecosystem>/<encoded-package>/<version>/<artifact>/rebuild.intoto.jsonl`;
/// bucket-backed stores are read out with their own tooling.
#[instrument(skip(options))]
pub async fn exec(options: Options) -> Result<()> {
    if options.store.bucket.is_some() {
        bail!("list only supports filesystem stores");
    }
    let ecosystem: Ecosystem = options.ecosystem.parse().map_err(|_| {
        color_eyre::eyre::eyre!("unknown ecosystem {:?}", options.ecosystem)
    })?;
    let encoded = TargetEncoding::Filesystem.encode(&options.package);
    let mut prefix = options.store.store.join(ecosystem.to_string()).join(encoded);
    if let Some(version) = &options.version {
        prefix = prefix.join(version);
    }

    if !prefix.as_std_path().exists() {
        return Ok(());
    }
    let mut bundles = Vec::new();
    for entry in WalkDir::new(prefix.as_std_path()) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.file_name().to_str() == Some("rebuild.intoto.jsonl")
        {
            bundles.push(entry.path().to_path_buf());
        }
    }
    bundles.sort();
    for bundle in bundles {
        // Print as <version>/<artifact> relative to the package prefix.
        let display = bundle
            .parent()
            .and_then(|artifact_dir| {
                artifact_dir
                    .strip_prefix(options.store.store.as_std_path())
                    .ok()
            })
            .map(|rel| rel.display().to_string())
            .unwrap_or_else(|| bundle.display().to_string());
        println!("{display}");
    }
    Ok(())
}
