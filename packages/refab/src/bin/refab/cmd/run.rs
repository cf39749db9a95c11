use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::{
    Result,
    eyre::{Context as _, bail},
};
use tracing::instrument;
use url::Url;

use refab::{
    attest::dsse::Ed25519Signer,
    build::{BuildOptions, PrebuildConfig},
    rebuild::{Coordinator, RebuildOptions, RebuildRequest},
    registry::Registry,
    strategy::{BuildEnv, Location, LocationHint, Timewarp},
};

use super::{StoreOptions, parse_target};

#[derive(Clone, Args, Debug)]
pub struct Options {
    pub ecosystem: String,
    pub package: String,
    /// Versions to rebuild; the repository clone is reused across them.
    #[arg(required = true, num_args = 1..)]
    pub versions: Vec<String>,

    /// Exact artifact file name; inferred per ecosystem when omitted.
    /// Only valid with a single version.
    #[arg(long)]
    pub artifact: Option<String>,

    /// Base URL for the remote build executor.
    #[arg(long = "executor-url", env = "REFAB_EXECUTOR_URL")]
    executor_url: Url,

    /// Hex-encoded ed25519 signing key.
    #[arg(long = "signing-key", env = "REFAB_SIGNING_KEY", hide_env_values = true)]
    signing_key: String,

    /// Constrain inference to this repository.
    #[arg(long = "repo")]
    repo: Option<String>,

    /// Constrain inference to this commit.
    #[arg(long = "ref")]
    git_ref: Option<String>,

    /// Constrain inference to this directory within the repository.
    #[arg(long = "dir")]
    dir: Option<String>,

    /// Route registry traffic through a timewarp proxy at this host.
    #[arg(long = "timewarp-host")]
    timewarp_host: Option<String>,

    /// RFC 3339 instant the timewarp proxy should serve registry state
    /// as of. Defaults to now when only the host is given.
    #[arg(long = "timewarp-time")]
    timewarp_time: Option<String>,

    /// Run the build behind the recording network proxy sidecar.
    #[arg(long = "network-proxy")]
    network_proxy: bool,

    /// Attach the syscall-monitor sidecar.
    #[arg(long = "syscall-monitor")]
    syscall_monitor: bool,

    /// Pin exact toolchain versions where the ecosystem supports it.
    #[arg(long = "precise-toolchain")]
    precise_toolchain: bool,

    /// Build deadline in seconds.
    #[arg(long = "timeout-secs", default_value_t = 3600)]
    timeout_secs: u64,

    /// Prebuild utility bucket holding helper binaries.
    #[arg(long = "prebuild-bucket", env = "REFAB_PREBUILD_BUCKET")]
    prebuild_bucket: Option<String>,

    /// Directory prefix within the prebuild bucket.
    #[arg(long = "prebuild-dir")]
    prebuild_dir: Option<String>,

    /// The prebuild bucket requires authenticated reads.
    #[arg(long = "prebuild-auth")]
    prebuild_auth: bool,

    /// Replace an existing attestation bundle.
    #[arg(long)]
    overwrite: bool,

    /// Keep per-package work directories for debugging.
    #[arg(long = "keep-workdir")]
    keep_workdir: bool,

    #[command(flatten)]
    store: StoreOptions,
}

impl Options {
    fn hint(&self) -> Option<LocationHint> {
        if self.repo.is_none() && self.git_ref.is_none() && self.dir.is_none() {
            return None;
        }
        Some(LocationHint {
            location: Location {
                repo: self.repo.clone().unwrap_or_default(),
                git_ref: self.git_ref.clone().unwrap_or_default(),
                dir: self.dir.clone().unwrap_or_default(),
            },
        })
    }

    fn timewarp(&self) -> Result<Option<Timewarp>> {
        let Some(host) = &self.timewarp_host else {
            return Ok(None);
        };
        let moment = match &self.timewarp_time {
            Some(time) => time.parse().context("parse --timewarp-time")?,
            None => jiff::Timestamp::now(),
        };
        Ok(Some(Timewarp {
            host: host.clone(),
            moment,
        }))
    }
}

#[instrument(skip(options))]
pub async fn exec(options: Options) -> Result<()> {
    if options.artifact.is_some() && options.versions.len() > 1 {
        bail!("--artifact only applies to a single version");
    }

    let targets = options
        .versions
        .iter()
        .map(|version| {
            parse_target(
                &options.ecosystem,
                &options.package,
                version,
                options.artifact.as_deref(),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let key: [u8; 32] = hex::decode(&options.signing_key)
        .context("decode signing key hex")?
        .try_into()
        .map_err(|_| color_eyre::eyre::eyre!("signing key must be 32 bytes"))?;
    let signer = Ed25519Signer::from_bytes(&key);

    let rebuild_options = RebuildOptions {
        env: BuildEnv {
            has_repo: false,
            prefer_precise_toolchain: options.precise_toolchain,
            timewarp: options.timewarp()?,
        },
        build: BuildOptions {
            use_network_proxy: options.network_proxy,
            use_syscall_monitor: options.syscall_monitor,
            timeout: Some(Duration::from_secs(options.timeout_secs)),
            prebuild: options.prebuild_bucket.clone().map(|bucket| PrebuildConfig {
                bucket,
                dir: options.prebuild_dir.clone(),
                auth_required: options.prebuild_auth,
            }),
        },
        overwrite_bundle: options.overwrite,
        keep_workdir: options.keep_workdir,
    };

    let coordinator = Coordinator::new(
        Registry::new(),
        options.store.open(),
        Arc::new(clients::Executor::new(options.executor_url.clone())),
        Arc::new(signer),
        rebuild_options,
    );

    let request = RebuildRequest {
        targets,
        hint: options.hint(),
        strategy: None,
    };
    let verdicts = coordinator.rebuild_package(&request).await;

    let mut failures = 0;
    for verdict in &verdicts {
        match &verdict.message {
            None => println!(
                "PASS {} ({} in {:.1?})",
                verdict.target,
                verdict.strategy.unwrap_or("unknown"),
                verdict.timings.total
            ),
            Some(message) => {
                failures += 1;
                println!("FAIL {}: {message}", verdict.target);
            }
        }
    }
    if failures > 0 {
        bail!("{failures}/{} targets did not produce attestations", verdicts.len());
    }
    Ok(())
}
