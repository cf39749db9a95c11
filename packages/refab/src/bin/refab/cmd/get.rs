use clap::Args;
use color_eyre::{
    Result,
    eyre::{Context as _, bail},
};
use tracing::instrument;

use refab::{
    assets::{Asset, AssetKind, AssetStore as _},
    attest::{Bundle, dsse::EnvelopeVerifier},
};

use super::{StoreOptions, parse_target};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Output {
    /// The raw DSSE envelope bundle (newline-delimited JSON).
    Bundle,
    /// Decoded in-toto statement payloads.
    Payload,
    /// The rendered Dockerfile.
    Dockerfile,
    /// Recorded build metadata (`build.json`).
    Build,
    /// Resolved builder image digests (`steps.json`).
    Steps,
}

#[derive(Clone, Args, Debug)]
pub struct Options {
    pub ecosystem: String,
    pub package: String,
    pub version: String,
    /// Exact artifact file name; inferred per ecosystem when omitted.
    pub artifact: Option<String>,

    #[arg(long, value_enum, default_value = "bundle")]
    output: Output,

    /// Verify envelope signatures before emitting anything.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    verify: bool,

    /// Hex-encoded ed25519 public key(s) for verification.
    #[arg(long = "public-key", env = "REFAB_PUBLIC_KEY")]
    public_key: Vec<String>,

    #[command(flatten)]
    store: StoreOptions,
}

fn parse_keys(keys: &[String]) -> Result<EnvelopeVerifier> {
    if keys.is_empty() {
        bail!("--verify requires at least one --public-key");
    }
    let mut parsed = Vec::with_capacity(keys.len());
    for key in keys {
        let bytes: [u8; 32] = hex::decode(key)
            .context("decode public key hex")?
            .try_into()
            .map_err(|_| color_eyre::eyre::eyre!("public key must be 32 bytes"))?;
        parsed.push(
            ed25519_dalek::VerifyingKey::from_bytes(&bytes).context("parse public key")?,
        );
    }
    Ok(EnvelopeVerifier::new(parsed))
}

#[instrument(skip(options))]
pub async fn exec(options: Options) -> Result<()> {
    let target = parse_target(
        &options.ecosystem,
        &options.package,
        &options.version,
        options.artifact.as_deref(),
    )?;
    let store = options.store.open();

    match options.output {
        Output::Bundle | Output::Payload => {
            let asset = Asset::new(AssetKind::AttestationBundle, target);
            let bytes = store
                .read_bytes(&asset)
                .await
                .context("read attestation bundle")?;
            let bundle = Bundle::from_ndjson(&bytes)?;

            let verifier = if options.verify {
                Some(parse_keys(&options.public_key)?)
            } else {
                None
            };
            let statements = bundle.statements(verifier.as_ref())?;

            if options.output == Output::Bundle {
                print!("{}", String::from_utf8_lossy(&bytes));
            } else {
                for statement in statements {
                    println!("{}", serde_json::to_string_pretty(&statement)?);
                }
            }
        }
        Output::Dockerfile | Output::Build | Output::Steps => {
            let kind = match options.output {
                Output::Dockerfile => AssetKind::Dockerfile,
                Output::Build => AssetKind::BuildInfo,
                _ => AssetKind::ContainerImage,
            };
            let bytes = store
                .read_bytes(&Asset::new(kind, target))
                .await
                .with_context(|| format!("read {kind} asset"))?;
            print!("{}", String::from_utf8_lossy(&bytes));
        }
    }
    Ok(())
}
