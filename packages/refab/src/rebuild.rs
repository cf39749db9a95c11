//! The rebuild coordinator: a per-target state machine wiring inference,
//! lowering, the build driver, summarization, comparison, and
//! attestation.
//!
//! One [`Coordinator`] processes targets sequentially; callers wanting
//! parallelism run one coordinator per worker over disjoint targets.
//! Versions of the same package are batched: the repository clone is
//! reused across versions as long as the resolved repo URL does not
//! change. Failures are per-target: sibling versions continue, and
//! panics are contained at the target boundary as internal-error
//! verdicts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt as _;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    Error, Result,
    assets::{Asset, AssetKind, AssetStore},
    attest::{
        self, AttestationInputs, Bundle,
        dsse::Signer,
        intoto::ResourceDescriptor,
    },
    build::{self, BuildExecutor, BuildOptions},
    git::Repo,
    infer,
    registry::Registry,
    strategy::{BuildEnv, LocationHint, Strategy},
    target::Target,
    verify,
};

/// One batch of work: several versions of a single package, optionally
/// constrained by a hint or a complete strategy.
#[derive(Clone, Debug, Default)]
pub struct RebuildRequest {
    pub targets: Vec<Target>,
    /// Constrains inference when set.
    pub hint: Option<LocationHint>,
    /// Skips inference entirely when set to a buildable strategy.
    pub strategy: Option<Strategy>,
}

/// Coordinator-level options.
#[derive(Clone, Debug, Default)]
pub struct RebuildOptions {
    pub env: BuildEnv,
    pub build: BuildOptions,
    /// Replace an existing attestation bundle instead of failing.
    pub overwrite_bundle: bool,
    /// Keep per-package work directories for debugging.
    pub keep_workdir: bool,
}

/// Wall-clock spent in each phase of one attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timings {
    pub infer: Duration,
    pub build: Duration,
    pub compare: Duration,
    pub attest: Duration,
    pub total: Duration,
}

/// The terminal result for one target.
#[derive(Clone, Debug)]
pub struct Verdict {
    pub target: Target,
    /// `None` on success; otherwise the failure or mismatch message.
    pub message: Option<String>,
    /// The strategy kind that drove the attempt, when one was resolved.
    pub strategy: Option<&'static str>,
    pub timings: Timings,
}

impl Verdict {
    pub fn success(&self) -> bool {
        self.message.is_none()
    }
}

/// Repository state shared across versions of one package.
struct RepoState {
    url: String,
    repo: Repo,
    // Held for its Drop: removing the clone when retention is off.
    _workdir: Option<tempfile::TempDir>,
}

enum Attempt {
    /// Stabilized digests matched; the bundle is published.
    Attested,
    /// Stabilized digests differ: a negative verdict, not an error.
    Mismatch { ours: String, theirs: String },
}

/// Drives the rebuild pipeline for one target at a time.
pub struct Coordinator {
    registry: Registry,
    store: Arc<dyn AssetStore>,
    executor: Arc<dyn BuildExecutor>,
    signer: Arc<dyn Signer>,
    options: RebuildOptions,
}

impl Coordinator {
    pub fn new(
        registry: Registry,
        store: Arc<dyn AssetStore>,
        executor: Arc<dyn BuildExecutor>,
        signer: Arc<dyn Signer>,
        options: RebuildOptions,
    ) -> Self {
        Self {
            registry,
            store,
            executor,
            signer,
            options,
        }
    }

    /// Rebuild every target in the request, reusing the clone across
    /// versions. Returns one verdict per target, in input order.
    #[instrument(skip(self, request), fields(targets = request.targets.len()))]
    pub async fn rebuild_package(&self, request: &RebuildRequest) -> Vec<Verdict> {
        let mut verdicts = Vec::with_capacity(request.targets.len());
        let mut repo_state: Option<RepoState> = None;

        for target in &request.targets {
            let started = Instant::now();
            self.registry.http().cache().push_scope();
            let attempt = std::panic::AssertUnwindSafe(self.rebuild_one(
                target,
                request,
                &mut repo_state,
            ))
            .catch_unwind()
            .await;
            self.registry.http().cache().pop_scope();

            let verdict = match attempt {
                Ok(Ok((strategy, attempt, mut timings))) => {
                    timings.total = started.elapsed();
                    let message = match attempt {
                        Attempt::Attested => None,
                        Attempt::Mismatch { ours, theirs } => Some(format!(
                            "content mismatch: stabilized sha256 {ours} != {theirs}"
                        )),
                    };
                    Verdict {
                        target: target.clone(),
                        message,
                        strategy: Some(strategy),
                        timings,
                    }
                }
                Ok(Err(err)) => Verdict {
                    target: target.clone(),
                    message: Some(err.to_string()),
                    strategy: None,
                    timings: Timings {
                        total: started.elapsed(),
                        ..Default::default()
                    },
                },
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "panic".to_string());
                    warn!(subject = %target, %message, "recovered panic at target boundary");
                    Verdict {
                        target: target.clone(),
                        message: Some(Error::Internal(message).to_string()),
                        strategy: None,
                        timings: Timings {
                            total: started.elapsed(),
                            ..Default::default()
                        },
                    }
                }
            };
            if verdict.success() {
                info!(subject = %verdict.target, elapsed = ?verdict.timings.total, "rebuild succeeded");
            } else {
                info!(
                    subject = %verdict.target,
                    message = verdict.message.as_deref().unwrap_or_default(),
                    "rebuild did not succeed"
                );
            }
            verdicts.push(verdict);
        }
        verdicts
    }

    async fn rebuild_one(
        &self,
        target: &Target,
        request: &RebuildRequest,
        repo_state: &mut Option<RepoState>,
    ) -> Result<(&'static str, Attempt, Timings)> {
        let mut timings = Timings::default();
        let phase = Instant::now();

        // InferRepo: a buildable strategy or hint short-circuits metadata
        // resolution.
        let strategy = match &request.strategy {
            Some(strategy) if !matches!(strategy, Strategy::LocationHint(_)) => {
                strategy.clone()
            }
            given => {
                let hint = match given {
                    Some(Strategy::LocationHint(hint)) => Some(hint.clone()),
                    _ => request.hint.clone(),
                };
                let repo_url = match &hint {
                    Some(hint) if !hint.location.repo.is_empty() => {
                        infer::canonicalize_repo_url(&hint.location.repo)
                            .ok_or_else(|| Error::NoRepoFound(target.package.clone()))?
                    }
                    _ => {
                        let info = self.registry.package_info(target).await?;
                        infer::resolve_repo(&info)?
                    }
                };

                // CloneOrReuse: keep the clone while the URL is stable.
                if repo_state.as_ref().map(|state| state.url.as_str()) != Some(repo_url.as_str())
                {
                    *repo_state = Some(self.clone_repo(&repo_url)?);
                } else {
                    debug!(%repo_url, "reusing existing clone");
                }
                let state = repo_state.as_ref().expect("repo state just set");

                // InferStrategy.
                infer::infer_strategy(target, &self.registry, &state.repo, hint.as_ref())
                    .await?
            }
        };
        timings.infer = phase.elapsed();
        let strategy_kind = strategy.kind();

        // Lower.
        let instructions = strategy.generate_for(target, &self.options.env)?;

        // Build.
        let phase = Instant::now();
        let build_id = Uuid::new_v4();
        let rebuild_asset = Asset::new(AssetKind::Rebuild, target.clone());
        let request_body = build::build_request(
            build_id,
            target,
            &instructions,
            &self.options.env,
            &self.options.build,
            self.store.url(&rebuild_asset),
        );
        self.store
            .write_bytes(
                &Asset::new(AssetKind::Dockerfile, target.clone()),
                request_body.dockerfile.clone().into_bytes(),
            )
            .await?;
        let report = build::run_to_completion(
            self.executor.as_ref(),
            &request_body,
            self.options.build.timeout,
        )
        .await?;
        timings.build = phase.elapsed();

        // Persist build metadata for debugging and the provenance
        // byproducts.
        let build_info_json = serde_json::to_vec(&report)?;
        self.store
            .write_bytes(
                &Asset::new(AssetKind::BuildInfo, target.clone()),
                build_info_json.clone(),
            )
            .await?;
        let steps_json = serde_json::to_vec(&report.steps)?;
        self.store
            .write_bytes(
                &Asset::new(AssetKind::ContainerImage, target.clone()),
                steps_json.clone(),
            )
            .await?;
        if let Some(log_tail) = &report.log_tail {
            self.store
                .write_bytes(
                    &Asset::new(AssetKind::DebugLogs, target.clone()),
                    log_tail.clone().into_bytes(),
                )
                .await?;
        }

        // Summarize. A missing rebuilt artifact means the build did not
        // deliver its output.
        let phase = Instant::now();
        let rebuild_summary = match verify::summarize_rebuild(self.store.as_ref(), target).await
        {
            Ok(summary) => summary,
            Err(err) if err.is_not_found() => {
                return Err(Error::MissingOutput(instructions.output_path.to_string()));
            }
            Err(err) => return Err(err),
        };
        let upstream_summary = verify::summarize_upstream(&self.registry, target).await?;

        // Compare.
        if !verify::equivalent(&rebuild_summary, &upstream_summary) {
            timings.compare = phase.elapsed();
            let ours = rebuild_summary
                .stabilized_hash
                .get("sha256")
                .cloned()
                .unwrap_or_default();
            let theirs = upstream_summary
                .stabilized_hash
                .get("sha256")
                .cloned()
                .unwrap_or_default();
            return Ok((strategy_kind, Attempt::Mismatch { ours, theirs }, timings));
        }
        timings.compare = phase.elapsed();

        // Attest and publish.
        let phase = Instant::now();
        let build_def = match &request.strategy {
            Some(Strategy::Manual(_)) => {
                let asset = Asset::new(AssetKind::BuildDef, target.clone());
                let definition = serde_json::to_vec(&request.strategy)?;
                self.store.write_bytes(&asset, definition.clone()).await?;
                Some(
                    ResourceDescriptor::named("build-definition")
                        .with_uri(self.store.url(&asset))
                        .with_digest(attest::digest_of(&definition)),
                )
            }
            _ => None,
        };
        let inputs = AttestationInputs {
            target,
            rebuild: &rebuild_summary,
            upstream: &upstream_summary,
            location: &instructions.location,
            report: &report,
            dockerfile: &request_body.dockerfile,
            build_info_json: &build_info_json,
            steps_json: &steps_json,
            build_def,
        };
        let statements = [
            attest::equivalence_statement(&inputs),
            attest::rebuild_statement(&inputs),
        ];
        let bundle = Bundle::sign(self.signer.as_ref(), &statements)?;
        attest::publish(
            self.store.as_ref(),
            target,
            &bundle,
            self.options.overwrite_bundle,
        )
        .await?;
        timings.attest = phase.elapsed();

        Ok((strategy_kind, Attempt::Attested, timings))
    }

    fn clone_repo(&self, url: &str) -> Result<RepoState> {
        let workdir = tempfile::TempDir::with_prefix("refab-repo-")?;
        let path = workdir.path().to_path_buf();
        let repo = Repo::clone(url, &path)?;
        let workdir = if self.options.keep_workdir {
            info!(?path, "retaining work directory");
            let _ = workdir.keep();
            None
        } else {
            Some(workdir)
        };
        Ok(RepoState {
            url: url.to_string(),
            repo,
            _workdir: workdir,
        })
    }
}
