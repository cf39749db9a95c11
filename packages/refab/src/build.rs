//! The build driver: renders [`Instructions`] into a sandboxed container
//! build and drives the remote executor.
//!
//! Two base templates exist, selected by ecosystem: Alpine for the
//! script-friendly ecosystems and Debian for the JVM and packaging ones.
//! Optional augmentations are orthogonal to the base: a timewarp
//! pre-step (downloads the registry time-travel proxy and starts it on
//! `localhost:8080`), a recording TLS network proxy, and a privileged
//! syscall-monitor policy. The proxy and monitor run as executor-side
//! sidecars; the driver only declares them on the request.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use clients::executor::v1::{BuildReport, BuildRequest, BuildStatus};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    Error, Result,
    strategy::{BuildEnv, Instructions},
    target::{Ecosystem, Target},
};

/// Location of the prebuild utility bucket holding helper binaries
/// (timewarp proxy, proxy certificates). Deployment-time configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrebuildConfig {
    pub bucket: String,
    pub dir: Option<String>,
    pub auth_required: bool,
}

impl PrebuildConfig {
    /// Public download URL for one utility object.
    pub fn object_url(&self, name: &str) -> String {
        match &self.dir {
            Some(dir) => format!(
                "https://storage.googleapis.com/{}/{}/{name}",
                self.bucket,
                dir.trim_matches('/')
            ),
            None => format!("https://storage.googleapis.com/{}/{name}", self.bucket),
        }
    }
}

/// Request-scoped build options, orthogonal to the ecosystem template.
#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    pub use_network_proxy: bool,
    pub use_syscall_monitor: bool,
    pub timeout: Option<Duration>,
    pub prebuild: Option<PrebuildConfig>,
}

/// The container base a target builds on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BaseImage {
    Alpine,
    Debian,
}

impl BaseImage {
    pub fn for_ecosystem(ecosystem: Ecosystem) -> Self {
        match ecosystem {
            Ecosystem::Maven | Ecosystem::Debian => Self::Debian,
            _ => Self::Alpine,
        }
    }

    pub fn image(&self) -> &'static str {
        match self {
            Self::Alpine => "docker.io/library/alpine:3.19",
            Self::Debian => "docker.io/library/debian:12-slim",
        }
    }

    fn install_command(&self, packages: &[String]) -> String {
        if packages.is_empty() {
            return "true".to_string();
        }
        match self {
            Self::Alpine => format!("apk add --no-cache {}", packages.join(" ")),
            Self::Debian => format!(
                "apt-get update && apt-get install -y --no-install-recommends {}",
                packages.join(" ")
            ),
        }
    }
}

/// Render the container build script for one target.
///
/// Layout follows the executor contract: layer one installs system
/// dependencies and materializes the source and dependency steps under
/// `/src`; layer two writes the build script to `/build`, which the
/// executor runs as the container entrypoint with `/out` mounted for the
/// artifact.
pub fn render_dockerfile(
    target: &Target,
    instructions: &Instructions,
    env: &BuildEnv,
    options: &BuildOptions,
) -> String {
    let base = BaseImage::for_ecosystem(target.ecosystem);
    let mut dockerfile = String::new();

    let _ = writeln!(dockerfile, "#syntax=docker/dockerfile:1.4");
    let _ = writeln!(dockerfile, "FROM {}", base.image());

    let _ = writeln!(dockerfile, "RUN <<'EOS'");
    let _ = writeln!(dockerfile, " set -eux");
    let _ = writeln!(dockerfile, " {}", base.install_command(&instructions.system_deps));
    if env.timewarp.is_some() {
        let prebuild = options.prebuild.clone().unwrap_or_default();
        let _ = writeln!(
            dockerfile,
            " curl -fsSL {} -o /usr/local/bin/timewarp",
            prebuild.object_url("timewarp")
        );
        let _ = writeln!(dockerfile, " chmod +x /usr/local/bin/timewarp");
        let _ = writeln!(dockerfile, " /usr/local/bin/timewarp --port 8080 &");
    }
    let _ = writeln!(dockerfile, " mkdir -p /src && cd /src");
    for line in instructions.source.lines().chain(instructions.deps.lines()) {
        let _ = writeln!(dockerfile, " {line}");
    }
    let _ = writeln!(dockerfile, "EOS");

    let _ = writeln!(dockerfile, "WORKDIR /src");
    let _ = writeln!(dockerfile, "RUN cat <<'EOS' >/build");
    let _ = writeln!(dockerfile, " set -eux");
    for line in instructions.build.lines() {
        let _ = writeln!(dockerfile, " {line}");
    }
    let _ = writeln!(
        dockerfile,
        " cp /src/{} /out/",
        instructions.output_path
    );
    let _ = writeln!(dockerfile, "EOS");
    let _ = writeln!(dockerfile, "RUN chmod +x /build");
    let _ = writeln!(dockerfile, "ENTRYPOINT [\"/bin/sh\", \"/build\"]");

    dockerfile
}

/// Assemble the executor request for one build attempt.
pub fn build_request(
    build_id: Uuid,
    target: &Target,
    instructions: &Instructions,
    env: &BuildEnv,
    options: &BuildOptions,
    output_destination: impl Into<String>,
) -> BuildRequest {
    BuildRequest::builder()
        .build_id(build_id)
        .ecosystem(target.ecosystem.to_string())
        .package(target.package.clone())
        .version(target.version.clone())
        .artifact(target.artifact.clone())
        .dockerfile(render_dockerfile(target, instructions, env, options))
        .output_destination(output_destination)
        .use_network_proxy(options.use_network_proxy)
        .use_syscall_monitor(options.use_syscall_monitor)
        .maybe_timeout_seconds(options.timeout.map(|timeout| timeout.as_secs()))
        .build()
}

/// The remote build service, by stable interface only.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn run_build(&self, request: &BuildRequest) -> Result<BuildReport>;
}

#[async_trait]
impl BuildExecutor for clients::executor::v1::Client {
    async fn run_build(&self, request: &BuildRequest) -> Result<BuildReport> {
        clients::executor::v1::Client::run_build(self, request)
            .await
            .map_err(|err| Error::BuildFailed(err.to_string()))
    }
}

/// Run the build, enforcing the deadline and mapping terminal status.
#[instrument(skip(executor, request), fields(build_id = %request.build_id))]
pub async fn run_to_completion(
    executor: &dyn BuildExecutor,
    request: &BuildRequest,
    timeout: Option<Duration>,
) -> Result<BuildReport> {
    let run = executor.run_build(request);
    let report = match timeout {
        Some(deadline) => tokio::time::timeout(deadline, run)
            .await
            .map_err(|_| Error::BuildTimeout)??,
        None => run.await?,
    };
    debug!(status = %report.status, steps = report.steps.len(), "build finished");
    match report.status {
        BuildStatus::Success => Ok(report),
        BuildStatus::Timeout => Err(Error::BuildTimeout),
        BuildStatus::Failure => Err(Error::BuildFailed(
            report
                .log_tail
                .unwrap_or_else(|| "executor reported failure".to_string()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;

    use super::*;
    use crate::strategy::{Location, Timewarp};

    fn instructions() -> Instructions {
        Instructions {
            location: Location {
                repo: "https://github.com/tokio-rs/bytes".to_string(),
                git_ref: "abc123".to_string(),
                dir: String::new(),
            },
            system_deps: vec!["git".to_string(), "cargo".to_string()],
            source: "git clone https://github.com/tokio-rs/bytes . && git checkout abc123"
                .to_string(),
            deps: String::new(),
            build: "cargo package --no-verify".to_string(),
            output_path: "target/package/bytes-1.0.0.crate".into(),
        }
    }

    fn cratesio_target() -> Target {
        Target::new(Ecosystem::CratesIo, "bytes", "1.0.0", "bytes-1.0.0.crate")
    }

    #[test]
    fn base_image_tracks_ecosystem() {
        pretty_assert_eq!(
            BaseImage::for_ecosystem(Ecosystem::Npm),
            BaseImage::Alpine
        );
        pretty_assert_eq!(
            BaseImage::for_ecosystem(Ecosystem::Maven),
            BaseImage::Debian
        );
        pretty_assert_eq!(
            BaseImage::for_ecosystem(Ecosystem::Debian),
            BaseImage::Debian
        );
    }

    #[test]
    fn dockerfile_contains_install_source_and_entrypoint() {
        let dockerfile = render_dockerfile(
            &cratesio_target(),
            &instructions(),
            &BuildEnv::default(),
            &BuildOptions::default(),
        );
        assert!(dockerfile.starts_with("#syntax=docker/dockerfile:1.4\n"));
        assert!(dockerfile.contains("FROM docker.io/library/alpine:3.19"));
        assert!(dockerfile.contains("apk add --no-cache git cargo"));
        assert!(dockerfile.contains("git clone https://github.com/tokio-rs/bytes ."));
        assert!(dockerfile.contains("cargo package --no-verify"));
        assert!(dockerfile.contains("cp /src/target/package/bytes-1.0.0.crate /out/"));
        assert!(dockerfile.contains("ENTRYPOINT [\"/bin/sh\", \"/build\"]"));
        assert!(!dockerfile.contains("timewarp"));
    }

    #[test]
    fn debian_base_uses_apt() {
        let target = Target::new(Ecosystem::Maven, "com.example:foo", "2.1", "foo-2.1.jar");
        let dockerfile = render_dockerfile(
            &target,
            &instructions(),
            &BuildEnv::default(),
            &BuildOptions::default(),
        );
        assert!(dockerfile.contains("FROM docker.io/library/debian:12-slim"));
        assert!(dockerfile.contains("apt-get install -y --no-install-recommends"));
    }

    #[test]
    fn timewarp_prestep_is_emitted_when_configured() {
        let env = BuildEnv {
            timewarp: Some(Timewarp {
                host: "localhost:8080".to_string(),
                moment: "2021-01-01T00:00:00Z".parse().unwrap(),
            }),
            ..Default::default()
        };
        let options = BuildOptions {
            prebuild: Some(PrebuildConfig {
                bucket: "rebuild-utils".to_string(),
                dir: Some("v1".to_string()),
                auth_required: false,
            }),
            ..Default::default()
        };
        let dockerfile =
            render_dockerfile(&cratesio_target(), &instructions(), &env, &options);
        assert!(dockerfile.contains(
            "curl -fsSL https://storage.googleapis.com/rebuild-utils/v1/timewarp"
        ));
        assert!(dockerfile.contains("/usr/local/bin/timewarp --port 8080 &"));
    }

    struct StaticExecutor(BuildReport);

    #[async_trait]
    impl BuildExecutor for StaticExecutor {
        async fn run_build(&self, _: &BuildRequest) -> Result<BuildReport> {
            Ok(self.0.clone())
        }
    }

    fn report(status: BuildStatus) -> BuildReport {
        BuildReport::builder()
            .build_id(Uuid::nil())
            .status(status)
            .builder_id("https://builder.example/v1")
            .started_at("2021-01-01T00:00:00Z".parse().unwrap())
            .finished_at("2021-01-01T00:05:00Z".parse().unwrap())
            .steps(Vec::new())
            .build()
    }

    #[test_log::test(tokio::test)]
    async fn failure_status_maps_to_build_failed() {
        let executor = StaticExecutor(report(BuildStatus::Failure));
        let request = build_request(
            Uuid::nil(),
            &cratesio_target(),
            &instructions(),
            &BuildEnv::default(),
            &BuildOptions::default(),
            "memory://out",
        );
        let err = run_to_completion(&executor, &request, None).await.unwrap_err();
        assert!(matches!(err, Error::BuildFailed(_)));
    }

    #[test_log::test(tokio::test)]
    async fn success_status_passes_report_through() {
        let executor = StaticExecutor(report(BuildStatus::Success));
        let request = build_request(
            Uuid::nil(),
            &cratesio_target(),
            &instructions(),
            &BuildEnv::default(),
            &BuildOptions::default(),
            "memory://out",
        );
        let report = run_to_completion(&executor, &request, None).await.unwrap();
        pretty_assert_eq!(report.status, BuildStatus::Success);
    }
}
