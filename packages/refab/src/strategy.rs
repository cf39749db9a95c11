//! Build strategies and their lowering to concrete instructions.
//!
//! A [`Strategy`] is a capability: given a target and a [`BuildEnv`] it
//! produces [`Instructions`] or fails. Every variant except
//! [`LocationHint`] lowers to a [`WorkflowStrategy`] (steps in the flow
//! DSL) before emitting instructions; the ecosystem variants are thin
//! typed wrappers that pick the right built-in tools and output
//! directories.

use bon::Builder;
use camino::Utf8PathBuf;
use itertools::Itertools;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    Error, Result,
    flow::{self, Step, ToolRegistry},
    target::{Ecosystem, Target},
};

/// A source location: VCS URL, commit, and an optional sub-path within
/// the repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct Location {
    pub repo: String,
    /// Full commit hash (SHA-1 or SHA-256 hex).
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Build directory relative to the repository root; empty means the
    /// root itself.
    #[serde(default)]
    pub dir: String,
}

/// Registry time-travel configuration: requests route through a proxy
/// that serves registry state as of `moment`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timewarp {
    pub host: String,
    pub moment: Timestamp,
}

/// The build environment a strategy renders against.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnv {
    /// The workspace already contains the cloned repository, so emitted
    /// scripts skip the `git clone`.
    #[serde(default)]
    pub has_repo: bool,
    /// Pin exact toolchain versions where the ecosystem supports it.
    #[serde(default)]
    pub prefer_precise_toolchain: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timewarp: Option<Timewarp>,
}

impl BuildEnv {
    /// The registry URL routed through the timewarp proxy for this
    /// ecosystem, when a host is configured.
    ///
    /// Most ecosystems use `http://<eco>:<RFC3339>@<host>`; crates.io
    /// gets the sparse-index form cargo understands.
    pub fn timewarp_url(&self, ecosystem: Ecosystem) -> Option<String> {
        let Timewarp { host, moment } = self.timewarp.as_ref()?;
        Some(match ecosystem {
            Ecosystem::CratesIo => {
                format!("sparse+http://cratesio:{moment}@{host}/index/")
            }
            _ => format!("http://{ecosystem}:{moment}@{host}"),
        })
    }
}

/// A concrete build: where the source lives, what to install, and the
/// three shell fragments the driver renders into a container script.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions {
    pub location: Location,
    /// Deduplicated, first-occurrence order.
    pub system_deps: Vec<String>,
    pub source: String,
    pub deps: String,
    pub build: String,
    /// Path of the built artifact, relative to the build workspace.
    pub output_path: Utf8PathBuf,
}

/// The template data every section resolves against.
fn template_data(location: &Location, target: &Target, env: &BuildEnv) -> Value {
    json!({
        "Location": {
            "repo": location.repo,
            "ref": location.git_ref,
            "dir": location.dir,
        },
        "Target": {
            "ecosystem": target.ecosystem.to_string(),
            "package": target.package,
            "version": target.version,
            "artifact": target.artifact,
        },
        "BuildEnv": {
            "has_repo": env.has_repo,
            "prefer_precise_toolchain": env.prefer_precise_toolchain,
            "timewarp": env.timewarp_url(target.ecosystem).unwrap_or_default(),
        },
    })
}

/// A strategy expressed directly in the flow DSL.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStrategy {
    pub location: Location,
    #[serde(default)]
    pub source: Vec<Step>,
    #[serde(default)]
    pub deps: Vec<Step>,
    #[serde(default)]
    pub build: Vec<Step>,
    /// Explicit system dependencies, unioned with whatever the resolved
    /// steps declare.
    #[serde(default)]
    pub system_deps: Vec<String>,
    /// Exact output path; mutually exclusive with `output_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<Utf8PathBuf>,
    /// Directory the artifact lands in; the file name is the target's
    /// artifact name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<Utf8PathBuf>,
}

impl WorkflowStrategy {
    /// Resolve every section against the given tool registry.
    pub fn generate_with(
        &self,
        registry: &ToolRegistry,
        target: &Target,
        env: &BuildEnv,
    ) -> Result<Instructions> {
        let data = template_data(&self.location, target, env);
        let source = flow::resolve_steps(registry, &self.source, &data)?;
        let deps = flow::resolve_steps(registry, &self.deps, &data)?;
        let build = flow::resolve_steps(registry, &self.build, &data)?;

        let system_deps = self
            .system_deps
            .iter()
            .cloned()
            .chain(source.needs)
            .chain(deps.needs)
            .chain(build.needs)
            .unique()
            .collect();

        let output_path = match (&self.output_path, &self.output_dir) {
            (Some(_), Some(_)) => return Err(Error::OutputPathConflict),
            (Some(path), None) => path.clone(),
            (None, Some(dir)) => dir.join(&target.artifact),
            (None, None) => Utf8PathBuf::from(target.artifact.as_str()),
        };

        Ok(Instructions {
            location: self.location.clone(),
            system_deps,
            source: source.script,
            deps: deps.script,
            build: build.script,
            output_path,
        })
    }
}

/// A raw strategy: script fields given verbatim by an operator-supplied
/// build definition. Fields are still templates, so definitions may
/// reference `Location`/`Target`/`BuildEnv`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualStrategy {
    pub location: Location,
    #[serde(default)]
    pub system_deps: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub deps: String,
    #[serde(default)]
    pub build: String,
    pub output_path: Utf8PathBuf,
}

impl ManualStrategy {
    fn to_workflow(&self) -> WorkflowStrategy {
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![Step::runs(self.source.as_str())],
            deps: vec![Step::runs(self.deps.as_str())],
            build: vec![Step::runs(self.build.as_str())],
            system_deps: self.system_deps.clone(),
            output_path: Some(self.output_path.clone()),
            output_dir: None,
        }
    }
}

/// A partial strategy carrying only repo (and optionally ref/dir),
/// used to constrain inference. It cannot build on its own.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationHint {
    pub location: Location,
}

impl LocationHint {
    /// A hint naming a dir without a ref is rejected: the dir is
    /// meaningless until a commit is chosen.
    pub fn validate(&self) -> Result<()> {
        if !self.location.dir.is_empty() && self.location.git_ref.is_empty() {
            return Err(Error::HintMissingRef);
        }
        Ok(())
    }
}

fn checkout_step() -> Step {
    Step::uses(
        "git/checkout",
        [
            ("repo", "{{Location.repo}}"),
            ("ref", "{{Location.ref}}"),
            ("has_repo", "{{#if BuildEnv.has_repo}}true{{/if}}"),
        ],
    )
}

/// `cargo package` build of a crate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct CargoPublish {
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rust_version: Option<String>,
}

impl CargoPublish {
    fn to_workflow(&self, env: &BuildEnv) -> WorkflowStrategy {
        let mut with = vec![
            ("dir".to_string(), "{{Location.dir}}".to_string()),
            ("registry".to_string(), "{{BuildEnv.timewarp}}".to_string()),
        ];
        if env.prefer_precise_toolchain {
            if let Some(rust_version) = &self.rust_version {
                with.push(("toolchain".to_string(), rust_version.clone()));
            }
        }
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![checkout_step()],
            build: vec![Step::uses("cargo/package", with)],
            output_dir: Some(join_dir(&self.location.dir, "target/package")),
            ..Default::default()
        }
    }
}

/// `npm pack` build of an npm tarball.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct NpmPack {
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_version: Option<String>,
}

impl NpmPack {
    fn to_workflow(&self) -> WorkflowStrategy {
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![checkout_step()],
            build: vec![Step::uses(
                "npm/pack",
                [
                    ("dir", "{{Location.dir}}"),
                    ("registry", "{{BuildEnv.timewarp}}"),
                ],
            )],
            output_dir: Some(dir_or_root(&self.location.dir)),
            ..Default::default()
        }
    }
}

/// PEP 517 wheel build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct PipInstall {
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
}

impl PipInstall {
    fn to_workflow(&self) -> WorkflowStrategy {
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![checkout_step()],
            build: vec![Step::uses(
                "pip/wheel",
                [
                    ("dir", "{{Location.dir}}"),
                    ("registry", "{{BuildEnv.timewarp}}"),
                ],
            )],
            output_dir: Some(join_dir(&self.location.dir, "dist")),
            ..Default::default()
        }
    }
}

/// Maven `package` build of a JAR.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct MavenBuild {
    pub location: Location,
    /// Major JDK version, e.g. `11`.
    pub jdk_version: String,
}

impl MavenBuild {
    fn to_workflow(&self) -> WorkflowStrategy {
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![checkout_step()],
            build: vec![Step::uses(
                "maven/package",
                [("dir", "{{Location.dir}}"), ("jdk", self.jdk_version.as_str())],
            )],
            output_dir: Some(join_dir(&self.location.dir, "target")),
            ..Default::default()
        }
    }
}

/// Gradle `assemble` build of a JAR.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct GradleBuild {
    pub location: Location,
    pub jdk_version: String,
    /// Submodule producing the target artifact, when not the root
    /// project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl GradleBuild {
    fn to_workflow(&self) -> WorkflowStrategy {
        let module_dir = self.module.clone().unwrap_or_default();
        let libs_dir = if module_dir.is_empty() {
            join_dir(&self.location.dir, "build/libs")
        } else {
            join_dir(&self.location.dir, &format!("{module_dir}/build/libs"))
        };
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![checkout_step()],
            build: vec![Step::uses(
                "gradle/assemble",
                [
                    ("dir", "{{Location.dir}}"),
                    ("jdk", self.jdk_version.as_str()),
                    ("module", module_dir.as_str()),
                ],
            )],
            output_dir: Some(libs_dir),
            ..Default::default()
        }
    }
}

/// `dpkg-buildpackage` build of a Debian binary package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct DpkgBuild {
    pub location: Location,
}

impl DpkgBuild {
    fn to_workflow(&self) -> WorkflowStrategy {
        // dpkg-buildpackage writes the .deb next to the source directory.
        let output_dir = match self.location.dir.rsplit_once('/') {
            Some((parent, _)) => Utf8PathBuf::from(parent),
            None => Utf8PathBuf::from("."),
        };
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![checkout_step()],
            build: vec![Step::uses(
                "dpkg/buildpackage",
                [("dir", "{{Location.dir}}")],
            )],
            output_dir: Some(output_dir),
            ..Default::default()
        }
    }
}

/// `gem build` of a RubyGem.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct GemBuild {
    pub location: Location,
}

impl GemBuild {
    fn to_workflow(&self) -> WorkflowStrategy {
        WorkflowStrategy {
            location: self.location.clone(),
            source: vec![checkout_step()],
            build: vec![Step::uses(
                "gem/build",
                [
                    ("dir", "{{Location.dir}}"),
                    ("gemspec", "{{Target.package}}.gemspec"),
                ],
            )],
            output_dir: Some(dir_or_root(&self.location.dir)),
            ..Default::default()
        }
    }
}

fn dir_or_root(dir: &str) -> Utf8PathBuf {
    if dir.is_empty() {
        Utf8PathBuf::from(".")
    } else {
        Utf8PathBuf::from(dir)
    }
}

fn join_dir(dir: &str, rest: &str) -> Utf8PathBuf {
    if dir.is_empty() {
        Utf8PathBuf::from(rest)
    } else {
        Utf8PathBuf::from(dir).join(rest)
    }
}

/// Every build plan the pipeline can hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    LocationHint(LocationHint),
    Manual(ManualStrategy),
    Workflow(WorkflowStrategy),
    CargoPublish(CargoPublish),
    NpmPack(NpmPack),
    PipInstall(PipInstall),
    MavenBuild(MavenBuild),
    GradleBuild(GradleBuild),
    DpkgBuild(DpkgBuild),
    GemBuild(GemBuild),
}

impl Strategy {
    /// Short name for verdicts and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocationHint(_) => "location_hint",
            Self::Manual(_) => "manual",
            Self::Workflow(_) => "workflow",
            Self::CargoPublish(_) => "cargo_publish",
            Self::NpmPack(_) => "npm_pack",
            Self::PipInstall(_) => "pip_install",
            Self::MavenBuild(_) => "maven_build",
            Self::GradleBuild(_) => "gradle_build",
            Self::DpkgBuild(_) => "dpkg_build",
            Self::GemBuild(_) => "gem_build",
        }
    }

    /// The source location, when the strategy carries one.
    pub fn location(&self) -> &Location {
        match self {
            Self::LocationHint(hint) => &hint.location,
            Self::Manual(manual) => &manual.location,
            Self::Workflow(workflow) => &workflow.location,
            Self::CargoPublish(cargo) => &cargo.location,
            Self::NpmPack(npm) => &npm.location,
            Self::PipInstall(pip) => &pip.location,
            Self::MavenBuild(maven) => &maven.location,
            Self::GradleBuild(gradle) => &gradle.location,
            Self::DpkgBuild(dpkg) => &dpkg.location,
            Self::GemBuild(gem) => &gem.location,
        }
    }

    /// Lower to the workflow form. Hints cannot build.
    pub fn to_workflow(&self, env: &BuildEnv) -> Result<WorkflowStrategy> {
        match self {
            Self::LocationHint(_) => Err(Error::HintCannotBuild),
            Self::Manual(manual) => Ok(manual.to_workflow()),
            Self::Workflow(workflow) => Ok(workflow.clone()),
            Self::CargoPublish(cargo) => Ok(cargo.to_workflow(env)),
            Self::NpmPack(npm) => Ok(npm.to_workflow()),
            Self::PipInstall(pip) => Ok(pip.to_workflow()),
            Self::MavenBuild(maven) => Ok(maven.to_workflow()),
            Self::GradleBuild(gradle) => Ok(gradle.to_workflow()),
            Self::DpkgBuild(dpkg) => Ok(dpkg.to_workflow()),
            Self::GemBuild(gem) => Ok(gem.to_workflow()),
        }
    }

    /// Produce concrete instructions using the default tool registry.
    pub fn generate_for(&self, target: &Target, env: &BuildEnv) -> Result<Instructions> {
        self.generate_with(flow::default_registry(), target, env)
    }

    /// Produce concrete instructions using an explicit tool registry.
    pub fn generate_with(
        &self,
        registry: &ToolRegistry,
        target: &Target,
        env: &BuildEnv,
    ) -> Result<Instructions> {
        self.to_workflow(env)?.generate_with(registry, target, env)
    }
}
