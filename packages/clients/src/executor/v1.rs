//! Build executor v1 API types and client.

use bon::Builder;
use derive_more::Display;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "client")]
mod client;

#[cfg(feature = "client")]
pub use client::Client;

/// A request to run one sandboxed container build.
///
/// The executor materializes the Dockerfile, runs the requested sidecars,
/// and copies whatever the build leaves in `/out` to the configured
/// destination before reporting back.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct BuildRequest {
    /// Unique id for this build attempt. Doubles as the provenance
    /// invocation id.
    pub build_id: Uuid,
    pub ecosystem: String,
    pub package: String,
    pub version: String,
    pub artifact: String,
    /// The full Dockerfile to execute.
    pub dockerfile: String,
    /// Where the executor should place the built artifact.
    pub output_destination: String,
    /// Run the build behind the recording TLS-terminating network proxy.
    #[serde(default)]
    #[builder(default)]
    pub use_network_proxy: bool,
    /// Attach the privileged syscall-tracing sidecar.
    #[serde(default)]
    #[builder(default)]
    pub use_syscall_monitor: bool,
    /// Build deadline in seconds; the executor aborts past it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// The digest of one builder container image used during a build.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct StepImage {
    /// Image reference, e.g. `docker.io/library/alpine:3.19`.
    pub image: String,
    /// Digest of the resolved image, e.g. `sha256:abc...`.
    pub digest: String,
}

/// Terminal status of a build as reported by the executor.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[display("success")]
    Success,
    #[display("failure")]
    Failure,
    #[display("timeout")]
    Timeout,
}

/// The executor's report for a completed (or failed) build.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
pub struct BuildReport {
    pub build_id: Uuid,
    pub status: BuildStatus,
    /// Identity of the builder service, used as the provenance builder id.
    pub builder_id: String,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Resolved image digests for each build step, in execution order.
    #[serde(default)]
    #[builder(default)]
    pub steps: Vec<StepImage>,
    /// Tail of the build log, for diagnostics on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
}
