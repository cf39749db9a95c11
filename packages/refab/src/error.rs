//! Error taxonomy for the rebuild pipeline.
//!
//! Every operation in this crate returns [`Result`]. Variants are grouped
//! by kind: configuration, inference, network, build, stabilization, flow,
//! asset, attestation, internal. Equivalence mismatches are deliberately
//! not represented here: a mismatch is a verdict outcome, carried by
//! [`crate::rebuild::Verdict`], not an error.

/// Result type for the rebuild pipeline.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the rebuild pipeline.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    // Configuration: misaligned inputs, fatal and surfaced as given.
    #[error("unsupported ecosystem: {0}")]
    UnsupportedEcosystem(String),
    #[error("output dir and output path are mutually exclusive")]
    OutputPathConflict,
    #[error("location hint with a dir requires a ref")]
    HintMissingRef,
    #[error("a location hint cannot produce build instructions")]
    HintCannotBuild,
    #[error("configuration: {0}")]
    Configuration(String),

    // Inference: per-target fatal, surfaced in the verdict.
    #[error("no source repository found for {0}")]
    NoRepoFound(String),
    #[error("no git ref found for version {0}")]
    NoGitRef(String),
    #[error("no JDK version could be inferred")]
    NoJdk,
    #[error("no pom.xml found in repository")]
    NoPomXml,
    #[error("package name mismatch: expected {expected}, found {found}")]
    MismatchedName { expected: String, found: String },
    #[error("package version mismatch: expected {expected}, found {found}")]
    MismatchedVersion { expected: String, found: String },
    #[error("repository is invalid or requires authentication: {0}")]
    RepoInvalidOrPrivate(String),

    // Network: registry, object store, and VCS transport failures.
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected status {status} from {url}")]
    Http { url: String, status: u16 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("object store error: {0}")]
    ObjectStore(String),

    // Build: the remote build failed or produced nothing usable.
    #[error("build failed: {0}")]
    BuildFailed(String),
    #[error("build exceeded its deadline")]
    BuildTimeout,
    #[error("build output missing at {0}")]
    MissingOutput(String),

    // Stabilization.
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    // Flow engine.
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool already registered: {0}")]
    ToolExists(String),
    #[error("invalid step: {0}")]
    InvalidStep(String),
    #[error("template error: {0}")]
    Template(#[from] Box<handlebars::RenderError>),

    // Asset store.
    #[error("asset not found: {0}")]
    AssetNotFound(String),

    // Attestation.
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("attestation bundle already exists")]
    BundleExists,
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violations recovered at the per-target boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<handlebars::RenderError> for Error {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Template(Box::new(err))
    }
}

impl Error {
    /// True when the error indicates the requested thing does not exist,
    /// as opposed to a transport or server failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::AssetNotFound(_))
    }
}
