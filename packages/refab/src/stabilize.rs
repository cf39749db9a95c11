//! Format-aware archive canonicalization.
//!
//! Equivalence between a rebuilt artifact and the upstream one is defined
//! modulo a declared set of normalizations: archives carry timestamps,
//! owner ids, entry ordering, and signing detritus that differ between
//! builds without the contents differing. Stabilization rewrites an
//! archive into a canonical byte stream whose digest is invariant under
//! those normalizations.
//!
//! The pipeline is data, not code: a [`Stabilizer`] is a [`Format`] plus
//! an ordered list of named [`Op`]s over the materialized entry list.
//! Built-in operators run first (per-format, then per-artifact profile),
//! then any user-provided glob exclusions.

use std::io::Write;

use globset::{Glob, GlobSetBuilder};

use crate::{Error, Result, target::Target};

pub mod tar;
pub mod zip;

/// Archive container formats the stabilizer understands.
///
/// `Raw` passes bytes through untouched (non-archive artifacts such as
/// `.deb` files are digested as published). `Unknown` always fails.
#[derive(Copy, Clone, Eq, PartialEq, Debug, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    Zip,
    Tar,
    TarGz,
    Raw,
    Unknown,
}

impl Format {
    /// Detect the container format from an artifact file name.
    pub fn for_artifact(artifact: &str) -> Format {
        let lower = artifact.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") || lower.ends_with(".crate") {
            Format::TarGz
        } else if lower.ends_with(".zip")
            || lower.ends_with(".jar")
            || lower.ends_with(".whl")
            || lower.ends_with(".egg")
        {
            Format::Zip
        } else if lower.ends_with(".tar") || lower.ends_with(".gem") {
            Format::Tar
        } else if lower.ends_with(".deb") {
            Format::Raw
        } else {
            Format::Unknown
        }
    }
}

/// The type of one archive entry.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum EntryKind {
    File,
    Dir,
    Symlink { link: String },
}

/// One archive entry, normalized across container formats.
///
/// Fields a format does not carry (uid/gid for zip, comments for tar) are
/// simply unused by that format's writer.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    /// Modification time, seconds since the epoch.
    pub mtime: u64,
    pub uid: u64,
    pub gid: u64,
    pub mode: u32,
    pub body: Vec<u8>,
    /// Per-entry comment (zip only).
    pub comment: String,
}

impl Entry {
    /// A plain file entry; the starting point most tests and operators
    /// build from.
    pub fn file(name: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            mtime: 0,
            uid: 0,
            gid: 0,
            mode: 0o644,
            body: body.into(),
            comment: String::new(),
        }
    }
}

type ApplyFn = Box<dyn Fn(Vec<Entry>) -> Result<Vec<Entry>> + Send + Sync>;

/// A named transformation over the entry list.
pub struct Op {
    name: &'static str,
    apply: ApplyFn,
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Op").field(&self.name).finish()
    }
}

impl Op {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        (self.apply)(entries)
    }

    /// Sort entries by name.
    pub fn sort_entries() -> Self {
        Self {
            name: "sort_entries",
            apply: Box::new(|mut entries| {
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(entries)
            }),
        }
    }

    /// Zero modification times.
    pub fn zero_timestamps() -> Self {
        Self {
            name: "zero_timestamps",
            apply: Box::new(|mut entries| {
                for entry in &mut entries {
                    entry.mtime = 0;
                }
                Ok(entries)
            }),
        }
    }

    /// Zero user and group ids.
    pub fn zero_owners() -> Self {
        Self {
            name: "zero_owners",
            apply: Box::new(|mut entries| {
                for entry in &mut entries {
                    entry.uid = 0;
                    entry.gid = 0;
                }
                Ok(entries)
            }),
        }
    }

    /// Clamp file modes to a canonical value: 0o755 for directories,
    /// symlinks, and anything executable; 0o644 otherwise.
    pub fn clamp_modes() -> Self {
        Self {
            name: "clamp_modes",
            apply: Box::new(|mut entries| {
                for entry in &mut entries {
                    entry.mode = match entry.kind {
                        EntryKind::Dir | EntryKind::Symlink { .. } => 0o755,
                        EntryKind::File if entry.mode & 0o111 != 0 => 0o755,
                        EntryKind::File => 0o644,
                    };
                }
                Ok(entries)
            }),
        }
    }

    /// Strip non-essential headers: entry comments and anything the
    /// format writers do not re-emit (extra fields, OS ids).
    pub fn strip_headers() -> Self {
        Self {
            name: "strip_headers",
            apply: Box::new(|mut entries| {
                for entry in &mut entries {
                    entry.comment.clear();
                }
                Ok(entries)
            }),
        }
    }

    /// Remove entries whose names match any of the given globs.
    pub fn exclude_paths(globs: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for glob in globs {
            builder.add(
                Glob::new(glob)
                    .map_err(|err| Error::Configuration(format!("bad glob {glob:?}: {err}")))?,
            );
        }
        let set = builder
            .build()
            .map_err(|err| Error::Configuration(format!("bad glob set: {err}")))?;
        Ok(Self {
            name: "exclude_paths",
            apply: Box::new(move |entries| {
                Ok(entries
                    .into_iter()
                    .filter(|entry| !set.is_match(entry.name.trim_start_matches("./")))
                    .collect())
            }),
        })
    }

    /// Remove JAR signature files under `META-INF/`.
    pub fn strip_jar_signatures() -> Self {
        Self {
            name: "strip_jar_signatures",
            apply: Box::new(|entries| {
                Ok(entries
                    .into_iter()
                    .filter(|entry| {
                        let name = entry.name.trim_start_matches("./");
                        let Some(rest) = name.strip_prefix("META-INF/") else {
                            return true;
                        };
                        let upper = rest.to_ascii_uppercase();
                        !(upper.ends_with(".SF")
                            || upper.ends_with(".RSA")
                            || upper.ends_with(".DSA")
                            || upper.ends_with(".EC")
                            || upper.starts_with("SIG-"))
                    })
                    .collect())
            }),
        }
    }

    /// Trim wheel `RECORD` rows to their `path,hash,size` columns and drop
    /// detached `RECORD.jws` signature files.
    pub fn normalize_wheel_record() -> Self {
        Self {
            name: "normalize_wheel_record",
            apply: Box::new(|entries| {
                Ok(entries
                    .into_iter()
                    .filter(|entry| !entry.name.ends_with(".dist-info/RECORD.jws"))
                    .map(|mut entry| {
                        if entry.name.ends_with(".dist-info/RECORD") {
                            let trimmed: String = String::from_utf8_lossy(&entry.body)
                                .lines()
                                .map(|line| {
                                    line.splitn(4, ',').take(3).collect::<Vec<_>>().join(",")
                                })
                                .collect::<Vec<_>>()
                                .join("\n");
                            entry.body = trimmed.into_bytes();
                            if !entry.body.is_empty() {
                                entry.body.push(b'\n');
                            }
                        }
                        entry
                    })
                    .collect())
            }),
        }
    }

    /// Remove cargo's VCS fingerprint file from `.crate` archives.
    pub fn strip_cargo_vcs_info() -> Self {
        Self {
            name: "strip_cargo_vcs_info",
            apply: Box::new(|entries| {
                Ok(entries
                    .into_iter()
                    .filter(|entry| {
                        let name = entry.name.trim_start_matches("./");
                        name != ".cargo_vcs_info.json"
                            && !name.ends_with("/.cargo_vcs_info.json")
                    })
                    .collect())
            }),
        }
    }
}

/// The built-in operator pipeline for an archive format.
fn builtin_ops(format: Format) -> Vec<Op> {
    match format {
        Format::Tar | Format::TarGz => vec![
            Op::sort_entries(),
            Op::zero_timestamps(),
            Op::zero_owners(),
            Op::clamp_modes(),
        ],
        Format::Zip => vec![
            Op::sort_entries(),
            Op::zero_timestamps(),
            Op::zero_owners(),
            Op::clamp_modes(),
            Op::strip_headers(),
        ],
        Format::Raw | Format::Unknown => Vec::new(),
    }
}

/// Artifact-profile operators appended after the format built-ins.
fn profile_ops(artifact: &str) -> Vec<Op> {
    let lower = artifact.to_ascii_lowercase();
    if lower.ends_with(".jar") {
        vec![Op::strip_jar_signatures()]
    } else if lower.ends_with(".whl") {
        vec![Op::normalize_wheel_record()]
    } else if lower.ends_with(".crate") {
        vec![Op::strip_cargo_vcs_info()]
    } else {
        Vec::new()
    }
}

/// A configured stabilization pipeline for one artifact.
#[derive(Debug)]
pub struct Stabilizer {
    format: Format,
    ops: Vec<Op>,
}

impl Stabilizer {
    /// Build the pipeline for a target: detected format, format built-ins,
    /// then the artifact-profile operators.
    pub fn for_target(target: &Target) -> Self {
        let format = Format::for_artifact(&target.artifact);
        let mut ops = builtin_ops(format);
        ops.extend(profile_ops(&target.artifact));
        Self { format, ops }
    }

    /// A pipeline over an explicit format with only the format built-ins.
    pub fn for_format(format: Format) -> Self {
        Self {
            format,
            ops: builtin_ops(format),
        }
    }

    /// Append user-provided operators. These always run after the
    /// built-ins.
    pub fn with_ops(mut self, extra: impl IntoIterator<Item = Op>) -> Self {
        self.ops.extend(extra);
        self
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Canonicalize `input` into `output`.
    ///
    /// Archives are materialized as an entry list because several
    /// container formats (zip in particular) require random access; the
    /// verifier still arranges a single pass over the input by teeing the
    /// raw stream into the raw hasher as it buffers.
    pub fn run(&self, input: &[u8], output: &mut dyn Write) -> Result<()> {
        match self.format {
            Format::Unknown => Err(Error::UnsupportedFormat("unknown".to_string())),
            Format::Raw => {
                output.write_all(input)?;
                Ok(())
            }
            Format::Tar => {
                let entries = self.apply_ops(tar::read_entries(input)?)?;
                tar::write_entries(output, &entries)
            }
            Format::TarGz => {
                let entries = self.apply_ops(tar::read_gz_entries(input)?)?;
                tar::write_gz_entries(output, &entries)
            }
            Format::Zip => {
                let entries = self.apply_ops(zip::read_entries(input)?)?;
                zip::write_entries(output, &entries)
            }
        }
    }

    /// Canonicalize `input` and return the bytes.
    pub fn run_to_vec(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.run(input, &mut out)?;
        Ok(out)
    }

    fn apply_ops(&self, mut entries: Vec<Entry>) -> Result<Vec<Entry>> {
        for op in &self.ops {
            entries = op.apply(entries)?;
        }
        Ok(entries)
    }
}
