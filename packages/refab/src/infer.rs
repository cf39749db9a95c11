//! Build strategy inference.
//!
//! Every ecosystem follows the same contract: resolve the source
//! repository URL from registry metadata, choose the commit that produced
//! the release (tag match first, then ecosystem heuristics), choose the
//! build directory, infer toolchain versions, and return the strategy
//! variant for the detected build system. A caller-supplied
//! [`LocationHint`] constrains any of these choices.

use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    Error, Result,
    git::Repo,
    registry::{PackageInfo, Registry, maven::split_coordinate},
    strategy::{
        CargoPublish, DpkgBuild, GemBuild, GradleBuild, Location, LocationHint, MavenBuild,
        NpmPack, PipInstall, Strategy,
    },
    target::{Ecosystem, Target},
};

pub mod jvm;
pub mod refs;

/// How many commits the fallback heuristics walk before giving up.
const COMMIT_SEARCH_LIMIT: usize = 512;

/// Canonicalize a repository URL candidate.
///
/// Strips `git+` prefixes, `.git` suffixes, queries and fragments;
/// rewrites `git@host:path` and `git://` forms; for the major forges,
/// keeps only the `owner/repo` path (dropping `/issues`, `/tree/...`).
/// Returns `None` for strings that do not look like a repository URL.
pub fn canonicalize_repo_url(raw: &str) -> Option<String> {
    let mut candidate = raw.trim().to_string();
    if candidate.is_empty() {
        return None;
    }
    if let Some(rest) = candidate.strip_prefix("git+") {
        candidate = rest.to_string();
    }
    // scp-like syntax: git@github.com:owner/repo.git
    if let Some(rest) = candidate.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            candidate = format!("https://{host}/{path}");
        }
    }
    if let Some(rest) = candidate.strip_prefix("git://") {
        candidate = format!("https://{rest}");
    }
    if let Some(rest) = candidate.strip_prefix("ssh://git@") {
        candidate = format!("https://{rest}");
    }

    let mut url = Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    let host = url.host_str()?.to_string();

    let mut segments: Vec<String> = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .map(String::from)
        .collect();
    if segments.is_empty() {
        return None;
    }
    if let Some(last) = segments.last_mut() {
        if let Some(stripped) = last.strip_suffix(".git") {
            *last = stripped.to_string();
        }
    }
    const FORGES: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];
    if FORGES.contains(&host.as_str()) {
        if segments.len() < 2 {
            return None;
        }
        segments.truncate(2);
    }
    Some(format!("{}://{host}/{}", url.scheme(), segments.join("/")))
}

/// Resolve the repository URL from package metadata, in preference order:
/// explicit source URL, homepage, bug tracker.
pub fn resolve_repo(info: &PackageInfo) -> Result<String> {
    info.repo_candidates()
        .find_map(canonicalize_repo_url)
        .ok_or_else(|| Error::NoRepoFound(info.name.clone()))
}

/// The forge organization of a canonical repo URL
/// (`https://github.com/<org>/<repo>`).
pub fn repo_org(repo_url: &str) -> Option<String> {
    let url = Url::parse(repo_url).ok()?;
    let mut segments = url.path_segments()?;
    segments.next().map(String::from)
}

/// Levenshtein edit distance; small inputs only.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Pick the commit for a target: hint ref first, then tag matching, then
/// the ecosystem-specific fallbacks.
fn resolve_ref(
    target: &Target,
    repo: &Repo,
    hint: Option<&LocationHint>,
    org: Option<&str>,
) -> Result<Option<String>> {
    if let Some(hint) = hint {
        if !hint.location.git_ref.is_empty() {
            let commit = repo.resolve_commit(&hint.location.git_ref)?;
            return Ok(Some(commit));
        }
    }
    let tags = repo.tags()?;
    if let Some(matched) = refs::find_tag_match(&tags, &target.package, &target.version, org) {
        debug!(tag = %matched.tag, strict = matched.strict, "matched release tag");
        return Ok(Some(repo.tag_commit(&matched.tag)?));
    }
    Ok(None)
}

/// Manifest directories at a commit: files named `manifest`, not under
/// `src/**` or `gradle/**`, shortest path first.
fn manifest_dirs(files: &[String], manifest: &str) -> Vec<(String, String)> {
    let mut candidates: Vec<(String, String)> = files
        .iter()
        .filter_map(|path| {
            let (dir, name) = match path.rsplit_once('/') {
                Some((dir, name)) => (dir.to_string(), name),
                None => (String::new(), path.as_str()),
            };
            (name == manifest).then(|| (dir, path.clone()))
        })
        .filter(|(dir, _)| {
            !dir.starts_with("src/")
                && dir != "src"
                && !dir.starts_with("gradle/")
                && dir != "gradle"
        })
        .collect();
    candidates.sort_by_key(|(dir, _)| (dir.len(), dir.clone()));
    candidates
}

/// Find the directory of the manifest whose contents mention the package
/// name; falls back to the shortest-path manifest.
fn dir_by_manifest_content(
    repo: &Repo,
    commit: &str,
    files: &[String],
    manifest: &str,
    package_marker: &str,
) -> Result<Option<String>> {
    let candidates = manifest_dirs(files, manifest);
    for (dir, path) in &candidates {
        if let Some(bytes) = repo.read_file_at(commit, path)? {
            if String::from_utf8_lossy(&bytes).contains(package_marker) {
                return Ok(Some(dir.clone()));
            }
        }
    }
    Ok(candidates.into_iter().next().map(|(dir, _)| dir))
}

/// Infer a build strategy for the target.
///
/// `repo` must already be cloned at the URL resolved from registry
/// metadata (or the hint). The hint, when present, wins for every field
/// it sets.
#[instrument(skip(registry, repo), fields(target = %target))]
pub async fn infer_strategy(
    target: &Target,
    registry: &Registry,
    repo: &Repo,
    hint: Option<&LocationHint>,
) -> Result<Strategy> {
    if let Some(hint) = hint {
        hint.validate()?;
    }
    let org = repo_org(repo.url());
    let commit = resolve_ref(target, repo, hint, org.as_deref())?;

    match target.ecosystem {
        Ecosystem::CratesIo => {
            let commit = commit.ok_or_else(|| Error::NoGitRef(target.version.clone()))?;
            let dir = match hint.and_then(|h| hint_dir(h)) {
                Some(dir) => dir,
                None => {
                    let files = repo.list_files_at(&commit)?;
                    dir_by_manifest_content(
                        repo,
                        &commit,
                        &files,
                        "Cargo.toml",
                        &format!("name = \"{}\"", target.package),
                    )?
                    .unwrap_or_default()
                }
            };
            let rust_version = registry
                .cratesio
                .version(&target.package, &target.version)
                .await
                .ok()
                .and_then(|version| version.rust_version);
            Ok(Strategy::CargoPublish(CargoPublish {
                location: location(repo, commit, dir),
                rust_version,
            }))
        }

        Ecosystem::Npm => {
            let commit = commit.ok_or_else(|| Error::NoGitRef(target.version.clone()))?;
            let dir = match hint.and_then(|h| hint_dir(h)) {
                Some(dir) => dir,
                None => {
                    let files = repo.list_files_at(&commit)?;
                    dir_by_manifest_content(
                        repo,
                        &commit,
                        &files,
                        "package.json",
                        &format!("\"{}\"", target.package),
                    )?
                    .unwrap_or_default()
                }
            };
            Ok(Strategy::NpmPack(NpmPack {
                location: location(repo, commit, dir),
                node_version: None,
            }))
        }

        Ecosystem::Pypi => {
            let commit = commit.ok_or_else(|| Error::NoGitRef(target.version.clone()))?;
            let dir = match hint.and_then(|h| hint_dir(h)) {
                Some(dir) => dir,
                None => {
                    let files = repo.list_files_at(&commit)?;
                    manifest_dirs(&files, "pyproject.toml")
                        .into_iter()
                        .next()
                        .or_else(|| manifest_dirs(&files, "setup.py").into_iter().next())
                        .map(|(dir, _)| dir)
                        .unwrap_or_default()
                }
            };
            Ok(Strategy::PipInstall(PipInstall {
                location: location(repo, commit, dir),
                python_version: None,
            }))
        }

        Ecosystem::Maven => infer_jvm(target, registry, repo, hint, commit).await,

        Ecosystem::RubyGems => {
            let commit = commit.ok_or_else(|| Error::NoGitRef(target.version.clone()))?;
            let dir = match hint.and_then(|h| hint_dir(h)) {
                Some(dir) => dir,
                None => {
                    let files = repo.list_files_at(&commit)?;
                    manifest_dirs(&files, &format!("{}.gemspec", target.package))
                        .into_iter()
                        .next()
                        .map(|(dir, _)| dir)
                        .unwrap_or_default()
                }
            };
            Ok(Strategy::GemBuild(GemBuild {
                location: location(repo, commit, dir),
            }))
        }

        Ecosystem::Debian => {
            // Debian rebuilds run from the packaging tree itself; the ref
            // is whatever the repo serves unless a hint pins one.
            let commit = match commit {
                Some(commit) => commit,
                None => repo.head_commit()?,
            };
            let dir = hint.and_then(|h| hint_dir(h)).unwrap_or_default();
            Ok(Strategy::DpkgBuild(DpkgBuild {
                location: location(repo, commit, dir),
            }))
        }

        Ecosystem::Go => Err(Error::UnsupportedEcosystem("go".to_string())),
    }
}

fn hint_dir(hint: &LocationHint) -> Option<String> {
    (!hint.location.dir.is_empty()).then(|| hint.location.dir.clone())
}

fn location(repo: &Repo, commit: String, dir: String) -> Location {
    Location {
        repo: repo.url().to_string(),
        git_ref: commit,
        dir,
    }
}

/// Maven/Gradle inference: JVM ref fallbacks, build directory, JDK.
async fn infer_jvm(
    target: &Target,
    registry: &Registry,
    repo: &Repo,
    hint: Option<&LocationHint>,
    tag_commit: Option<String>,
) -> Result<Strategy> {
    let (_, artifact_id) = split_coordinate(&target.package)?;

    // Ref: tag match, then pom <version> search, then the source-JAR
    // content heuristic.
    let mut pom_path: Option<String> = None;
    let commit = match tag_commit {
        Some(commit) => commit,
        None => {
            if let Some((commit, path)) =
                jvm::pom_version_commit(repo, &target.version, COMMIT_SEARCH_LIMIT)?
            {
                pom_path = Some(path);
                commit
            } else {
                let sources = registry
                    .maven
                    .classified_bytes(&target.package, &target.version, "sources", "jar")
                    .await;
                match sources {
                    Ok(jar) => jvm::source_jar_ref(repo, &jar, COMMIT_SEARCH_LIMIT)?
                        .ok_or_else(|| Error::NoGitRef(target.version.clone()))?,
                    Err(err) => {
                        warn!(%err, "no sources jar for content heuristic");
                        return Err(Error::NoGitRef(target.version.clone()));
                    }
                }
            }
        }
    };

    let files = repo.list_files_at(&commit)?;
    let has_pom = !manifest_dirs(&files, "pom.xml").is_empty();
    let has_gradle = files.iter().any(|path| {
        path.ends_with("build.gradle") || path.ends_with("build.gradle.kts")
    });

    // JDK: upstream JAR headers, classfile major, then the LTS default.
    let jdk_version = match registry.artifact_bytes(target).await {
        Ok(jar) => jvm::jdk_from_jar(&jar).unwrap_or_else(|| jvm::DEFAULT_JDK.to_string()),
        Err(err) => {
            warn!(%err, "could not fetch upstream jar for JDK inference");
            jvm::DEFAULT_JDK.to_string()
        }
    };

    if has_gradle && !has_pom {
        let module = jvm::gradle_module_dir(&files, artifact_id).filter(|dir| !dir.is_empty());
        let dir = hint.and_then(|h| hint_dir(h)).unwrap_or_default();
        return Ok(Strategy::GradleBuild(GradleBuild {
            location: location(repo, commit, dir),
            jdk_version,
            module,
        }));
    }
    if !has_pom {
        return Err(Error::NoPomXml);
    }

    // Build directory: the matched pom's directory, else content search.
    let dir = match hint.and_then(|h| hint_dir(h)) {
        Some(dir) => dir,
        None => match &pom_path {
            Some(path) => path.rsplit_once('/').map(|(dir, _)| dir.to_string()).unwrap_or_default(),
            None => dir_by_manifest_content(
                repo,
                &commit,
                &files,
                "pom.xml",
                &format!("<artifactId>{artifact_id}</artifactId>"),
            )?
            .unwrap_or_default(),
        },
    };

    Ok(Strategy::MavenBuild(MavenBuild {
        location: location(repo, commit, dir),
        jdk_version,
    }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use simple_test_case::test_case;

    use super::*;

    #[test_case("https://github.com/tokio-rs/bytes", Some("https://github.com/tokio-rs/bytes"); "already_canonical")]
    #[test_case("git+https://github.com/stevemao/left-pad.git", Some("https://github.com/stevemao/left-pad"); "git_plus_and_suffix")]
    #[test_case("git@github.com:foo/bar.git", Some("https://github.com/foo/bar"); "scp_form")]
    #[test_case("git://github.com/foo/bar", Some("https://github.com/foo/bar"); "git_scheme")]
    #[test_case("https://github.com/foo/bar/issues", Some("https://github.com/foo/bar"); "issues_path_trimmed")]
    #[test_case("https://github.com/foo/bar/tree/main/sub", Some("https://github.com/foo/bar"); "tree_path_trimmed")]
    #[test_case("https://example.com/repos/deep/path", Some("https://example.com/repos/deep/path"); "non_forge_keeps_path")]
    #[test_case("http://github.com/foo/bar", Some("http://github.com/foo/bar"); "http_preserved")]
    #[test_case("not a url", None; "garbage")]
    #[test_case("https://github.com/onlyorg", None; "forge_without_repo")]
    #[test_case("", None; "empty")]
    #[test]
    fn canonicalize(input: &str, expected: Option<&str>) {
        pretty_assert_eq!(canonicalize_repo_url(input).as_deref(), expected);
    }

    #[test]
    fn resolve_repo_prefers_source_url() {
        let info = PackageInfo {
            name: "pkg".to_string(),
            repository: Some("git+https://github.com/a/b.git".to_string()),
            homepage: Some("https://github.com/c/d".to_string()),
            bug_tracker: None,
        };
        pretty_assert_eq!(resolve_repo(&info).unwrap(), "https://github.com/a/b");
    }

    #[test]
    fn resolve_repo_falls_back_through_candidates() {
        let info = PackageInfo {
            name: "pkg".to_string(),
            repository: Some("not a url".to_string()),
            homepage: None,
            bug_tracker: Some("https://github.com/c/d/issues".to_string()),
        };
        pretty_assert_eq!(resolve_repo(&info).unwrap(), "https://github.com/c/d");
    }

    #[test]
    fn resolve_repo_fails_without_candidates() {
        let info = PackageInfo {
            name: "pkg".to_string(),
            ..Default::default()
        };
        assert!(matches!(resolve_repo(&info), Err(Error::NoRepoFound(_))));
    }

    #[test]
    fn repo_org_reads_first_segment() {
        pretty_assert_eq!(
            repo_org("https://github.com/tokio-rs/bytes").as_deref(),
            Some("tokio-rs")
        );
    }

    #[test_case("", "", 0; "both_empty")]
    #[test_case("api", "api", 0; "equal")]
    #[test_case("api", "example-api", 8; "suffix")]
    #[test_case("kitten", "sitting", 3; "classic")]
    #[test]
    fn edit_distance(a: &str, b: &str, expected: usize) {
        pretty_assert_eq!(levenshtein(a, b), expected);
    }

    #[test]
    fn manifest_dirs_excludes_src_and_gradle() {
        let files = vec![
            "pom.xml".to_string(),
            "core/pom.xml".to_string(),
            "src/test/pom.xml".to_string(),
            "gradle/pom.xml".to_string(),
        ];
        let dirs: Vec<String> = manifest_dirs(&files, "pom.xml")
            .into_iter()
            .map(|(dir, _)| dir)
            .collect();
        pretty_assert_eq!(dirs, vec![String::new(), "core".to_string()]);
    }
}
