//! JVM-specific inference: toolchain versions and Maven/Gradle ref and
//! module heuristics.

use tracing::{debug, trace};

use crate::{Result, git::Repo, registry::maven::Pom, stabilize};

use super::levenshtein;

/// Fallback when no JDK signal can be read from the artifact: a stable
/// LTS release.
pub const DEFAULT_JDK: &str = "17";

/// Normalize a JDK version string to its major release: `1.8.0_292` is 8,
/// `11.0.2` is 11.
fn normalize_jdk(version: &str) -> Option<String> {
    let mut parts = version.trim().split(['.', '_', '+', '-']);
    let first: u32 = parts.next()?.parse().ok()?;
    let major = if first == 1 {
        parts.next()?.parse().ok()?
    } else {
        first
    };
    Some(major.to_string())
}

/// Read the JDK major version from `META-INF/MANIFEST.MF` content:
/// `Build-Jdk-Spec` wins over `Build-Jdk`.
pub fn jdk_from_manifest(manifest: &str) -> Option<String> {
    for key in ["Build-Jdk-Spec:", "Build-Jdk:"] {
        if let Some(version) = manifest
            .lines()
            .find_map(|line| line.strip_prefix(key))
            .and_then(normalize_jdk)
        {
            return Some(version);
        }
    }
    None
}

/// Infer the minimum JDK from a classfile's major version (major − 44).
pub fn jdk_from_classfile(class: &[u8]) -> Option<String> {
    if class.len() < 8 || class[0..4] != [0xCA, 0xFE, 0xBA, 0xBE] {
        return None;
    }
    let major = u16::from_be_bytes([class[6], class[7]]);
    if major < 45 {
        return None;
    }
    Some((major as u32 - 44).to_string())
}

/// Infer the JDK used to build a JAR: manifest headers first, then the
/// classfile version of an arbitrary `.class` member.
pub fn jdk_from_jar(jar: &[u8]) -> Option<String> {
    let entries = stabilize::zip::read_entries(jar).ok()?;
    if let Some(manifest) = entries
        .iter()
        .find(|entry| entry.name == "META-INF/MANIFEST.MF")
    {
        if let Some(version) = jdk_from_manifest(&String::from_utf8_lossy(&manifest.body)) {
            return Some(version);
        }
    }
    entries
        .iter()
        .find(|entry| entry.name.ends_with(".class"))
        .and_then(|class| jdk_from_classfile(&class.body))
}

/// Search recent commits for a `pom.xml` whose `<version>` equals the
/// target version. Returns `(commit, pom path)` for the newest match.
pub fn pom_version_commit(
    repo: &Repo,
    version: &str,
    limit: usize,
) -> Result<Option<(String, String)>> {
    for commit in repo.recent_commits(limit)? {
        let poms: Vec<String> = repo
            .list_files_at(&commit)?
            .into_iter()
            .filter(|path| path == "pom.xml" || path.ends_with("/pom.xml"))
            .collect();
        for path in poms {
            let Some(bytes) = repo.read_file_at(&commit, &path)? else {
                continue;
            };
            let Ok(pom) = quick_xml::de::from_reader::<_, Pom>(bytes.as_slice()) else {
                trace!(%commit, %path, "unparseable pom");
                continue;
            };
            if pom.version.as_deref() == Some(version) {
                debug!(%commit, %path, "found pom with matching version");
                return Ok(Some((commit, path)));
            }
        }
    }
    Ok(None)
}

/// The directory of the `build.gradle(.kts)` whose name is closest (by
/// edit distance) to the artifact id. `src/**` and `gradle/**` never
/// qualify. Ties keep the first candidate in path order; multi-module
/// trees where several modules could plausibly produce the artifact are
/// inherently ambiguous.
pub fn gradle_module_dir(files: &[String], artifact_id: &str) -> Option<String> {
    let mut candidates: Vec<String> = files
        .iter()
        .filter(|path| {
            path.ends_with("build.gradle") || path.ends_with("build.gradle.kts")
        })
        .map(|path| match path.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        })
        .filter(|dir| {
            !dir.starts_with("src/")
                && dir != "src"
                && !dir.starts_with("gradle/")
                && dir != "gradle"
        })
        .collect();
    candidates.sort();
    candidates.dedup();

    candidates
        .into_iter()
        .min_by_key(|dir| {
            let name = dir.rsplit('/').next().unwrap_or(dir.as_str());
            levenshtein(name, artifact_id)
        })
        .inspect(|dir| debug!(%dir, %artifact_id, "selected gradle module"))
}

/// Last-resort ref heuristic: score commits by how many `.java` files of
/// the upstream sources JAR their trees contain.
pub fn source_jar_ref(repo: &Repo, sources_jar: &[u8], limit: usize) -> Result<Option<String>> {
    let entries = match stabilize::zip::read_entries(sources_jar) {
        Ok(entries) => entries,
        Err(_) => return Ok(None),
    };
    let wanted: Vec<&str> = entries
        .iter()
        .filter(|entry| entry.name.ends_with(".java"))
        .map(|entry| entry.name.as_str())
        .collect();
    if wanted.is_empty() {
        return Ok(None);
    }

    let mut best: Option<(usize, String)> = None;
    for commit in repo.recent_commits(limit)? {
        let tree_files = repo.list_files_at(&commit)?;
        // Source JAR paths are package-relative; repository paths carry
        // a source-root prefix like src/main/java/.
        let score = wanted
            .iter()
            .filter(|wanted| {
                tree_files
                    .iter()
                    .any(|path| path.ends_with(*wanted))
            })
            .count();
        trace!(%commit, score, "source jar overlap");
        if score > 0 && best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
            best = Some((score, commit));
        }
    }
    Ok(best.map(|(_, commit)| commit))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use simple_test_case::test_case;

    use super::*;

    #[test_case("Build-Jdk-Spec: 11", Some("11"); "spec")]
    #[test_case("Build-Jdk: 1.8.0_292", Some("8"); "legacy_scheme")]
    #[test_case("Build-Jdk: 17.0.2", Some("17"); "modern")]
    #[test_case("Manifest-Version: 1.0", None; "absent")]
    #[test]
    fn manifest_jdk(manifest: &str, expected: Option<&str>) {
        pretty_assert_eq!(jdk_from_manifest(manifest).as_deref(), expected);
    }

    #[test]
    fn manifest_spec_wins_over_build_jdk() {
        let manifest = "Build-Jdk: 1.8.0_292\nBuild-Jdk-Spec: 11\n";
        pretty_assert_eq!(jdk_from_manifest(manifest).as_deref(), Some("11"));
    }

    #[test]
    fn classfile_major_maps_to_jdk() {
        // major 55 => JDK 11 (seed case: MANIFEST.MF without Build-Jdk).
        let class = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x37];
        pretty_assert_eq!(jdk_from_classfile(&class).as_deref(), Some("11"));
        // major 52 => JDK 8.
        let class = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
        pretty_assert_eq!(jdk_from_classfile(&class).as_deref(), Some("8"));
        assert!(jdk_from_classfile(b"not a classfile").is_none());
    }

    #[test]
    fn gradle_module_prefers_closest_name() {
        let files = vec![
            "build.gradle".to_string(),
            "api/build.gradle".to_string(),
            "core/build.gradle".to_string(),
            "integration-tests/build.gradle".to_string(),
            "gradle/wrapper/build.gradle".to_string(),
            "src/build.gradle".to_string(),
        ];
        pretty_assert_eq!(
            gradle_module_dir(&files, "example-api").as_deref(),
            Some("api")
        );
    }

    #[test]
    fn gradle_module_skips_excluded_trees() {
        let files = vec![
            "gradle/api/build.gradle".to_string(),
            "src/api/build.gradle".to_string(),
        ];
        pretty_assert_eq!(gradle_module_dir(&files, "api"), None);
    }
}
