//! Version-tag matching.
//!
//! The first ref-selection heuristic for every ecosystem: find a tag that
//! names the released version. A strict match requires the version to
//! appear delimited by non-digit boundaries (so `1.0.0` never matches
//! inside `11.0.0` or `1.2.0` inside `v1.1.2.0`) and not continued by a
//! pre-release suffix (`-rc1`, `-beta`, ...). A lax match tolerates
//! separator drift (`1_0_0`). Tags that mention an organization but not
//! the package are dampened relative to tags naming the package.

use tracing::trace;

/// A candidate tag for a version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagMatch {
    pub tag: String,
    pub strict: bool,
}

const PRERELEASE_WORDS: &[&str] = &["rc", "beta", "alpha", "pre", "snapshot", "dev", "milestone"];

/// True when `rest` begins with a pre-release continuation of the matched
/// version.
fn is_prerelease_continuation(rest: &str) -> bool {
    let rest = rest.trim_start_matches(['-', '.', '_']).to_ascii_lowercase();
    PRERELEASE_WORDS.iter().any(|word| {
        rest.strip_prefix(word).is_some_and(|after| {
            after.is_empty() || after.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
        })
    })
}

/// Find a strict occurrence of `version` in `tag`: non-digit,
/// non-dot-adjacent boundaries and no pre-release continuation.
fn strict_occurrence(tag: &str, version: &str) -> bool {
    let mut search_from = 0;
    while let Some(offset) = tag[search_from..].find(version) {
        let start = search_from + offset;
        let end = start + version.len();
        let before_ok = tag[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_ascii_digit() && c != '.');
        let after = &tag[end..];
        let after_ok = after
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_digit());
        if before_ok && after_ok && !is_prerelease_continuation(after) {
            return true;
        }
        search_from = end;
    }
    false
}

/// Match one tag against a package version.
pub fn match_tag(tag: &str, version: &str) -> Option<TagMatch> {
    if strict_occurrence(tag, version) {
        return Some(TagMatch {
            tag: tag.to_string(),
            strict: true,
        });
    }
    // Lax: tolerate separator drift between the tag and the version.
    let normalize = |s: &str| s.replace(['-', '_'], ".");
    let normalized_tag = normalize(tag);
    let normalized_version = normalize(version);
    if normalized_version != version || normalized_tag != tag {
        if strict_occurrence(&normalized_tag, &normalized_version) {
            return Some(TagMatch {
                tag: tag.to_string(),
                strict: false,
            });
        }
    }
    None
}

/// The short name of a package identifier: the artifact id of a Maven
/// coordinate, the bare name of a scoped npm package.
fn short_name(package: &str) -> &str {
    package
        .rsplit([':', '/'])
        .next()
        .unwrap_or(package)
}

/// Pick the best tag for a version among `tags`.
///
/// Strict matches dominate lax ones; tags naming the package are
/// preferred; tags naming `org` without naming the package are demoted.
/// Ties break toward the shorter, then lexicographically smaller tag, so
/// selection is deterministic.
pub fn find_tag_match(
    tags: &[String],
    package: &str,
    version: &str,
    org: Option<&str>,
) -> Option<TagMatch> {
    let package_name = short_name(package).to_ascii_lowercase();
    let org_name = org.map(str::to_ascii_lowercase);

    let mut best: Option<(i32, &String, TagMatch)> = None;
    for tag in tags {
        let Some(matched) = match_tag(tag, version) else {
            continue;
        };
        let lower = tag.to_ascii_lowercase();
        let mut score = if matched.strict { 4 } else { 1 };
        let names_package = !package_name.is_empty() && lower.contains(&package_name);
        if names_package {
            score += 2;
        }
        if let Some(org_name) = &org_name {
            if !names_package && !org_name.is_empty() && lower.contains(org_name) {
                score -= 2;
            }
        }
        trace!(%tag, score, strict = matched.strict, "tag candidate");
        let better = match &best {
            None => true,
            Some((best_score, best_tag, _)) => {
                score > *best_score
                    || (score == *best_score
                        && (tag.len(), tag.as_str()) < (best_tag.len(), best_tag.as_str()))
            }
        };
        if better {
            best = Some((score, tag, matched));
        }
    }
    best.map(|(_, _, matched)| matched)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use simple_test_case::test_case;

    use super::*;

    #[test_case("1.0.0", true; "bare")]
    #[test_case("v1.0.0", true; "v_prefix")]
    #[test_case("bytes-1.0.0", true; "package_prefix")]
    #[test_case("release/1.0.0", true; "path_prefix")]
    #[test_case("1.0.0.RELEASE", true; "release_suffix")]
    #[test]
    fn strict_matches(tag: &str, expected: bool) {
        let matched = match_tag(tag, "1.0.0");
        pretty_assert_eq!(matched.map(|m| m.strict), Some(expected));
    }

    #[test_case("11.0.0"; "embedded_in_larger_major")]
    #[test_case("v1.0.01"; "digit_continuation")]
    #[test_case("1.0.0-rc1"; "rc_continuation")]
    #[test_case("1.0.0-beta"; "beta_continuation")]
    #[test_case("1.0.0.rc2"; "dotted_rc")]
    #[test_case("2.0.0"; "different_version")]
    #[test]
    fn rejected_tags(tag: &str) {
        assert!(match_tag(tag, "1.0.0").is_none());
    }

    #[test]
    fn dot_adjacent_prefix_is_rejected() {
        // "2.0" must not match inside "1.2.0".
        assert!(match_tag("1.2.0", "2.0").is_none());
    }

    #[test]
    fn separator_drift_is_lax() {
        let matched = match_tag("v1_0_0", "1.0.0").unwrap();
        assert!(!matched.strict);
    }

    #[test]
    fn strict_match_contains_delimited_version() {
        // Property: every strict match embeds the version with non-digit
        // boundaries and no pre-release continuation.
        let tags = ["v1.2.3", "pkg-1.2.3", "1.2.3", "x11.2.3", "1.2.3-rc1"];
        for tag in tags {
            if let Some(TagMatch { strict: true, .. }) = match_tag(tag, "1.2.3") {
                let idx = tag.find("1.2.3").unwrap();
                let before = tag[..idx].chars().next_back();
                assert!(before.is_none_or(|c| !c.is_ascii_digit()), "{tag}");
                let after = &tag[idx + "1.2.3".len()..];
                assert!(!is_prerelease_continuation(after), "{tag}");
            }
        }
    }

    #[test]
    fn package_naming_tags_win() {
        let tags = vec![
            "v2.1".to_string(),
            "foo-2.1".to_string(),
            "example-parent-2.1".to_string(),
        ];
        let best = find_tag_match(&tags, "com.example:foo", "2.1", Some("example")).unwrap();
        pretty_assert_eq!(best.tag, "foo-2.1");
    }

    #[test]
    fn org_only_tags_are_dampened() {
        let tags = vec!["exampleorg-2.1".to_string(), "v2.1".to_string()];
        let best = find_tag_match(&tags, "com.example:foo", "2.1", Some("exampleorg")).unwrap();
        pretty_assert_eq!(best.tag, "v2.1");
    }

    #[test]
    fn deterministic_tie_break() {
        let tags = vec!["b1.0.0".to_string(), "a1.0.0".to_string()];
        let best = find_tag_match(&tags, "pkg", "1.0.0", None).unwrap();
        pretty_assert_eq!(best.tag, "a1.0.0");
    }

    #[test]
    fn no_match_yields_none() {
        let tags = vec!["v2.0.0".to_string()];
        assert!(find_tag_match(&tags, "pkg", "1.0.0", None).is_none());
    }
}
