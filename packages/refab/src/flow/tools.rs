//! Built-in flow tools.
//!
//! These are the named step programs ecosystem strategies lower to.
//! They are installed once into the process-wide default registry at
//! startup; see [`crate::flow::default_registry`].

use super::{Step, ToolRegistry};
use crate::Result;

/// Install every built-in tool into the given registry.
pub fn install(registry: &ToolRegistry) -> Result<()> {
    registry.register(
        "git/checkout",
        [Step::runs_needing(
            "{{#unless With.has_repo}}git clone {{With.repo}} . && {{/unless}}\
             git checkout --force '{{With.ref}}'",
            ["git"],
        )],
    )?;

    registry.register(
        "timewarp/start",
        [Step::runs_needing(
            "curl -fsSL {{With.binary_url}} -o /usr/local/bin/timewarp && \
             chmod +x /usr/local/bin/timewarp && \
             /usr/local/bin/timewarp --port 8080 &",
            ["curl"],
        )],
    )?;

    registry.register(
        "cargo/package",
        [Step::runs_needing(
            "{{#if With.toolchain}}rustup toolchain install {{With.toolchain}} && \
             rustup default {{With.toolchain}} && {{/if}}\
             {{#if With.registry}}export CARGO_REGISTRIES_CRATES_IO_INDEX='{{With.registry}}' && {{/if}}\
             cd {{#if With.dir}}{{With.dir}}{{else}}.{{/if}} && cargo package --no-verify",
            ["cargo", "rustup"],
        )],
    )?;

    registry.register(
        "npm/pack",
        [Step::runs_needing(
            "{{#if With.registry}}npm config set registry '{{With.registry}}' && {{/if}}\
             cd {{#if With.dir}}{{With.dir}}{{else}}.{{/if}} && npm pack",
            ["npm"],
        )],
    )?;

    registry.register(
        "pip/wheel",
        [Step::runs_needing(
            "{{#if With.registry}}export PIP_INDEX_URL='{{With.registry}}' && {{/if}}\
             cd {{#if With.dir}}{{With.dir}}{{else}}.{{/if}} && \
             python3 -m pip install build && python3 -m build --wheel",
            ["python3", "py3-pip"],
        )],
    )?;

    registry.register(
        "maven/package",
        [Step::runs_needing(
            "cd {{#if With.dir}}{{With.dir}}{{else}}.{{/if}} && \
             JAVA_HOME=/usr/lib/jvm/java-{{With.jdk}}-openjdk-amd64 \
             mvn -B -DskipTests package",
            ["maven", "openjdk-{{With.jdk}}-jdk-headless"],
        )],
    )?;

    registry.register(
        "gradle/assemble",
        [Step::runs_needing(
            "cd {{#if With.dir}}{{With.dir}}{{else}}.{{/if}} && \
             JAVA_HOME=/usr/lib/jvm/java-{{With.jdk}}-openjdk-amd64 \
             ./gradlew {{#if With.module}}:{{With.module}}:{{/if}}assemble --no-daemon",
            ["openjdk-{{With.jdk}}-jdk-headless"],
        )],
    )?;

    registry.register(
        "dpkg/buildpackage",
        [Step::runs_needing(
            "cd {{#if With.dir}}{{With.dir}}{{else}}.{{/if}} && \
             apt-get build-dep -y . && dpkg-buildpackage -us -uc -b",
            ["build-essential", "devscripts", "fakeroot"],
        )],
    )?;

    registry.register(
        "gem/build",
        [Step::runs_needing(
            "cd {{#if With.dir}}{{With.dir}}{{else}}.{{/if}} && \
             gem build {{With.gemspec}}",
            ["ruby"],
        )],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use serde_json::json;

    use super::*;
    use crate::flow::resolve_steps;

    #[test]
    fn checkout_clone_is_suppressed_when_repo_present() {
        let registry = ToolRegistry::new();
        install(&registry).unwrap();

        let steps = [Step::uses(
            "git/checkout",
            [
                ("repo", "https://github.com/foo/bar"),
                ("ref", "deadbeef"),
                ("has_repo", "true"),
            ],
        )];
        let fragment = resolve_steps(&registry, &steps, &json!({})).unwrap();
        pretty_assert_eq!(fragment.script, "git checkout --force 'deadbeef'");

        let steps = [Step::uses(
            "git/checkout",
            [("repo", "https://github.com/foo/bar"), ("ref", "deadbeef")],
        )];
        let fragment = resolve_steps(&registry, &steps, &json!({})).unwrap();
        pretty_assert_eq!(
            fragment.script,
            "git clone https://github.com/foo/bar . && git checkout --force 'deadbeef'"
        );
        pretty_assert_eq!(fragment.needs, vec!["git".to_string()]);
    }

    #[test]
    fn cargo_package_pins_toolchain_when_given() {
        let registry = ToolRegistry::new();
        install(&registry).unwrap();

        let steps = [Step::uses("cargo/package", [("toolchain", "1.49.0")])];
        let fragment = resolve_steps(&registry, &steps, &json!({})).unwrap();
        assert!(fragment.script.contains("rustup toolchain install 1.49.0"));
        assert!(fragment.script.contains("cargo package --no-verify"));

        let steps = [Step::uses("cargo/package", Vec::<(String, String)>::new())];
        let fragment = resolve_steps(&registry, &steps, &json!({})).unwrap();
        assert!(!fragment.script.contains("rustup toolchain install"));
    }
}
