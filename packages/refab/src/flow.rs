//! The declarative build-step DSL.
//!
//! Build strategies describe their work as ordered lists of [`Step`]s.
//! A step either `runs` a templated shell fragment (with an optional list
//! of system packages it `needs`), or `uses` a named tool with a `with`
//! parameter map. Tools are themselves step lists held in a
//! [`ToolRegistry`]; resolution inlines them, scoping each tool's `with`
//! so parameters never leak back into the caller.
//!
//! Templates are handlebars with HTML escaping disabled. Missing keys
//! render as empty strings rather than failing; this matches the
//! forgiving semantics strategies rely on (e.g. referencing
//! `BuildEnv.timewarp` whether or not a timewarp host is configured) and
//! is a design decision, not an accident. Helpers are limited to `json`,
//! `semver_cmp`, and `regex_replace`; templates have no side effects.

use std::collections::{BTreeMap, HashMap};
use std::sync::{LazyLock, RwLock};

use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, no_escape,
};
use lazy_regex::regex::Regex;
use serde_json::{Map, Value};
use tracing::trace;

use crate::{Error, Result};

pub mod tools;

/// One build step: exactly one of `runs` or `uses` must be set.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Step {
    /// Templated shell fragment to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs: Option<String>,
    /// System packages the fragment needs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    /// Name of a registered tool to inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    /// Parameters passed to the tool; values are templates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
}

impl Step {
    /// A `runs` step.
    pub fn runs(script: impl Into<String>) -> Self {
        Self {
            runs: Some(script.into()),
            needs: Vec::new(),
            uses: None,
            with: BTreeMap::new(),
        }
    }

    /// A `runs` step with system dependencies.
    pub fn runs_needing(
        script: impl Into<String>,
        needs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            runs: Some(script.into()),
            needs: needs.into_iter().map(Into::into).collect(),
            uses: None,
            with: BTreeMap::new(),
        }
    }

    /// A `uses` step invoking a named tool.
    pub fn uses(
        tool: impl Into<String>,
        with: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        Self {
            runs: None,
            needs: Vec::new(),
            uses: Some(tool.into()),
            with: with
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The result of resolving steps: a shell script plus the union of system
/// dependencies it needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fragment {
    pub script: String,
    pub needs: Vec<String>,
}

impl Fragment {
    /// Concatenate two fragments: scripts joined by newline (dropping
    /// empties), needs unioned preserving first-seen order.
    pub fn join(mut self, other: Fragment) -> Fragment {
        if self.script.is_empty() {
            self.script = other.script;
        } else if !other.script.is_empty() {
            self.script.push('\n');
            self.script.push_str(&other.script);
        }
        for need in other.needs {
            if !self.needs.contains(&need) {
                self.needs.push(need);
            }
        }
        self
    }
}

fn renderer() -> &'static Handlebars<'static> {
    static RENDERER: LazyLock<Handlebars<'static>> = LazyLock::new(|| {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(no_escape);
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("semver_cmp", Box::new(semver_cmp_helper));
        handlebars.register_helper("regex_replace", Box::new(regex_replace_helper));
        handlebars
    });
    &RENDERER
}

/// Render a template against the given data.
///
/// Missing keys resolve to the zero value (empty output) by design.
pub fn render(template: &str, data: &Value) -> Result<String> {
    renderer()
        .render_template(template, data)
        .map_err(Error::from)
}

/// `{{json value}}`: JSON-encode the parameter.
fn json_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h.param(0).map(|p| p.value()).unwrap_or(&Value::Null);
    out.write(&serde_json::to_string(value).unwrap_or_default())?;
    Ok(())
}

/// `{{semver_cmp a b}}`: emit `-1`, `0`, or `1`. Falls back to string
/// ordering when either side is not a valid semver version.
fn semver_cmp_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let a = h.param(0).and_then(|p| p.value().as_str()).unwrap_or_default();
    let b = h.param(1).and_then(|p| p.value().as_str()).unwrap_or_default();
    let ordering = match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    };
    out.write(match ordering {
        std::cmp::Ordering::Less => "-1",
        std::cmp::Ordering::Equal => "0",
        std::cmp::Ordering::Greater => "1",
    })?;
    Ok(())
}

/// `{{regex_replace input pattern replacement}}`.
fn regex_replace_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let input = h.param(0).and_then(|p| p.value().as_str()).unwrap_or_default();
    let pattern = h.param(1).and_then(|p| p.value().as_str()).unwrap_or_default();
    let replacement = h.param(2).and_then(|p| p.value().as_str()).unwrap_or_default();
    match Regex::new(pattern) {
        Ok(re) => out.write(&re.replace_all(input, replacement))?,
        Err(_) => out.write(input)?,
    }
    Ok(())
}

/// A named collection of flow tools.
///
/// The process-wide [`default_registry`] is populated once at startup and
/// treated as immutable afterwards; registration is single-writer and
/// fails on duplicate names. Tests needing custom tools should build a
/// child registry with [`ToolRegistry::new`] rather than mutate the
/// default.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Vec<Step>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails with [`Error::ToolExists`] on duplicates.
    pub fn register(
        &self,
        name: impl Into<String>,
        steps: impl IntoIterator<Item = Step>,
    ) -> Result<()> {
        let name = name.into();
        let mut tools = self.tools.write().expect("tool registry lock");
        if tools.contains_key(&name) {
            return Err(Error::ToolExists(name));
        }
        trace!(%name, "registered tool");
        tools.insert(name, steps.into_iter().collect());
        Ok(())
    }

    /// Look up a tool's steps.
    pub fn get(&self, name: &str) -> Result<Vec<Step>> {
        self.tools
            .read()
            .expect("tool registry lock")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .tools
            .read()
            .expect("tool registry lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// The process-wide tool registry, populated with the built-in tools.
pub fn default_registry() -> &'static ToolRegistry {
    static REGISTRY: LazyLock<ToolRegistry> = LazyLock::new(|| {
        let registry = ToolRegistry::new();
        tools::install(&registry).expect("install built-in tools");
        registry
    });
    &REGISTRY
}

/// Merge `data` with a `With` scope for rendering.
fn scoped(data: &Value, with: &Map<String, Value>) -> Value {
    let mut merged = match data {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    merged.insert("With".to_string(), Value::Object(with.clone()));
    Value::Object(merged)
}

/// Resolve one step against `data` with the current `With` scope.
fn resolve_step_scoped(
    registry: &ToolRegistry,
    step: &Step,
    data: &Value,
    with: &Map<String, Value>,
) -> Result<Fragment> {
    match (&step.runs, &step.uses) {
        (Some(_), Some(_)) | (None, None) => Err(Error::InvalidStep(
            "exactly one of runs/uses must be set".to_string(),
        )),
        (Some(runs), None) => {
            let scope = scoped(data, with);
            let script = render(runs, &scope)?;
            // Dependency names may reference With values (e.g. a JDK
            // version embedded in a package name), so they render too.
            let needs = step
                .needs
                .iter()
                .map(|need| render(need, &scope))
                .collect::<Result<Vec<_>>>()?;
            Ok(Fragment { script, needs })
        }
        (None, Some(uses)) => {
            if !step.needs.is_empty() {
                return Err(Error::InvalidStep(
                    "needs is only valid on runs steps".to_string(),
                ));
            }
            // Resolve the with-values as templates in the caller's scope,
            // then evaluate the tool with only the resolved scope: the
            // caller's With never leaks into the callee, and vice versa.
            let mut resolved = Map::new();
            for (key, template) in &step.with {
                let value = render(template, &scoped(data, with))?;
                resolved.insert(key.clone(), Value::String(value));
            }
            let steps = registry.get(uses)?;
            resolve_steps_scoped(registry, &steps, data, &resolved)
        }
    }
}

fn resolve_steps_scoped(
    registry: &ToolRegistry,
    steps: &[Step],
    data: &Value,
    with: &Map<String, Value>,
) -> Result<Fragment> {
    let mut fragment = Fragment::default();
    for step in steps {
        fragment = fragment.join(resolve_step_scoped(registry, step, data, with)?);
    }
    Ok(fragment)
}

/// Resolve one step against `data`.
pub fn resolve_step(registry: &ToolRegistry, step: &Step, data: &Value) -> Result<Fragment> {
    resolve_step_scoped(registry, step, data, &Map::new())
}

/// Resolve a step list against `data`, concatenating the fragments.
pub fn resolve_steps(registry: &ToolRegistry, steps: &[Step], data: &Value) -> Result<Fragment> {
    resolve_steps_scoped(registry, steps, data, &Map::new())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq as pretty_assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn render_missing_keys_are_empty() {
        let out = render("a={{Missing.key}};b={{Target.package}}", &json!({
            "Target": {"package": "bytes"}
        }))
        .unwrap();
        pretty_assert_eq!(out, "a=;b=bytes");
    }

    #[test]
    fn render_does_not_escape() {
        let out = render("{{url}}", &json!({"url": "http://a.example/?x=1&y='2'"})).unwrap();
        pretty_assert_eq!(out, "http://a.example/?x=1&y='2'");
    }

    #[test]
    fn helper_json() {
        let out = render("{{json Target}}", &json!({"Target": {"a": 1}})).unwrap();
        pretty_assert_eq!(out, r#"{"a":1}"#);
    }

    #[test]
    fn helper_semver_cmp() {
        let data = json!({});
        pretty_assert_eq!(render(r#"{{semver_cmp "1.2.0" "1.10.0"}}"#, &data).unwrap(), "-1");
        pretty_assert_eq!(render(r#"{{semver_cmp "2.0.0" "2.0.0"}}"#, &data).unwrap(), "0");
        pretty_assert_eq!(render(r#"{{semver_cmp "2.0.1" "2.0.0"}}"#, &data).unwrap(), "1");
    }

    #[test]
    fn helper_regex_replace() {
        let out = render(
            r#"{{regex_replace ref "^refs/tags/" ""}}"#,
            &json!({"ref": "refs/tags/v1.0.0"}),
        )
        .unwrap();
        pretty_assert_eq!(out, "v1.0.0");
    }

    #[test]
    fn invalid_steps_are_rejected() {
        let registry = ToolRegistry::new();
        let both = Step {
            runs: Some("echo".to_string()),
            needs: Vec::new(),
            uses: Some("tool".to_string()),
            with: BTreeMap::new(),
        };
        assert!(matches!(
            resolve_step(&registry, &both, &json!({})),
            Err(Error::InvalidStep(_))
        ));
        let neither = Step {
            runs: None,
            needs: Vec::new(),
            uses: None,
            with: BTreeMap::new(),
        };
        assert!(matches!(
            resolve_step(&registry, &neither, &json!({})),
            Err(Error::InvalidStep(_))
        ));
    }

    #[test]
    fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let step = Step::uses("no/such-tool", Vec::<(String, String)>::new());
        assert!(matches!(
            resolve_step(&registry, &step, &json!({})),
            Err(Error::ToolNotFound(_))
        ));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register("echo", [Step::runs("echo hi")]).unwrap();
        assert!(matches!(
            registry.register("echo", [Step::runs("echo again")]),
            Err(Error::ToolExists(_))
        ));
    }

    #[test]
    fn list_resolution_distributes_over_join() {
        let registry = ToolRegistry::new();
        let data = json!({"Target": {"package": "pkg"}});
        let s1 = Step::runs_needing("echo one {{Target.package}}", ["git"]);
        let s2 = Step::runs_needing("echo two", ["git", "curl"]);

        let combined = resolve_steps(&registry, &[s1.clone(), s2.clone()], &data).unwrap();
        let joined = resolve_steps(&registry, &[s1], &data)
            .unwrap()
            .join(resolve_steps(&registry, &[s2], &data).unwrap());
        pretty_assert_eq!(combined, joined);
        pretty_assert_eq!(combined.script, "echo one pkg\necho two");
        pretty_assert_eq!(combined.needs, vec!["git".to_string(), "curl".to_string()]);
    }

    #[test]
    fn empty_scripts_are_dropped_from_joins() {
        let registry = ToolRegistry::new();
        let out = resolve_steps(
            &registry,
            &[Step::runs("{{Missing}}"), Step::runs("echo real")],
            &json!({}),
        )
        .unwrap();
        pretty_assert_eq!(out.script, "echo real");
    }

    #[test]
    fn tool_with_scope_does_not_leak_to_caller() {
        let registry = ToolRegistry::new();
        registry
            .register("inner", [Step::runs("inner sees {{With.sentinel}}")])
            .unwrap();
        registry
            .register(
                "outer",
                [
                    Step::uses("inner", [("sentinel", "hidden")]),
                    Step::runs("outer sees '{{With.sentinel}}'"),
                ],
            )
            .unwrap();

        let out = resolve_steps(
            &registry,
            &[Step::uses("outer", Vec::<(String, String)>::new())],
            &json!({}),
        )
        .unwrap();
        // The callee received its with-binding; after it returned, the
        // sentinel is gone from the enclosing scope.
        pretty_assert_eq!(out.script, "inner sees hidden\nouter sees ''");
    }

    #[test]
    fn with_values_resolve_in_caller_scope() {
        let registry = ToolRegistry::new();
        registry
            .register("checkout", [Step::runs("git checkout {{With.ref}}")])
            .unwrap();
        let step = Step::uses("checkout", [("ref", "{{Location.ref}}")]);
        let out = resolve_step(
            &registry,
            &step,
            &json!({"Location": {"ref": "deadbeef"}}),
        )
        .unwrap();
        pretty_assert_eq!(out.script, "git checkout deadbeef");
    }

    #[test]
    fn default_registry_has_builtins() {
        let names = default_registry().names();
        assert!(names.iter().any(|name| name == "git/checkout"));
        assert!(names.iter().any(|name| name == "cargo/package"));
    }
}
