//! Helper registry: named functions and filters callable from template bodies.
//!
//! Helpers arrive in two tiers: the built-in set (see [`crate::builtin`]) and
//! external [`HelperModule`]s. Registration is last-wins; every overwrite is
//! recorded as a [`HelperCollision`] so shadowing is never silent.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tera::Tera;

use stencil_core::{MetaInfo, PackageId, SessionId, SessionStore};

use crate::error::{error_chain, HelperLoadError};

/// A template function: `{{ name(arg=value) }}`.
pub type HelperFn = Arc<dyn Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync>;

/// A template filter: `{{ value | name(arg=value) }}`.
pub type FilterFn =
    Arc<dyn Fn(&Value, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync>;

#[derive(Clone)]
pub enum Helper {
    Function(HelperFn),
    Filter(FilterFn),
}

impl fmt::Debug for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Helper::Function(_) => f.write_str("Function"),
            Helper::Filter(_) => f.write_str("Filter"),
        }
    }
}

/// Where a helper registration came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    BuiltIn,
    External(String),
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::BuiltIn => write!(f, "built-in"),
            Tier::External(module) => write!(f, "external:{module}"),
        }
    }
}

/// A helper name registered more than once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HelperCollision {
    pub name: String,
    pub previous: Tier,
    pub replacement: Tier,
}

/// Context handed to helper modules at runtime initialization.
#[derive(Clone)]
pub struct HelperContext {
    pub store: Arc<dyn SessionStore>,
    pub session_id: SessionId,
    pub meta: MetaInfo,
    /// The `gen-templates.json` package helpers query options for.
    pub manifest_package: Option<PackageId>,
}

/// Per-runtime registry of helpers.
#[derive(Debug, Default)]
pub struct HelperRegistry {
    entries: BTreeMap<String, (Tier, Helper)>,
    collisions: Vec<HelperCollision>,
    tier: Option<Tier>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_tier(&self) -> Tier {
        self.tier.clone().unwrap_or(Tier::BuiltIn)
    }

    /// Register `helper` under `name` in the current tier.
    pub fn register(&mut self, name: impl Into<String>, helper: Helper) {
        let name = name.into();
        let tier = self.current_tier();
        if let Some((previous, _)) = self.entries.get(&name) {
            tracing::warn!(helper = %name, previous = %previous, replacement = %tier, "helper shadowed");
            self.collisions.push(HelperCollision {
                name: name.clone(),
                previous: previous.clone(),
                replacement: tier.clone(),
            });
        }
        self.entries.insert(name, (tier, helper));
    }

    /// Register a function helper.
    pub fn register_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&HashMap<String, Value>) -> tera::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Helper::Function(Arc::new(f)));
    }

    /// Register a filter helper.
    pub fn register_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value, &HashMap<String, Value>) -> tera::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Helper::Filter(Arc::new(f)));
    }

    /// Active helper for `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<&Helper> {
        self.entries.get(name).map(|(_, h)| h)
    }

    /// Tier that currently owns `name`.
    pub fn origin(&self, name: &str) -> Option<&Tier> {
        self.entries.get(name).map(|(t, _)| t)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every overwrite seen so far, in registration order.
    pub fn collisions(&self) -> &[HelperCollision] {
        &self.collisions
    }

    /// Register `alias` for each `alias:target` pair whose target exists.
    pub fn apply_aliases(&mut self, aliases: &[String]) {
        for pair in aliases {
            let Some((alias, target)) = pair.split_once(':') else {
                tracing::warn!(alias = %pair, "ignoring malformed helper alias");
                continue;
            };
            match self.resolve(target.trim()).cloned() {
                Some(helper) => self.register(alias.trim(), helper),
                None => tracing::warn!(alias = %alias, target = %target, "alias target not registered"),
            }
        }
    }

    /// Run `module.initialize` with registrations attributed to the module.
    pub fn load_module(
        &mut self,
        module: &dyn HelperModule,
        ctx: &HelperContext,
    ) -> Result<(), HelperLoadError> {
        let previous = self.tier.replace(Tier::External(module.name().to_string()));
        let result = module.initialize(self, ctx);
        self.tier = previous;
        if let Err(err) = &result {
            tracing::error!(module = %module.name(), error = %err, "helper module failed to load");
        }
        result
    }

    /// Push every active helper into `tera`.
    pub fn install(&self, tera: &mut Tera) {
        for (name, (_, helper)) in &self.entries {
            match helper.clone() {
                Helper::Function(f) => {
                    tera.register_function(name, move |args: &HashMap<String, Value>| f(args))
                }
                Helper::Filter(f) => tera.register_filter(
                    name,
                    move |value: &Value, args: &HashMap<String, Value>| f(value, args),
                ),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// External helper modules
// ---------------------------------------------------------------------------

/// A unit of helpers with an `initialize` entry point.
pub trait HelperModule: Send + Sync {
    /// Name used in collision diagnostics and load errors.
    fn name(&self) -> &str;

    /// Register this module's helpers.
    fn initialize(
        &self,
        registry: &mut HelperRegistry,
        ctx: &HelperContext,
    ) -> Result<(), HelperLoadError>;
}

#[derive(Debug, Deserialize)]
struct HelperFile {
    #[serde(default)]
    helpers: BTreeMap<String, String>,
}

/// Helper module backed by a YAML file of template snippets.
///
/// ```yaml
/// helpers:
///   shout: "{{ value | upper }}!"
///   greet: "hello {{ name }} from {{ session_id }}"
/// ```
///
/// Each snippet becomes a function whose call arguments (plus `session_id`)
/// form the snippet's context.
#[derive(Debug, Clone)]
pub struct FileHelperModule {
    name: String,
    path: PathBuf,
}

impl FileHelperModule {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_err(&self, reason: impl Into<String>) -> HelperLoadError {
        HelperLoadError {
            module: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl HelperModule for FileHelperModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(
        &self,
        registry: &mut HelperRegistry,
        ctx: &HelperContext,
    ) -> Result<(), HelperLoadError> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| self.load_err(format!("cannot read {}: {e}", self.path.display())))?;
        let file: HelperFile =
            serde_yaml::from_str(&contents).map_err(|e| self.load_err(e.to_string()))?;

        let mut snippets = Tera::default();
        snippets.autoescape_on(vec![]);
        for (name, body) in &file.helpers {
            snippets
                .add_raw_template(name, body)
                .map_err(|e| self.load_err(format!("helper '{name}': {}", error_chain(&e))))?;
        }
        let snippets = Arc::new(snippets);

        for name in file.helpers.keys() {
            let snippets = snippets.clone();
            let template = name.clone();
            let session_id = ctx.session_id.0.clone();
            registry.register_function(name.clone(), move |args: &HashMap<String, Value>| {
                let mut context = tera::Context::new();
                for (k, v) in args {
                    context.insert(k.as_str(), v);
                }
                context.insert("session_id", &session_id);
                snippets.render(&template, &context).map(Value::String)
            });
        }
        tracing::debug!(module = %self.name, count = file.helpers.len(), "loaded helper module");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_core::{MemoryStore, Session};

    struct Constant {
        name: &'static str,
        helper: &'static str,
        value: &'static str,
    }

    impl HelperModule for Constant {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(
            &self,
            registry: &mut HelperRegistry,
            _ctx: &HelperContext,
        ) -> Result<(), HelperLoadError> {
            let value = self.value;
            registry.register_function(self.helper, move |_| Ok(Value::from(value)));
            Ok(())
        }
    }

    fn ctx() -> HelperContext {
        HelperContext {
            store: Arc::new(MemoryStore::new([Session::new("s")])),
            session_id: SessionId::from("s"),
            meta: MetaInfo::default(),
            manifest_package: None,
        }
    }

    fn call(registry: &HelperRegistry, name: &str) -> Value {
        match registry.resolve(name) {
            Some(Helper::Function(f)) => f(&HashMap::new()).expect("call"),
            other => panic!("expected function for {name}, got {other:?}"),
        }
    }

    #[test]
    fn two_modules_same_name_last_wins_with_diagnostic() {
        let mut registry = HelperRegistry::new();
        let a = Constant { name: "mod-a", helper: "foo", value: "a" };
        let b = Constant { name: "mod-b", helper: "foo", value: "b" };
        registry.load_module(&a, &ctx()).expect("a");
        registry.load_module(&b, &ctx()).expect("b");

        assert_eq!(registry.len(), 1, "exactly one active foo");
        assert_eq!(call(&registry, "foo"), Value::from("b"));
        assert_eq!(
            registry.collisions(),
            &[HelperCollision {
                name: "foo".into(),
                previous: Tier::External("mod-a".into()),
                replacement: Tier::External("mod-b".into()),
            }]
        );
    }

    #[test]
    fn builtin_tier_restored_after_module() {
        let mut registry = HelperRegistry::new();
        let a = Constant { name: "mod-a", helper: "x", value: "1" };
        registry.load_module(&a, &ctx()).expect("a");
        registry.register_function("y", |_| Ok(Value::Null));
        assert_eq!(registry.origin("x"), Some(&Tier::External("mod-a".into())));
        assert_eq!(registry.origin("y"), Some(&Tier::BuiltIn));
    }

    #[test]
    fn aliases_point_at_existing_helpers() {
        let mut registry = HelperRegistry::new();
        registry.register_function("original", |_| Ok(Value::from(7)));
        registry.apply_aliases(&["copy:original".into(), "ghost:missing".into(), "junk".into()]);
        assert_eq!(call(&registry, "copy"), Value::from(7));
        assert!(registry.resolve("ghost").is_none());
    }

    #[test]
    fn file_module_renders_snippets() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("extra.yaml");
        std::fs::write(
            &path,
            "helpers:\n  shout: \"{{ value | upper }}!\"\n  whoami: \"{{ session_id }}\"\n",
        )
        .expect("write");

        let mut registry = HelperRegistry::new();
        registry
            .load_module(&FileHelperModule::new(&path), &ctx())
            .expect("load");
        let Some(Helper::Function(shout)) = registry.resolve("shout") else {
            panic!("shout missing");
        };
        let mut args = HashMap::new();
        args.insert("value".to_string(), Value::from("hi"));
        assert_eq!(shout(&args).expect("shout"), Value::from("HI!"));
        assert_eq!(call(&registry, "whoami"), Value::from("s"));
    }

    #[test]
    fn file_module_missing_reports_module_path() {
        let mut registry = HelperRegistry::new();
        let module = FileHelperModule::new("/definitely/missing/helpers.yaml");
        let err = registry.load_module(&module, &ctx()).unwrap_err();
        assert!(err.module.contains("helpers.yaml"));
        assert!(registry.is_empty());
    }

    #[test]
    fn file_module_bad_snippet_is_load_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "helpers:\n  broken: \"{% if x %}open\"\n").expect("write");
        let mut registry = HelperRegistry::new();
        let err = registry
            .load_module(&FileHelperModule::new(&path), &ctx())
            .unwrap_err();
        assert!(err.reason.contains("broken"), "got: {err}");
    }

    #[test]
    fn install_exposes_helpers_to_engine() {
        let mut registry = HelperRegistry::new();
        registry.register_function("answer", |_| Ok(Value::from(42)));
        registry.register_filter("twice", |v, _| {
            Ok(Value::from(format!("{0}{0}", v.as_str().unwrap_or_default())))
        });
        let mut tera = Tera::default();
        registry.install(&mut tera);
        tera.add_raw_template("t", "{{ answer() }}-{{ 'ab' | twice }}")
            .expect("template");
        let out = tera.render("t", &tera::Context::new()).expect("render");
        assert_eq!(out, "42-abab");
    }
}
