//! Domain types shared by every stencil crate.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Packages are immutable once loaded and are passed around as `Arc<TemplatePackage>`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of a stored configuration session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Stable identity of a template package.
///
/// Compiled templates are cached by this key, so two packages that point at
/// different files must never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId(pub String);

impl PackageId {
    /// Derive an id from the package source path (first 16 hex chars of its SHA-256).
    pub fn for_path(path: &Path) -> Self {
        let mut h = Sha256::new();
        h.update(path.to_string_lossy().replace('\\', "/").as_bytes());
        let digest = hex::encode(h.finalize());
        Self(digest[..16].to_string())
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

/// Kind of a package inside a generation configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    /// The `gen-templates.json` manifest itself.
    GenTemplatesJson,
    /// A template that produces output.
    SingleTemplate,
    /// A named fragment includable by other templates.
    Partial,
    /// An external helper module.
    Helper,
    /// A file of overridable values.
    Override,
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageType::GenTemplatesJson => write!(f, "gen-templates-json"),
            PackageType::SingleTemplate => write!(f, "single-template"),
            PackageType::Partial => write!(f, "partial"),
            PackageType::Helper => write!(f, "helper"),
            PackageType::Override => write!(f, "override"),
        }
    }
}

/// Parameters that re-target one template execution at a sub-resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationOptions {
    /// YAML file of overridable values layered over the pool defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_path: Option<PathBuf>,
    /// Key naming this iteration; substituted for `{key}` in output names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_key: Option<String>,
    /// Object whose keys are merged into the top level of the render context.
    #[serde(default)]
    pub initial_context: Value,
}

impl IterationOptions {
    /// Options for iterating a single item under `key`.
    pub fn for_item(key: impl Into<String>, item: Value) -> Self {
        Self {
            override_path: None,
            override_key: Some(key.into()),
            initial_context: item,
        }
    }
}

/// A named, versioned unit of template source plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatePackage {
    pub id: PackageId,
    pub path: PathBuf,
    pub package_type: PackageType,
    /// Category (for templates: the logical template name used by `generate_only`).
    pub category: String,
    pub version: String,
    /// Output name pattern; `{key}` is replaced per iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Name of a session iterator that expands this package into many jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterator: Option<String>,
    /// Explicit iteration contexts; takes precedence over `iterator`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iterations: Vec<IterationOptions>,
}

impl TemplatePackage {
    /// A single-template package with an id derived from `path`.
    pub fn single(path: impl Into<PathBuf>, category: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: PackageId::for_path(&path),
            path,
            package_type: PackageType::SingleTemplate,
            category: category.into(),
            version: String::new(),
            output: None,
            iterator: None,
            iterations: Vec::new(),
        }
    }

    /// Builder-style setter for the output pattern.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Builder-style setter for explicit iteration contexts.
    pub fn with_iterations(mut self, iterations: Vec<IterationOptions>) -> Self {
        self.iterations = iterations;
        self
    }

    /// Builder-style setter for the session iterator.
    pub fn with_iterator(mut self, iterator: impl Into<String>) -> Self {
        self.iterator = Some(iterator.into());
        self
    }

    /// Output name for a given iteration key.
    ///
    /// Falls back to the category when no output pattern is declared.
    pub fn output_name(&self, key: Option<&str>) -> String {
        let pattern = self.output.as_deref().unwrap_or(&self.category);
        match key {
            Some(key) => pattern.replace("{key}", key),
            None => pattern.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs and results
// ---------------------------------------------------------------------------

/// One independent unit of rendering work.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub session_id: SessionId,
    pub package: Arc<TemplatePackage>,
    /// The `gen-templates.json` package the template belongs to, if any.
    pub manifest_package: Option<Arc<TemplatePackage>>,
    pub iteration: IterationOptions,
    /// Position in the submitted batch.
    pub index: usize,
}

/// One named output produced by a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub name: String,
    pub content: String,
}

impl Fragment {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Ordered list of fragments produced by a single render.
pub type Content = Vec<Fragment>;

/// Per-manifest metadata consumed by built-in helpers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaInfo {
    /// `alias:target` pairs.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Built-in helper categories to load; empty means all.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Named resource paths exposed to templates.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

/// A stored option attached to a package (category → code/label).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOption {
    pub category: String,
    pub code: String,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
