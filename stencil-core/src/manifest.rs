//! `gen-templates.json` manifest loading.
//!
//! A manifest groups every package of one generation configuration:
//!
//! ```json
//! {
//!   "name": "Zigbee templates",
//!   "version": "1.2",
//!   "helpers": ["helpers/extra.yaml"],
//!   "override": "override.yaml",
//!   "categories": ["string", "session"],
//!   "aliases": ["cluster_name:as_snake"],
//!   "resources": { "sdk": "../sdk" },
//!   "partials": [{ "name": "header", "path": "partials/header.tera" }],
//!   "templates": [
//!     { "path": "zap-id.h.tera", "name": "zap-id", "output": "zap-id.h" },
//!     { "path": "cluster.tera", "name": "cluster", "output": "{key}.h",
//!       "iterator": "selected_server_cluster" }
//!   ]
//! }
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::{MetaInfo, PackageId, PackageType, TemplatePackage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub path: PathBuf,
    pub name: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub iterator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Raw manifest document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
    #[serde(default)]
    pub partials: Vec<PartialEntry>,
    #[serde(default)]
    pub helpers: Vec<PathBuf>,
    #[serde(default, rename = "override")]
    pub override_path: Option<PathBuf>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

/// A loaded manifest with resolved packages.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub package: Arc<TemplatePackage>,
    pub templates: Vec<Arc<TemplatePackage>>,
    pub partials: Vec<TemplatePackage>,
    pub helpers: Vec<TemplatePackage>,
    pub override_package: Option<TemplatePackage>,
    pub meta: MetaInfo,
}

impl Manifest {
    /// Load and resolve a manifest file.
    ///
    /// Returns `CoreError::ManifestNotFound` if absent,
    /// `CoreError::ManifestParse` (with path + serde context) if malformed.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Err(CoreError::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let file: ManifestFile =
            serde_json::from_str(&contents).map_err(|e| CoreError::ManifestParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::from_file(path, base, file))
    }

    /// Resolve a parsed manifest document against `base`.
    pub fn from_file(path: &Path, base: &Path, file: ManifestFile) -> Self {
        let version = file.version.clone();
        let package = |p: &Path, package_type: PackageType, category: &str| {
            let resolved = resolve(base, p);
            TemplatePackage {
                id: PackageId::for_path(&resolved),
                path: resolved,
                package_type,
                category: category.to_string(),
                version: version.clone(),
                output: None,
                iterator: None,
                iterations: Vec::new(),
            }
        };

        let templates = file
            .templates
            .iter()
            .map(|t| {
                let mut pkg = package(&t.path, PackageType::SingleTemplate, &t.name);
                pkg.output = t.output.clone();
                pkg.iterator = t.iterator.clone();
                Arc::new(pkg)
            })
            .collect();

        let partials = file
            .partials
            .iter()
            .map(|p| package(&p.path, PackageType::Partial, &p.name))
            .collect();

        let helpers = file
            .helpers
            .iter()
            .map(|h| {
                let category = h
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                package(h, PackageType::Helper, &category)
            })
            .collect();

        let override_package = file
            .override_path
            .as_ref()
            .map(|o| package(o, PackageType::Override, "override"));

        let manifest_package = TemplatePackage {
            id: PackageId::for_path(path),
            path: path.to_path_buf(),
            package_type: PackageType::GenTemplatesJson,
            category: file.name.clone(),
            version: file.version.clone(),
            output: None,
            iterator: None,
            iterations: Vec::new(),
        };

        Self {
            package: Arc::new(manifest_package),
            templates,
            partials,
            helpers,
            override_package,
            meta: MetaInfo {
                aliases: file.aliases,
                categories: file.categories,
                resources: file.resources,
            },
        }
    }

    /// Read every partial body, keyed by partial name.
    pub fn read_partials(&self) -> Result<Vec<(String, String)>, CoreError> {
        self.partials
            .iter()
            .map(|p| {
                let body = std::fs::read_to_string(&p.path).map_err(|e| io_err(&p.path, e))?;
                Ok((p.category.clone(), body))
            })
            .collect()
    }

    /// The manifest package followed by every package it declares.
    pub fn packages(&self) -> Vec<Arc<TemplatePackage>> {
        std::iter::once(self.package.clone())
            .chain(self.templates.iter().cloned())
            .chain(
                self.partials
                    .iter()
                    .chain(self.helpers.iter())
                    .chain(self.override_package.iter())
                    .map(|p| Arc::new(p.clone())),
            )
            .collect()
    }

    /// Templates whose category is listed in `only` (all when `None`).
    pub fn select(&self, only: Option<&[String]>) -> Vec<Arc<TemplatePackage>> {
        self.templates
            .iter()
            .filter(|t| only.map(|names| names.contains(&t.category)).unwrap_or(true))
            .cloned()
            .collect()
    }
}

fn resolve(base: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
