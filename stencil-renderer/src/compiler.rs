//! Template compiler/cache.
//!
//! Each [`CompiledTemplate`] owns a private clone of the runtime's base engine
//! (partials + helpers) with exactly one template added, so a failed compile
//! never leaves a half-registered template behind and compiled entries are
//! independent of each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tera::Tera;

use stencil_core::{PackageId, TemplatePackage};

use crate::error::{error_chain, io_err, parse_location, RenderError, TemplateSyntaxError};
use crate::helpers::HelperRegistry;

/// Executable form of one template package.
#[derive(Debug)]
pub struct CompiledTemplate {
    package_id: PackageId,
    path: PathBuf,
    name: String,
    tera: Tera,
}

impl CompiledTemplate {
    pub fn package_id(&self) -> &PackageId {
        &self.package_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render against a prepared context.
    pub fn render(&self, ctx: &tera::Context) -> tera::Result<String> {
        self.tera.render(&self.name, ctx)
    }
}

/// Build the engine every compiled template starts from.
///
/// Partial syntax errors are reported against `partial:<name>`.
pub fn build_base(
    partials: &[(String, String)],
    helpers: &HelperRegistry,
) -> Result<Tera, RenderError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    for (name, body) in partials {
        tera.add_raw_template(name, body)
            .map_err(|e| syntax_error(Path::new(&format!("partial:{name}")), &e))?;
    }
    helpers.install(&mut tera);
    Ok(tera)
}

fn syntax_error(path: &Path, err: &tera::Error) -> TemplateSyntaxError {
    let message = error_chain(err);
    let (line, column) = parse_location(&message);
    TemplateSyntaxError {
        path: path.to_path_buf(),
        line,
        column,
        message,
    }
}

/// Per-runtime cache of compiled templates keyed by package identity.
#[derive(Debug)]
pub struct TemplateCache {
    base: Tera,
    compiled: HashMap<PackageId, Arc<CompiledTemplate>>,
    compiles: usize,
}

impl TemplateCache {
    pub fn new(base: Tera) -> Self {
        Self {
            base,
            compiled: HashMap::new(),
            compiles: 0,
        }
    }

    /// Return the compiled form of `package`, reading and parsing its source on
    /// first use only.
    pub fn compile(&mut self, package: &TemplatePackage) -> Result<Arc<CompiledTemplate>, RenderError> {
        if let Some(hit) = self.compiled.get(&package.id) {
            return Ok(hit.clone());
        }

        let source = std::fs::read_to_string(&package.path).map_err(|e| io_err(&package.path, e))?;
        self.compiles += 1;

        let name = format!("pkg-{}", package.id);
        let mut tera = self.base.clone();
        tera.add_raw_template(&name, &source)
            .map_err(|e| syntax_error(&package.path, &e))?;

        tracing::debug!(package = %package.id, path = %package.path.display(), "compiled template");
        let compiled = Arc::new(CompiledTemplate {
            package_id: package.id.clone(),
            path: package.path.clone(),
            name,
            tera,
        });
        self.compiled.insert(package.id.clone(), compiled.clone());
        Ok(compiled)
    }

    /// Number of times a source was read and parsed.
    pub fn compile_count(&self) -> usize {
        self.compiles
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.compiled.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
