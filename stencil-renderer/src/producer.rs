//! Content producer: executes a compiled template for one session and
//! iteration and splits the output into named fragments.
//!
//! A rendered line of the form `@@fragment <name>` starts a new fragment.
//! Output without markers is a single fragment named after the package output.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use stencil_core::{Content, Fragment, IterationOptions, SessionId, SessionStore, TemplatePackage};

use crate::compiler::CompiledTemplate;
use crate::context::{merge_overridable, RenderContext};
use crate::error::{error_chain, io_err, RenderError};

/// Marker that opens a named fragment in rendered output.
pub const FRAGMENT_MARKER: &str = "@@fragment ";

/// Executes compiled templates against one runtime's store handle.
pub struct ContentProducer<'a> {
    pub store: &'a dyn SessionStore,
    pub resources: &'a BTreeMap<String, String>,
    /// Overridable defaults; per-job override files layer on top.
    pub overridable: &'a Value,
}

impl<'a> ContentProducer<'a> {
    pub fn new(
        store: &'a dyn SessionStore,
        resources: &'a BTreeMap<String, String>,
        overridable: &'a Value,
    ) -> Self {
        Self {
            store,
            resources,
            overridable,
        }
    }

    /// Render `compiled` for `session_id` and return its fragments.
    pub fn produce(
        &self,
        compiled: &CompiledTemplate,
        session_id: &SessionId,
        package: &TemplatePackage,
        manifest: Option<&TemplatePackage>,
        iteration: &IterationOptions,
    ) -> Result<Content, RenderError> {
        let session = self.store.load_session(session_id)?;
        let overridable = match &iteration.override_path {
            Some(path) => merge_overridable(self.overridable, load_override(path)?),
            None => self.overridable.clone(),
        };
        let ctx = RenderContext::new(
            session,
            package,
            manifest,
            iteration,
            self.resources,
            overridable,
        )
        .to_tera_context()?;

        let rendered = compiled.render(&ctx).map_err(|e| RenderError::Execution {
            package: package.id.clone(),
            path: package.path.clone(),
            message: error_chain(&e),
        })?;
        let normalized = rendered.replace("\r\n", "\n");
        let default_name = package.output_name(iteration.override_key.as_deref());
        Ok(split_fragments(&normalized, &default_name))
    }
}

/// Read a YAML file of overridable values.
pub fn load_override(path: &Path) -> Result<Value, RenderError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| RenderError::Override {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Split rendered output on [`FRAGMENT_MARKER`] lines.
///
/// Whitespace-only text before the first marker is dropped.
pub fn split_fragments(rendered: &str, default_name: &str) -> Content {
    let mut fragments: Content = Vec::new();
    let mut name = default_name.to_string();
    let mut current = String::new();
    let mut saw_marker = false;

    for line in rendered.split_inclusive('\n') {
        if let Some(next) = line.trim_end().strip_prefix(FRAGMENT_MARKER) {
            if saw_marker || !current.trim().is_empty() {
                fragments.push(Fragment::new(name, std::mem::take(&mut current)));
            }
            current.clear();
            name = next.trim().to_string();
            saw_marker = true;
            continue;
        }
        current.push_str(line);
    }

    if saw_marker || fragments.is_empty() {
        fragments.push(Fragment::new(name, current));
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_marker_is_single_fragment() {
        let frags = split_fragments("a\nb\n", "out.h");
        assert_eq!(frags, vec![Fragment::new("out.h", "a\nb\n")]);
    }

    #[test]
    fn markers_split_into_named_fragments() {
        let text = "@@fragment x.h\nheader\n@@fragment x.c\nsource\n";
        let frags = split_fragments(text, "ignored");
        assert_eq!(
            frags,
            vec![Fragment::new("x.h", "header\n"), Fragment::new("x.c", "source\n")]
        );
    }

    #[test]
    fn preamble_before_marker_keeps_default_name() {
        let frags = split_fragments("lead\n@@fragment b\nbody", "a");
        assert_eq!(frags, vec![Fragment::new("a", "lead\n"), Fragment::new("b", "body")]);
    }

    #[test]
    fn blank_preamble_is_dropped() {
        let frags = split_fragments("\n  \n@@fragment b\nbody\n", "a");
        assert_eq!(frags, vec![Fragment::new("b", "body\n")]);
    }

    #[test]
    fn empty_output_yields_one_empty_fragment() {
        assert_eq!(split_fragments("", "a"), vec![Fragment::new("a", "")]);
    }
}
