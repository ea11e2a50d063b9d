//! Render context: serializable payload a template executes against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stencil_core::{IterationOptions, Session, TemplatePackage};

use crate::error::RenderError;

/// Top-level rendering payload.
///
/// Keys of the iteration's `initial_context` object are merged at the top
/// level on conversion, so iterated templates can address `{{ name }}`
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderContext {
    pub global: GlobalCtx,
    pub session: Session,
    pub iteration: IterationCtx,
    #[serde(skip)]
    pub initial_context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalCtx {
    pub session_id: String,
    pub package_id: String,
    pub template_path: String,
    pub gen_template_package_id: Option<String>,
    pub resources: BTreeMap<String, String>,
    pub overridable: Value,
    pub generator_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationCtx {
    pub key: Option<String>,
    pub item: Value,
}

impl RenderContext {
    /// Assemble the context for one render.
    pub fn new(
        session: Session,
        package: &TemplatePackage,
        manifest: Option<&TemplatePackage>,
        iteration: &IterationOptions,
        resources: &BTreeMap<String, String>,
        overridable: Value,
    ) -> Self {
        RenderContext {
            global: GlobalCtx {
                session_id: session.id.0.clone(),
                package_id: package.id.0.clone(),
                template_path: package.path.display().to_string(),
                gen_template_package_id: manifest.map(|m| m.id.0.clone()),
                resources: resources.clone(),
                overridable,
                generator_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            session,
            iteration: IterationCtx {
                key: iteration.override_key.clone(),
                item: iteration.initial_context.clone(),
            },
            initial_context: iteration.initial_context.clone(),
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        let mut ctx = tera::Context::from_serialize(self)?;
        match &self.initial_context {
            Value::Object(map) => {
                for (k, v) in map {
                    ctx.insert(k.as_str(), v);
                }
            }
            Value::Null => {}
            other => ctx.insert("item", other),
        }
        Ok(ctx)
    }
}

/// Layer the object at `overlay` over `base`, key by key.
pub fn merge_overridable(base: &Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (k, v) in overlay {
                merged.insert(k, v);
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base.clone(),
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initial_context_keys_are_top_level() {
        let session = Session::new("s-1");
        let pkg = TemplatePackage::single("/tpl/c.tera", "c");
        let iteration = IterationOptions::for_item("on_off", json!({ "name": "On/Off", "code": 6 }));
        let ctx = RenderContext::new(session, &pkg, None, &iteration, &BTreeMap::new(), json!({}));
        let tera_ctx = ctx.to_tera_context().expect("context");
        let out = tera::Tera::one_off(
            "{{ name }}/{{ code }}/{{ iteration.key }}/{{ global.session_id }}",
            &tera_ctx,
            false,
        )
        .expect("render");
        assert_eq!(out, "On/Off/6/on_off/s-1");
    }

    #[test]
    fn scalar_initial_context_is_item() {
        let pkg = TemplatePackage::single("/tpl/c.tera", "c");
        let iteration = IterationOptions::for_item("k", json!(5));
        let ctx = RenderContext::new(Session::new("s"), &pkg, None, &iteration, &BTreeMap::new(), Value::Null);
        let tera_ctx = ctx.to_tera_context().expect("context");
        assert_eq!(tera::Tera::one_off("{{ item }}", &tera_ctx, false).unwrap(), "5");
    }

    #[test]
    fn merge_overridable_overlay_wins() {
        let merged = merge_overridable(&json!({ "a": 1, "b": 2 }), json!({ "b": 3, "c": 4 }));
        assert_eq!(merged, json!({ "a": 1, "b": 3, "c": 4 }));
        assert_eq!(merge_overridable(&json!({ "a": 1 }), Value::Null), json!({ "a": 1 }));
    }
}
