//! Built-in helper set, grouped by category.
//!
//! | Category  | Helpers                                                         |
//! |-----------|-----------------------------------------------------------------|
//! | `string`  | `as_snake`, `as_camel`, `as_pascal`, `as_macro`, `as_hex`       |
//! | `session` | `session_option`, `cluster_name`, `endpoint_count`, `session_items` |
//! | `meta`    | `resource`, `template_options`                                  |
//!
//! A manifest's `categories` list selects which groups load; empty loads all.

use std::collections::HashMap;
use std::sync::Arc;

use heck::{ToLowerCamelCase, ToShoutySnakeCase, ToSnakeCase, ToUpperCamelCase};
use serde_json::{json, Value};

use crate::helpers::{HelperContext, HelperRegistry};

pub const CATEGORY_STRING: &str = "string";
pub const CATEGORY_SESSION: &str = "session";
pub const CATEGORY_META: &str = "meta";

/// Register the built-in helpers selected by `ctx.meta.categories`, then aliases.
pub fn register_builtins(registry: &mut HelperRegistry, ctx: &HelperContext) {
    let wanted = |category: &str| {
        ctx.meta.categories.is_empty() || ctx.meta.categories.iter().any(|c| c == category)
    };
    if wanted(CATEGORY_STRING) {
        register_string(registry);
    }
    if wanted(CATEGORY_SESSION) {
        register_session(registry, ctx);
    }
    if wanted(CATEGORY_META) {
        register_meta(registry, ctx);
    }
    registry.apply_aliases(&ctx.meta.aliases);
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arg<'a>(args: &'a HashMap<String, Value>, name: &str, helper: &str) -> tera::Result<&'a Value> {
    args.get(name)
        .ok_or_else(|| tera::Error::msg(format!("{helper}: missing argument `{name}`")))
}

fn arg_str(args: &HashMap<String, Value>, name: &str, helper: &str) -> tera::Result<String> {
    match arg(args, name, helper)? {
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

fn arg_u64(args: &HashMap<String, Value>, name: &str, helper: &str) -> tera::Result<u64> {
    let value = arg(args, name, helper)?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(parse_number))
        .ok_or_else(|| tera::Error::msg(format!("{helper}: `{name}` must be a number, got {value}")))
}

fn parse_number(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn store_err(helper: &str, err: stencil_core::StoreError) -> tera::Error {
    tera::Error::msg(format!("{helper}: {err}"))
}

// ---------------------------------------------------------------------------
// string
// ---------------------------------------------------------------------------

fn string_filter(
    registry: &mut HelperRegistry,
    name: &'static str,
    convert: fn(&str) -> String,
) {
    registry.register_filter(name, move |value: &Value, _: &HashMap<String, Value>| {
        match value.as_str() {
            Some(s) => Ok(Value::String(convert(s))),
            None => Err(tera::Error::msg(format!("{name}: expected a string, got {value}"))),
        }
    });
}

fn register_string(registry: &mut HelperRegistry) {
    string_filter(registry, "as_snake", |s| s.to_snake_case());
    string_filter(registry, "as_camel", |s| s.to_lower_camel_case());
    string_filter(registry, "as_pascal", |s| s.to_upper_camel_case());
    string_filter(registry, "as_macro", |s| s.to_shouty_snake_case());

    registry.register_filter("as_hex", |value: &Value, args: &HashMap<String, Value>| {
        let number = value
            .as_u64()
            .or_else(|| value.as_str().and_then(parse_number))
            .ok_or_else(|| tera::Error::msg(format!("as_hex: expected a number, got {value}")))?;
        let width = args.get("width").and_then(Value::as_u64).unwrap_or(4) as usize;
        Ok(Value::String(format!("0x{number:0width$X}")))
    });
}

// ---------------------------------------------------------------------------
// session
// ---------------------------------------------------------------------------

fn register_session(registry: &mut HelperRegistry, ctx: &HelperContext) {
    let store = ctx.store.clone();
    let session = ctx.session_id.clone();
    registry.register_function("session_option", move |args: &HashMap<String, Value>| {
        let key = arg_str(args, "key", "session_option")?;
        let loaded = store
            .load_session(&session)
            .map_err(|e| store_err("session_option", e))?;
        match loaded.options.get(&key) {
            Some(v) => Ok(Value::String(v.clone())),
            None => Ok(args.get("default").cloned().unwrap_or(Value::Null)),
        }
    });

    let store = ctx.store.clone();
    let session = ctx.session_id.clone();
    registry.register_function("cluster_name", move |args: &HashMap<String, Value>| {
        let code = arg_u64(args, "code", "cluster_name")?;
        let loaded = store
            .load_session(&session)
            .map_err(|e| store_err("cluster_name", e))?;
        u32::try_from(code)
            .ok()
            .and_then(|code| loaded.cluster(code))
            .map(|c| Value::String(c.name.clone()))
            .ok_or_else(|| tera::Error::msg(format!("cluster_name: unknown cluster code {code}")))
    });

    let store = ctx.store.clone();
    let session = ctx.session_id.clone();
    registry.register_function("endpoint_count", move |_: &HashMap<String, Value>| {
        let loaded = store
            .load_session(&session)
            .map_err(|e| store_err("endpoint_count", e))?;
        Ok(Value::from(loaded.endpoints.len()))
    });

    let store = ctx.store.clone();
    let session = ctx.session_id.clone();
    registry.register_function("session_items", move |args: &HashMap<String, Value>| {
        let iterator = arg_str(args, "iterator", "session_items")?;
        let items = store
            .iterate(&session, &iterator)
            .map_err(|e| store_err("session_items", e))?;
        Ok(Value::Array(items))
    });
}

// ---------------------------------------------------------------------------
// meta
// ---------------------------------------------------------------------------

fn register_meta(registry: &mut HelperRegistry, ctx: &HelperContext) {
    let resources = Arc::new(ctx.meta.resources.clone());
    registry.register_function("resource", move |args: &HashMap<String, Value>| {
        let name = arg_str(args, "name", "resource")?;
        resources
            .get(&name)
            .map(|path| Value::String(path.clone()))
            .ok_or_else(|| tera::Error::msg(format!("resource: no resource named '{name}'")))
    });

    let store = ctx.store.clone();
    let manifest = ctx.manifest_package.clone();
    registry.register_function("template_options", move |args: &HashMap<String, Value>| {
        let category = arg_str(args, "category", "template_options")?;
        let Some(package) = &manifest else {
            return Ok(Value::Array(Vec::new()));
        };
        let options = store
            .package_options(package, &category)
            .map_err(|e| store_err("template_options", e))?;
        Ok(Value::Array(
            options
                .into_iter()
                .map(|o| json!({ "code": o.code, "label": o.label }))
                .collect(),
        ))
    });
}
