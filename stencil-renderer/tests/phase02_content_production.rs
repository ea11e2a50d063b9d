use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use stencil_core::{
    session::{Cluster, Endpoint, EndpointCluster, Side},
    IterationOptions, MemoryStore, MetaInfo, PackageId, Session, SessionId, TemplatePackage,
};
use stencil_renderer::{
    build_base, register_builtins, ContentProducer, HelperContext, HelperRegistry, RenderError,
    TemplateCache,
};
use tempfile::TempDir;

fn make_session() -> Session {
    let mut session = Session::new("light-1");
    session.name = "Dimmable light".to_string();
    session.clusters = vec![
        Cluster { code: 0x0006, name: "On/Off".into(), attributes: vec![], commands: vec![] },
        Cluster { code: 0x0008, name: "Level Control".into(), attributes: vec![], commands: vec![] },
    ];
    session.endpoints = vec![Endpoint {
        id: 1,
        device_type: "dimmable-light".into(),
        clusters: vec![
            EndpointCluster { code: 0x0006, side: Side::Server, enabled: true },
            EndpointCluster { code: 0x0008, side: Side::Server, enabled: true },
        ],
    }];
    session
}

fn write_template(dir: &TempDir, name: &str, body: &str) -> TemplatePackage {
    let path: PathBuf = dir.path().join(name);
    std::fs::write(&path, body).expect("write template");
    TemplatePackage::single(path, name.trim_end_matches(".tera"))
}

struct Fixture {
    store: MemoryStore,
    cache: TemplateCache,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new([make_session()]);
    let ctx = HelperContext {
        store: Arc::new(store.clone()),
        session_id: SessionId::from("light-1"),
        meta: MetaInfo::default(),
        manifest_package: Some(PackageId::from("manifest")),
    };
    let mut registry = HelperRegistry::new();
    register_builtins(&mut registry, &ctx);
    let partials = vec![("header".to_string(), "// {{ session.name }}\n".to_string())];
    let cache = TemplateCache::new(build_base(&partials, &registry).expect("base"));
    Fixture { store, cache }
}

#[test]
fn produces_content_with_helpers_and_partials() {
    let dir = TempDir::new().expect("tempdir");
    let pkg = write_template(
        &dir,
        "zap-id.tera",
        "{% include \"header\" %}{% for c in session_items(iterator=\"selected_server_cluster\") %}#define {{ c.name | as_macro }}_ID {{ c.code | as_hex }}\n{% endfor %}",
    )
    .with_output("zap-id.h");
    let mut fx = fixture();
    let compiled = fx.cache.compile(&pkg).expect("compile");
    let resources = BTreeMap::new();
    let overridable = json!({});
    let producer = ContentProducer::new(&fx.store, &resources, &overridable);

    let content = producer
        .produce(&compiled, &SessionId::from("light-1"), &pkg, None, &IterationOptions::default())
        .expect("produce");

    assert_eq!(content.len(), 1);
    assert_eq!(content[0].name, "zap-id.h");
    assert_eq!(
        content[0].content,
        "// Dimmable light\n#define ON_OFF_ID 0x0006\n#define LEVEL_CONTROL_ID 0x0008\n"
    );
}

#[test]
fn multi_output_template_produces_ordered_fragments() {
    let dir = TempDir::new().expect("tempdir");
    let pkg = write_template(
        &dir,
        "pair.tera",
        "@@fragment {{ iteration.key }}.h\nint {{ name | as_snake }}(void);\n@@fragment {{ iteration.key }}.c\nint {{ name | as_snake }}(void) { return {{ code }}; }\n",
    );
    let mut fx = fixture();
    let compiled = fx.cache.compile(&pkg).expect("compile");
    let resources = BTreeMap::new();
    let overridable = json!({});
    let producer = ContentProducer::new(&fx.store, &resources, &overridable);
    let iteration = IterationOptions::for_item("on_off", json!({ "name": "OnOff", "code": 6 }));

    let content = producer
        .produce(&compiled, &SessionId::from("light-1"), &pkg, None, &iteration)
        .expect("produce");

    let names: Vec<_> = content.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["on_off.h", "on_off.c"]);
    assert_eq!(content[1].content, "int on_off(void) { return 6; }\n");
}

#[test]
fn override_file_layers_over_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let pkg = write_template(&dir, "ov.tera", "{{ global.overridable.prefix }}-{{ global.overridable.suffix }}");
    let override_path = dir.path().join("override.yaml");
    std::fs::write(&override_path, "prefix: custom\n").expect("write override");

    let mut fx = fixture();
    let compiled = fx.cache.compile(&pkg).expect("compile");
    let resources = BTreeMap::new();
    let overridable = json!({ "prefix": "default", "suffix": "end" });
    let producer = ContentProducer::new(&fx.store, &resources, &overridable);
    let iteration = IterationOptions {
        override_path: Some(override_path),
        ..IterationOptions::default()
    };

    let content = producer
        .produce(&compiled, &SessionId::from("light-1"), &pkg, None, &iteration)
        .expect("produce");
    assert_eq!(content[0].content, "custom-end");
}

#[test]
fn render_failure_names_package() {
    let dir = TempDir::new().expect("tempdir");
    let pkg = write_template(&dir, "broken.tera", "{{ no_such_variable }}");
    let mut fx = fixture();
    let compiled = fx.cache.compile(&pkg).expect("compile");
    let resources = BTreeMap::new();
    let overridable = json!({});
    let producer = ContentProducer::new(&fx.store, &resources, &overridable);

    let err = producer
        .produce(&compiled, &SessionId::from("light-1"), &pkg, None, &IterationOptions::default())
        .unwrap_err();
    match err {
        RenderError::Execution { package, message, .. } => {
            assert_eq!(package, pkg.id);
            assert!(message.contains("no_such_variable"), "got: {message}");
        }
        other => panic!("expected execution error, got {other}"),
    }
}

#[test]
fn rendering_is_deterministic_and_lf_only() {
    let dir = TempDir::new().expect("tempdir");
    let pkg = write_template(&dir, "crlf.tera", "a\r\nb {{ endpoint_count() }}\r\n");
    let mut fx = fixture();
    let compiled = fx.cache.compile(&pkg).expect("compile");
    let resources = BTreeMap::new();
    let overridable = json!({});
    let producer = ContentProducer::new(&fx.store, &resources, &overridable);
    let session = SessionId::from("light-1");
    let first = producer
        .produce(&compiled, &session, &pkg, None, &IterationOptions::default())
        .expect("first");
    let second = producer
        .produce(&compiled, &session, &pkg, None, &IterationOptions::default())
        .expect("second");
    assert_eq!(first, second);
    assert_eq!(first[0].content, "a\nb 1\n");
    assert_eq!(fx.cache.compile_count(), 1);
}
