//! # stencil-renderer
//!
//! Tera-based template compilation and content production for stencil
//! generation sessions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use stencil_core::{IterationOptions, MemoryStore, Session, SessionId, TemplatePackage};
//! use stencil_renderer::{build_base, ContentProducer, HelperRegistry, TemplateCache};
//!
//! fn render_once(pkg: &TemplatePackage) {
//!     let store = MemoryStore::new([Session::new("s-1")]);
//!     let registry = HelperRegistry::new();
//!     let mut cache = TemplateCache::new(build_base(&[], &registry).expect("base"));
//!     let resources = BTreeMap::new();
//!     let overridable = serde_json::json!({});
//!     let producer = ContentProducer::new(&store, &resources, &overridable);
//!     if let Ok(compiled) = cache.compile(pkg) {
//!         let content = producer.produce(
//!             &compiled,
//!             &SessionId::from("s-1"),
//!             pkg,
//!             None,
//!             &IterationOptions::default(),
//!         );
//!         println!("{content:?}");
//!     }
//! }
//! ```

pub mod builtin;
pub mod compiler;
pub mod context;
pub mod error;
pub mod helpers;
pub mod producer;

pub use builtin::register_builtins;
pub use compiler::{build_base, CompiledTemplate, TemplateCache};
pub use context::RenderContext;
pub use error::{error_chain, HelperLoadError, RenderError, TemplateSyntaxError};
pub use helpers::{
    FileHelperModule, Helper, HelperCollision, HelperContext, HelperModule, HelperRegistry, Tier,
};
pub use producer::{load_override, split_fragments, ContentProducer, FRAGMENT_MARKER};
