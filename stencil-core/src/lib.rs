//! Stencil core library: domain types, session model, store seam, manifests.
//!
//! - [`types`]: newtypes, packages, jobs, fragments
//! - [`session`]: session model and iterators
//! - [`store`]: [`SessionStore`] / [`StoreConnector`] and implementations
//! - [`manifest`]: `gen-templates.json` loading
//! - [`error`]: [`CoreError`], [`StoreError`]

pub mod error;
pub mod manifest;
pub mod session;
pub mod store;
pub mod types;

pub use error::{CoreError, StoreError};
pub use manifest::Manifest;
pub use session::Session;
pub use store::{MemoryStore, SessionStore, StoreConnector, YamlSessionStore, YamlStoreConnector};
pub use types::{
    Content, Fragment, IterationOptions, MetaInfo, PackageId, PackageOption, PackageType,
    RenderJob, SessionId, TemplatePackage,
};
