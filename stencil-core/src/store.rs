//! Read-only session store seam.
//!
//! # Storage layout ([`YamlSessionStore`])
//!
//! ```text
//! <root>/
//!   sessions/
//!     <session_id>.yaml          (one file per session)
//!   package-options.yaml         (optional: package id → [PackageOption])
//! ```
//!
//! Each worker runtime opens its own handle through a [`StoreConnector`]; handles
//! are never shared between runtimes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::StoreError;
use crate::session::Session;
use crate::types::{PackageId, PackageOption, SessionId};

/// Query interface over stored sessions.
pub trait SessionStore: Send + Sync {
    /// Load the full session model.
    fn load_session(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Items of the named iterator for a session.
    fn iterate(&self, id: &SessionId, iterator: &str) -> Result<Vec<Value>, StoreError> {
        self.load_session(id)?.iterate(iterator)
    }

    /// Options stored for a package under `category`.
    fn package_options(
        &self,
        package: &PackageId,
        category: &str,
    ) -> Result<Vec<PackageOption>, StoreError>;
}

/// Opens independent store handles.
pub trait StoreConnector: Send + Sync {
    fn open(&self) -> Result<Box<dyn SessionStore>, StoreError>;
}

// ---------------------------------------------------------------------------
// YAML-backed store
// ---------------------------------------------------------------------------

/// Store reading sessions from `<root>/sessions/<id>.yaml`.
///
/// Parsed sessions are memoised per handle, so each runtime reads a session
/// file at most once.
pub struct YamlSessionStore {
    root: PathBuf,
    cache: Mutex<HashMap<SessionId, Session>>,
    options: HashMap<PackageId, Vec<PackageOption>>,
}

impl YamlSessionStore {
    /// Open a store rooted at `root`. The directory must exist.
    pub fn open_at(root: &Path) -> Result<Self, StoreError> {
        if !root.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }
        let options_path = root.join("package-options.yaml");
        let options = if options_path.exists() {
            let contents = std::fs::read_to_string(&options_path).map_err(|e| StoreError::Io {
                path: options_path.clone(),
                source: e,
            })?;
            serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
                path: options_path,
                source: e,
            })?
        } else {
            HashMap::new()
        };
        Ok(Self {
            root: root.to_path_buf(),
            cache: Mutex::new(HashMap::new()),
            options,
        })
    }

    /// `<root>/sessions/<id>.yaml`: pure, no I/O.
    pub fn session_path(&self, id: &SessionId) -> PathBuf {
        session_path_at(&self.root, id)
    }
}

/// `<root>/sessions/<id>.yaml`: pure, no I/O.
pub fn session_path_at(root: &Path, id: &SessionId) -> PathBuf {
    root.join("sessions").join(format!("{}.yaml", id.0))
}

impl SessionStore for YamlSessionStore {
    fn load_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = cache.get(id) {
            return Ok(session.clone());
        }
        let path = self.session_path(id);
        if !path.exists() {
            return Err(StoreError::SessionNotFound(id.0.clone()));
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })?;
        let session: Session =
            serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse { path, source: e })?;
        tracing::debug!(session = %id, "loaded session from yaml store");
        cache.insert(id.clone(), session.clone());
        Ok(session)
    }

    fn package_options(
        &self,
        package: &PackageId,
        category: &str,
    ) -> Result<Vec<PackageOption>, StoreError> {
        Ok(self
            .options
            .get(package)
            .map(|opts| opts.iter().filter(|o| o.category == category).cloned().collect())
            .unwrap_or_default())
    }
}

/// Connector producing a fresh [`YamlSessionStore`] per `open()`.
#[derive(Debug, Clone)]
pub struct YamlStoreConnector {
    root: PathBuf,
}

impl YamlStoreConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StoreConnector for YamlStoreConnector {
    fn open(&self) -> Result<Box<dyn SessionStore>, StoreError> {
        Ok(Box::new(YamlSessionStore::open_at(&self.root)?))
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Immutable in-memory store; cloning shares the underlying sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<HashMap<SessionId, Session>>,
    options: Arc<HashMap<PackageId, Vec<PackageOption>>>,
}

impl MemoryStore {
    pub fn new(sessions: impl IntoIterator<Item = Session>) -> Self {
        Self {
            sessions: Arc::new(sessions.into_iter().map(|s| (s.id.clone(), s)).collect()),
            options: Arc::new(HashMap::new()),
        }
    }

    /// Attach package options.
    pub fn with_options(mut self, package: PackageId, options: Vec<PackageOption>) -> Self {
        let mut map = (*self.options).clone();
        map.insert(package, options);
        self.options = Arc::new(map);
        self
    }
}

impl SessionStore for MemoryStore {
    fn load_session(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound(id.0.clone()))
    }

    fn package_options(
        &self,
        package: &PackageId,
        category: &str,
    ) -> Result<Vec<PackageOption>, StoreError> {
        Ok(self
            .options
            .get(package)
            .map(|opts| opts.iter().filter(|o| o.category == category).cloned().collect())
            .unwrap_or_default())
    }
}

impl StoreConnector for MemoryStore {
    fn open(&self) -> Result<Box<dyn SessionStore>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
