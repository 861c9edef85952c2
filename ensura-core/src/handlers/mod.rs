//! The handler contract and the `HandlerRegistry` the Runtime consults.
//! Registration happens once at startup; lookups happen on every step of
//! every pass, so the registry is a read-mostly `RwLock`.

mod aes;
mod cron;
mod filesystem;
mod http;
mod permissions;

pub use aes::AesHandler;
pub use cron::CronHandler;
pub use filesystem::FilesystemHandler;
pub use http::HttpHandler;
pub use permissions::PermissionsHandler;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ast::ResourceRef;
use crate::error::HandlerError;

#[derive(Debug, Clone)]
pub struct HandlerResult {
    pub success: bool,
    pub message: String,
    pub error: Option<HandlerError>,
}

impl HandlerResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(error: HandlerError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            error: Some(error),
        }
    }
}

/// A handler's view of the guarantee it is being asked about. The subject is
/// always resolved to an inline `(type, path)` pair by the time the Runtime
/// calls a handler — aliases are a compile-time-only concept.
pub struct HandlerCtx<'a> {
    pub subject: &'a ResourceRef,
    pub condition: &'a str,
    pub args: &'a BTreeMap<String, String>,
}

pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &HandlerCtx) -> HandlerResult;
    fn enforce(&self, ctx: &HandlerCtx) -> HandlerResult;
}

#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<HashMap<&'static str, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates the registry with the five reference handlers. Safe to
    /// call more than once; later registrations overwrite earlier ones
    /// under the same name.
    pub fn with_defaults() -> Self {
        let reg = Self::new();
        reg.register(Arc::new(FilesystemHandler));
        reg.register(Arc::new(PermissionsHandler));
        reg.register(Arc::new(AesHandler));
        reg.register(Arc::new(HttpHandler));
        reg.register(Arc::new(CronHandler));
        reg
    }

    pub fn register(&self, handler: Arc<dyn Handler>) {
        let mut map = self.inner.write().expect("handler registry lock poisoned");
        map.insert(handler.name(), handler);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let map = self.inner.read().expect("handler registry lock poisoned");
        map.get(name).cloned()
    }
}

/// Resolves a subject to its filesystem-like path, for handlers that only
/// make sense on `file`/`directory`/`http` subjects with an inline path.
/// Aliases never reach a handler — the binder/planner always resolve down
/// to the underlying `(type, path)` pair before this point.
pub fn subject_path(subject: &ResourceRef) -> Result<&str, HandlerError> {
    match subject {
        ResourceRef::Inline { path, .. } => Ok(path.as_str()),
        ResourceRef::Alias(_) => Err(HandlerError::NoSubject),
    }
}
