// ============================
// classroom-backend-lib/src/lib.rs
// ============================
//! Core backend-lib functionality for the live class session coordinator.

pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod outbound;
pub mod persist;
pub mod relay;
pub mod room;
pub mod ws_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::coordinator::{spawn_coordinator, CoordinatorHandle};
use crate::error::AppError;
use crate::persist::{FlatFileSessionStore, SessionStore};
use crate::room::RoomRegistry;

/// Application state shared across all handlers.
///
/// This is the composition root: the registry and coordinator are owned
/// here and injected where needed, never reached through globals.
#[derive(Clone)]
pub struct AppState {
    /// In-memory room registry, read directly by the introspection routes
    pub registry: Arc<RoomRegistry>,
    /// Handle to the coordinator event stream
    pub coordinator: CoordinatorHandle,
    /// Settings manager
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create a new application state and spawn the coordinator actor.
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        let store = Arc::new(FlatFileSessionStore::new(&settings.data_dir)?);
        Self::with_store(settings, store)
    }

    /// Create an application state backed by an explicit session store.
    pub fn with_store(settings: Settings, store: Arc<dyn SessionStore>) -> Result<Self, AppError> {
        let registry = Arc::new(RoomRegistry::new());
        let coordinator = spawn_coordinator(
            registry.clone(),
            store,
            settings.recording_flush_bytes,
        );

        Ok(Self {
            registry,
            coordinator,
            settings: Arc::new(settings),
        })
    }
}
