//! Session Registry
//!
//! Maps each context to the live backend session serving it.
//!
//! # Design Philosophy
//!
//! A context keeps talking to the same backend session (and therefore the
//! same runtime thread) for as long as the session's binding key, the
//! normalized working directory, stays the same. When a request arrives with a
//! different key, a fresh session is created and replaces the old mapping; the
//! old session is simply dropped.
//!
//! Lookup, comparison and replacement happen under the context's entry lock,
//! so two concurrent requests for one context never create two sessions.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::backend::BackendSession;
use crate::tasks::ContextId;

struct SessionEntry {
    binding_key: String,
    session: Arc<dyn BackendSession>,
}

/// Context id to backend session map
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ContextId, SessionEntry>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for a context, creating or replacing it if needed
    ///
    /// The cached session is returned when its binding key equals
    /// `binding_key`. Otherwise `factory` is called and its session replaces
    /// the mapping. A factory error is returned as-is and leaves any previous
    /// mapping in place.
    pub fn get_or_create<E>(
        &self,
        context_id: &ContextId,
        binding_key: &str,
        factory: impl FnOnce() -> Result<Arc<dyn BackendSession>, E>,
    ) -> Result<Arc<dyn BackendSession>, E> {
        match self.sessions.entry(context_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().binding_key == binding_key {
                    tracing::debug!(context_id = %context_id, "Reusing session");
                    return Ok(Arc::clone(&entry.get().session));
                }

                let session = factory()?;
                tracing::info!(
                    context_id = %context_id,
                    previous = %entry.get().binding_key,
                    binding_key = %binding_key,
                    "Binding key changed; replaced session"
                );
                entry.insert(SessionEntry {
                    binding_key: binding_key.to_string(),
                    session: Arc::clone(&session),
                });
                Ok(session)
            }
            Entry::Vacant(entry) => {
                let session = factory()?;
                tracing::info!(
                    context_id = %context_id,
                    binding_key = %binding_key,
                    "Created session"
                );
                entry.insert(SessionEntry {
                    binding_key: binding_key.to_string(),
                    session: Arc::clone(&session),
                });
                Ok(session)
            }
        }
    }

    /// Binding key of the context's current session
    #[must_use]
    pub fn binding_key(&self, context_id: &ContextId) -> Option<String> {
        self.sessions
            .get(context_id)
            .map(|entry| entry.binding_key.clone())
    }

    /// Number of mapped contexts
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no context is mapped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Trim a working directory; empty means absent
#[must_use]
pub fn normalize_working_directory(dir: Option<&str>) -> Option<String> {
    dir.map(str::trim)
        .filter(|d| !d.is_empty())
        .map(ToString::to_string)
}

/// The process working directory, used when nothing else names one
#[must_use]
pub fn default_working_directory() -> String {
    std::env::current_dir()
        .map(|dir| dir.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".to_string())
}

/// Session binding key for a run
///
/// An explicit per-task override wins over the configured directory; the
/// process default is used when both are absent.
#[must_use]
pub fn binding_key_for(task_override: Option<&str>, configured: Option<&str>) -> String {
    normalize_working_directory(task_override)
        .or_else(|| normalize_working_directory(configured))
        .unwrap_or_else(default_working_directory)
}
