//! History backend boundary and an in-memory backend.
//!
//! The backend owns the visible location. When a navigation is triggered it
//! calls the route handler installed by the root router at activation.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::queue::PendingNavigation;
use crate::utils;
use crate::RouterError;

/// How a navigation request should touch the history backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationOptions {
    /// Run the router for the new location.
    pub trigger: bool,
    /// Replace the current entry instead of pushing a new one.
    pub replace: bool,
    /// Commands only: navigate with the root router instead of the
    /// capturing router.
    pub use_app_router: bool,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            trigger: true,
            replace: false,
            use_app_router: false,
        }
    }
}

impl NavigationOptions {
    /// Rewrite the location without running the router.
    pub fn silent_replace() -> Self {
        Self {
            trigger: false,
            replace: true,
            use_app_router: false,
        }
    }
}

/// Called by the backend with the new fragment when a navigation triggers.
pub type RouteHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<PendingNavigation, RouterError>> + Send + Sync>;

/// Handed to the backend when the root router activates.
#[derive(Clone)]
pub struct HistoryOptions {
    pub route_handler: RouteHandler,
    pub root: String,
    pub push_state: bool,
}

impl fmt::Debug for HistoryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryOptions")
            .field("root", &self.root)
            .field("push_state", &self.push_state)
            .finish()
    }
}

/// The location/history backend.
#[async_trait]
pub trait History: Send + Sync {
    /// Start listening. Loads the current location unless already active.
    async fn activate(
        &self,
        options: HistoryOptions,
    ) -> Result<Option<PendingNavigation>, RouterError>;

    fn deactivate(&self);

    /// Read a value stored on the current entry.
    fn get_state(&self, key: &str) -> Option<serde_json::Value>;

    /// Store a value on the current entry.
    fn set_state(&self, key: &str, value: serde_json::Value);

    /// Change the location. Returns the queued navigation when triggered.
    async fn navigate(
        &self,
        fragment: &str,
        options: &NavigationOptions,
    ) -> Result<Option<PendingNavigation>, RouterError>;

    async fn navigate_back(&self) -> Result<Option<PendingNavigation>, RouterError>;

    fn uses_push_state(&self) -> bool;
}

// ---------------------------------------------------------------------------
// MemoryHistory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct HistoryEntry {
    fragment: String,
    state: serde_json::Map<String, serde_json::Value>,
}

impl HistoryEntry {
    fn new(fragment: String) -> Self {
        Self {
            fragment,
            state: serde_json::Map::new(),
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    entries: Vec<HistoryEntry>,
    index: usize,
    options: Option<HistoryOptions>,
    active: bool,
    activations: usize,
    push_state: bool,
}

/// An entry stack standing in for a browser history.
#[derive(Debug)]
pub struct MemoryHistory {
    state: Mutex<MemoryState>,
}

impl MemoryHistory {
    pub fn new(initial_fragment: &str) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: vec![HistoryEntry::new(utils::normalize_fragment(initial_fragment))],
                index: 0,
                options: None,
                active: false,
                activations: 0,
                push_state: false,
            }),
        }
    }

    pub fn with_push_state(self) -> Self {
        self.lock().push_state = true;
        self
    }

    /// The current location, with its query string.
    pub fn fragment(&self) -> String {
        let state = self.lock();
        state.entries[state.index].fragment.clone()
    }

    /// Every entry, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .map(|entry| entry.fragment.clone())
            .collect()
    }

    /// How many times `activate` reached the backend.
    pub fn activation_count(&self) -> usize {
        self.lock().activations
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory history poisoned")
    }

    async fn trigger(&self, fragment: String) -> Result<Option<PendingNavigation>, RouterError> {
        let handler = self
            .lock()
            .options
            .as_ref()
            .map(|options| Arc::clone(&options.route_handler));
        match handler {
            Some(handler) => handler(fragment).await.map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl History for MemoryHistory {
    async fn activate(
        &self,
        options: HistoryOptions,
    ) -> Result<Option<PendingNavigation>, RouterError> {
        let fragment = {
            let mut state = self.lock();
            if state.active {
                return Ok(None);
            }
            state.active = true;
            state.activations += 1;
            state.push_state = state.push_state || options.push_state;
            state.options = Some(options);
            state.entries[state.index].fragment.clone()
        };
        self.trigger(fragment).await
    }

    fn deactivate(&self) {
        let mut state = self.lock();
        state.active = false;
        state.options = None;
    }

    fn get_state(&self, key: &str) -> Option<serde_json::Value> {
        let state = self.lock();
        state.entries[state.index].state.get(key).cloned()
    }

    fn set_state(&self, key: &str, value: serde_json::Value) {
        let mut state = self.lock();
        let index = state.index;
        state.entries[index].state.insert(key.to_string(), value);
    }

    async fn navigate(
        &self,
        fragment: &str,
        options: &NavigationOptions,
    ) -> Result<Option<PendingNavigation>, RouterError> {
        let fragment = utils::normalize_fragment(fragment);
        {
            let mut state = self.lock();
            if !state.active {
                return Ok(None);
            }
            let index = state.index;
            if state.entries[index].fragment == fragment && !options.replace {
                return Ok(None);
            }
            if options.replace {
                state.entries[index] = HistoryEntry::new(fragment.clone());
            } else {
                state.entries.truncate(index + 1);
                state.entries.push(HistoryEntry::new(fragment.clone()));
                state.index = index + 1;
            }
        }
        if options.trigger {
            self.trigger(fragment).await
        } else {
            Ok(None)
        }
    }

    async fn navigate_back(&self) -> Result<Option<PendingNavigation>, RouterError> {
        let fragment = {
            let mut state = self.lock();
            if !state.active || state.index == 0 {
                return Ok(None);
            }
            state.index -= 1;
            state.entries[state.index].fragment.clone()
        };
        self.trigger(fragment).await
    }

    fn uses_push_state(&self) -> bool {
        self.lock().push_state
    }
}
