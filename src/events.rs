//! Router event bus.
//!
//! Each router is handed an [`EventAggregator`] at construction; nested
//! routers share their root's. Publishing with nobody listening is fine.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::instruction::NavigationInstruction;
use crate::pipeline::PipelineResult;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouterEventKind {
    Processing,
    Error,
    Canceled,
    Success,
    /// Published for every outer navigation, whatever the outcome.
    Complete,
    /// Published for follow-up attempts chained inside one navigation.
    ChildComplete,
}

impl RouterEventKind {
    /// The conventional channel name, e.g. `router:navigation:complete`.
    pub fn channel(self) -> &'static str {
        match self {
            Self::Processing => "router:navigation:processing",
            Self::Error => "router:navigation:error",
            Self::Canceled => "router:navigation:canceled",
            Self::Success => "router:navigation:success",
            Self::Complete => "router:navigation:complete",
            Self::ChildComplete => "router:navigation:child:complete",
        }
    }
}

#[derive(Clone)]
pub struct RouterEvent {
    pub kind: RouterEventKind,
    pub instruction: Arc<NavigationInstruction>,
    /// Set once the attempt settled.
    pub result: Option<PipelineResult>,
}

impl fmt::Debug for RouterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterEvent")
            .field("kind", &self.kind)
            .field("fragment", &self.instruction.fragment)
            .field("status", &self.result.as_ref().map(|r| r.status))
            .finish()
    }
}

/// Broadcasts [`RouterEvent`]s to every subscriber.
#[derive(Clone)]
pub struct EventAggregator {
    sender: broadcast::Sender<RouterEvent>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.sender.subscribe()
    }

    pub fn publish(
        &self,
        kind: RouterEventKind,
        instruction: &Arc<NavigationInstruction>,
        result: Option<&PipelineResult>,
    ) {
        tracing::trace!(channel = kind.channel(), fragment = %instruction.fragment, "publish");
        // No receivers is not an error.
        let _ = self.sender.send(RouterEvent {
            kind,
            instruction: Arc::clone(instruction),
            result: result.cloned(),
        });
    }
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventAggregator")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
