//! Navigation queue - the root router's single-flight drain loop
//!
//! The queue holds at most one waiting instruction. Queuing a new one drops
//! the waiting one (its [`PendingNavigation`] settles with
//! [`RouterError::Superseded`]), so a burst of requests collapses to the
//! last. Draining runs on a spawned task:
//! 1. take the waiting instruction, classify its direction, run the pipeline
//! 2. follow a navigation command, or restore the last good location
//! 3. drain again as a follow-up attempt, bounded by `max_instruction_count`
//! 4. settle the instruction and publish its events

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::command::NavigationCommand;
use crate::events::RouterEventKind;
use crate::history::{HistoryOptions, NavigationOptions, RouteHandler};
use crate::instruction::NavigationInstruction;
use crate::pipeline::{PipelineOutput, PipelineResult};
use crate::router::Router;
use crate::{utils, RouterError};

/// History-state key holding the navigation tracker.
pub const NAVIGATION_TRACKER_KEY: &str = "NavigationTracker";

/// How the current navigation relates to the history stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationDirection {
    /// The first navigation of this router.
    First,
    /// An entry never seen before.
    New,
    /// A tracked entry this router has not seen yet (reload).
    Refresh,
    Forward,
    Back,
}

// ---------------------------------------------------------------------------
// PendingNavigation
// ---------------------------------------------------------------------------

/// Settles with the result of a queued navigation.
#[derive(Debug)]
pub struct PendingNavigation {
    fragment: String,
    receiver: oneshot::Receiver<Result<PipelineResult, RouterError>>,
}

impl PendingNavigation {
    /// The fragment (with query string) that was queued.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }
}

impl Future for PendingNavigation {
    type Output = Result<PipelineResult, RouterError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RouterError::Superseded(this.fragment.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct QueueState {
    active: bool,
    pending: Option<Arc<NavigationInstruction>>,
    navigating: bool,
    /// Every can-deactivate callback of the current navigation allowed it.
    could_deactivate: bool,
    current_tracker: Option<u64>,
    last_tracker: u64,
    direction: Option<NavigationDirection>,
    /// Last location a navigation completed at.
    previous_location: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct NavigationQueue {
    state: Mutex<QueueState>,
}

impl NavigationQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("navigation queue poisoned")
    }
}

/// Fragment plus query string.
fn location(instruction: &NavigationInstruction) -> String {
    if instruction.query_string.is_empty() {
        instruction.fragment.clone()
    } else {
        format!("{}?{}", instruction.fragment, instruction.query_string)
    }
}

// ---------------------------------------------------------------------------
// Router queue operations
// ---------------------------------------------------------------------------

impl Router {
    fn with_queue<R>(self: &Arc<Self>, f: impl FnOnce(&mut QueueState) -> R) -> Option<R> {
        let root = self.root();
        let queue = root.queue.as_ref()?;
        let mut state = queue.lock();
        Some(f(&mut state))
    }

    /// Start listening to the history backend. A second call is a no-op.
    pub async fn activate(self: &Arc<Self>) -> Result<Option<PendingNavigation>, RouterError> {
        let root = self.root();
        let first = root
            .with_queue(|state| !std::mem::replace(&mut state.active, true))
            .unwrap_or(false);
        if !first {
            tracing::debug!("router already active");
            return Ok(None);
        }

        let weak = Arc::downgrade(&root);
        let route_handler: RouteHandler = Arc::new(move |fragment: String| {
            let weak = weak.clone();
            async move {
                let router = weak.upgrade().ok_or(RouterError::RouterDropped)?;
                router.load_url(&fragment).await
            }
            .boxed()
        });
        let options = root.options();
        tracing::info!(root = %options.root, push_state = options.push_state, "router activated");
        root.services()
            .history
            .activate(HistoryOptions {
                route_handler,
                root: options.root,
                push_state: options.push_state,
            })
            .await
    }

    /// Stop listening. Navigations already queued still drain.
    pub fn deactivate(self: &Arc<Self>) {
        let root = self.root();
        root.with_queue(|state| state.active = false);
        root.services().history.deactivate();
        tracing::info!("router deactivated");
    }

    pub fn is_active(self: &Arc<Self>) -> bool {
        self.with_queue(|state| state.active).unwrap_or(false)
    }

    pub fn is_navigating(self: &Arc<Self>) -> bool {
        self.with_queue(|state| state.navigating).unwrap_or(false)
    }

    /// Direction of the most recently dequeued navigation.
    pub fn navigation_direction(self: &Arc<Self>) -> Option<NavigationDirection> {
        self.with_queue(|state| state.direction).flatten()
    }

    pub(crate) fn set_could_deactivate(self: &Arc<Self>) {
        self.with_queue(|state| state.could_deactivate = true);
    }

    /// Resolve `url` and queue it. When nothing resolves, the previous
    /// location is restored and the resolution error returned.
    pub async fn load_url(self: &Arc<Self>, url: &str) -> Result<PendingNavigation, RouterError> {
        let root = self.root();
        match root.create_navigation_instruction(url, None) {
            Ok(instruction) => Ok(root.queue_instruction(instruction)),
            Err(err) => {
                tracing::error!(%url, error = %err, "could not resolve navigation");
                root.restore_previous_location(Some(&utils::resolve_url(url, "")))
                    .await;
                Err(err)
            }
        }
    }

    /// Put `instruction` in the single waiting slot and start draining.
    pub(crate) fn queue_instruction(
        self: &Arc<Self>,
        instruction: Arc<NavigationInstruction>,
    ) -> PendingNavigation {
        let root = self.root();
        let (sender, receiver) = oneshot::channel();
        instruction.attach_settler(sender);
        let pending = PendingNavigation {
            fragment: location(&instruction),
            receiver,
        };

        let superseded = root
            .with_queue(|state| state.pending.replace(Arc::clone(&instruction)))
            .flatten();
        if let Some(old) = superseded {
            tracing::debug!(dropped = %location(&old), by = %pending.fragment, "navigation superseded");
            old.settle(Err(RouterError::Superseded(location(&old))));
        }
        tracing::debug!(fragment = %pending.fragment, "navigation queued");

        root.spawn_drain();
        pending
    }

    fn spawn_drain(self: &Arc<Self>) {
        let router = Arc::clone(self);
        let span = router.services().span.clone();
        tokio::spawn(
            async move {
                if let Err(err) = router.dequeue(0).await {
                    tracing::error!(error = %err, "navigation abandoned");
                }
            }
            .instrument(span),
        );
    }

    /// One attempt. `count == 0` starts a navigation and is a no-op while
    /// another is in flight; higher counts are follow-ups of that flight.
    fn dequeue(
        self: Arc<Self>,
        count: usize,
    ) -> BoxFuture<'static, Result<Option<PipelineResult>, RouterError>> {
        async move {
            let Some((instruction, use_can_deactivate)) = self
                .with_queue(|state| {
                    if state.navigating && count == 0 {
                        return None;
                    }
                    let instruction = state.pending.take()?;
                    state.navigating = true;
                    Some((instruction, !state.could_deactivate))
                })
                .flatten()
            else {
                return Ok(None);
            };

            let max = self.options().max_instruction_count.max(1);
            if count >= max {
                let err = RouterError::MaxAttemptsExceeded(max);
                tracing::error!(attempts = count, fragment = %instruction.fragment, "{}", err);
                instruction.settle(Err(err.clone()));
                return Err(err);
            }

            let direction = self.classify_direction();
            tracing::debug!(attempt = count, fragment = %instruction.fragment, ?direction, "dequeue");
            instruction.set_previous_instruction(self.current_instruction());

            if count == 0 {
                self.services()
                    .events
                    .publish(RouterEventKind::Processing, &instruction, None);
            } else if count == max - 1 {
                tracing::error!(
                    "{} navigation instructions have been attempted without success. Restoring last known good location.",
                    count + 1
                );
                self.restore_previous_location(Some(&location(&instruction)))
                    .await;
            }

            let pipeline = self
                .services()
                .pipeline_provider
                .create_pipeline(use_can_deactivate);
            let result = pipeline.run(&instruction).await;
            tracing::debug!(status = ?result.status, output = ?result.output, "pipeline settled");

            let outcome = self.process_result(&instruction, result, count).await;
            self.resolve_instruction(&instruction, outcome, count > 0)
        }
        .boxed()
    }

    async fn process_result(
        self: &Arc<Self>,
        instruction: &Arc<NavigationInstruction>,
        result: PipelineResult,
        count: usize,
    ) -> Result<PipelineResult, RouterError> {
        if result.completed() {
            instruction.finalize();
        }
        // Commands from callbacks that let processing continue are queued
        // whatever the outcome, after any restore.
        let deferred = instruction.take_deferred_commands();

        let mut final_result = None;
        match result.output.command() {
            Some(command) => {
                self.run_commands(&deferred).await;
                self.run_command(command).await;
            }
            None => {
                if !result.completed() {
                    if let PipelineOutput::Error(err) = &result.output {
                        tracing::error!(fragment = %instruction.fragment, "{:#}", err);
                    }
                    self.restore_previous_location(Some(&location(instruction)))
                        .await;
                }
                self.run_commands(&deferred).await;
                final_result = Some(result.clone());
            }
        }

        let inner = Arc::clone(self).dequeue(count + 1).await?;
        Ok(final_result.or(inner).unwrap_or(result))
    }

    async fn run_commands(self: &Arc<Self>, commands: &[Arc<dyn NavigationCommand>]) {
        for command in commands {
            self.run_command(command).await;
        }
    }

    async fn run_command(self: &Arc<Self>, command: &Arc<dyn NavigationCommand>) {
        tracing::debug!(?command, "following navigation command");
        if let Err(err) = command.navigate(self).await {
            tracing::warn!(?command, error = %err, "navigation command failed");
        }
    }

    fn resolve_instruction(
        self: &Arc<Self>,
        instruction: &Arc<NavigationInstruction>,
        outcome: Result<PipelineResult, RouterError>,
        is_inner: bool,
    ) -> Result<Option<PipelineResult>, RouterError> {
        instruction.settle(outcome.clone());
        let events = &self.services().events;
        let result = outcome.as_ref().ok();

        if is_inner {
            events.publish(RouterEventKind::ChildComplete, instruction, result);
            return outcome.map(Some);
        }

        let kind = match &outcome {
            Err(_) => RouterEventKind::Error,
            Ok(result) if result.output.is_error() => RouterEventKind::Error,
            Ok(result) if !result.completed() => RouterEventKind::Canceled,
            Ok(_) => RouterEventKind::Success,
        };
        let waiting = self
            .with_queue(|state| {
                state.navigating = false;
                state.could_deactivate = false;
                if let (RouterEventKind::Success, Ok(result)) = (kind, &outcome) {
                    state.previous_location = Some(location(&result.instruction));
                }
                state.pending.is_some()
            })
            .unwrap_or(false);

        tracing::info!(fragment = %instruction.fragment, outcome = ?kind, "navigation settled");
        events.publish(kind, instruction, result);
        events.publish(RouterEventKind::Complete, instruction, result);

        if waiting {
            self.spawn_drain();
        }
        outcome.map(Some)
    }

    /// Compare the entry's tracker with the last seen one, stamping new
    /// entries with a fresh tracker.
    fn classify_direction(self: &Arc<Self>) -> Option<NavigationDirection> {
        let history = &self.services().history;
        let stored = history
            .get_state(NAVIGATION_TRACKER_KEY)
            .and_then(|value| value.as_u64());

        let (direction, tracker) = self.with_queue(|state| {
            let direction = match (stored, state.current_tracker) {
                (None, None) => NavigationDirection::First,
                (None, Some(_)) => NavigationDirection::New,
                (Some(_), None) => NavigationDirection::Refresh,
                (Some(stored), Some(current)) if current < stored => NavigationDirection::Forward,
                (Some(stored), Some(current)) if current > stored => NavigationDirection::Back,
                (Some(_), Some(_)) => NavigationDirection::Refresh,
            };
            let tracker = match stored {
                Some(stored) => {
                    state.last_tracker = state.last_tracker.max(stored);
                    stored
                }
                None => {
                    state.last_tracker += 1;
                    state.last_tracker
                }
            };
            state.current_tracker = Some(tracker);
            state.direction = Some(direction);
            (direction, tracker)
        })?;

        if stored.is_none() {
            history.set_state(NAVIGATION_TRACKER_KEY, serde_json::json!(tracker));
        }
        Some(direction)
    }

    /// Put the location back after a failed navigation: the last good
    /// location without re-running the router, else the fallback route,
    /// else give up and leave the location as is.
    async fn restore_previous_location(self: &Arc<Self>, failed: Option<&str>) {
        let previous = self
            .with_queue(|state| state.previous_location.clone())
            .flatten();
        let fallback = self
            .fallback_route()
            .filter(|fallback| failed != Some(utils::resolve_url(fallback, "").as_str()));

        let restored = if let Some(previous) = previous {
            tracing::debug!(%previous, "restoring previous location");
            self.navigate(&format!("/{}", previous), &NavigationOptions::silent_replace())
                .await
        } else if let Some(fallback) = fallback {
            tracing::debug!(%fallback, "navigating to fallback route");
            let options = NavigationOptions {
                trigger: true,
                replace: true,
                use_app_router: false,
            };
            self.navigate(&format!("/{}", utils::normalize_fragment(&fallback)), &options)
                .await
        } else {
            tracing::error!(
                "Router navigation failed, and no previous location or fallbackRoute could be restored."
            );
            return;
        };

        if let Err(err) = restored {
            tracing::warn!(error = %err, "restoring location failed");
        }
    }
}
