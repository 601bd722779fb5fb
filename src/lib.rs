//! # Zenith Router
//!
//! Turns a location change into a tree of component-activation instructions
//! and drives that tree through an ordered, cancelable pipeline.
//!
//! A navigation flows through four stages:
//! 1. The fragment is matched against the router's route tables and wrapped in
//!    a [`NavigationInstruction`] (one per participating router level).
//! 2. The plan builder diffs the instruction against the previously committed
//!    one and decides, per view port, whether the component may stay, must
//!    re-run its lifecycle, or must be replaced.
//! 3. The [`Pipeline`] runs the fixed step sequence (plan, can-deactivate,
//!    load, can-activate, deactivate, activate, commit) with named slots for
//!    externally registered steps.
//! 4. The root router's navigation queue settles the attempt, restores the
//!    last good location on failure and chains follow-up attempts up to
//!    `max_instruction_count`.

pub mod command;
pub mod component;
pub mod config;
pub mod events;
pub mod history;
pub mod instruction;
pub mod pipeline;
pub mod plan;
pub mod queue;
pub mod recognizer;
pub mod router;
pub mod utils;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use command::{NavigationCommand, Redirect, RedirectToRoute};
pub use component::{
    ComponentLoader, LifecycleOutcome, RoutableComponent, RouteComponent, Verdict, ViewPort,
};
pub use config::{
    ComponentModule, ComponentRef, RouteConfig, RouterConfiguration, RouterOptions,
    UnknownRouteHandler, ViewPortConfig,
};
pub use events::{EventAggregator, RouterEvent, RouterEventKind};
pub use history::{History, HistoryOptions, MemoryHistory, NavigationOptions};
pub use instruction::{LifecycleArgs, NavigationInstruction, Params, ViewPortInstruction};
pub use pipeline::{
    Next, Pipeline, PipelineOutput, PipelineProvider, PipelineResult, PipelineStatus,
    PipelineStep, SlotName,
};
pub use plan::{NavigationPlan, PlanOutcome, ViewPortPlan};
pub use queue::{NavigationDirection, PendingNavigation};
pub use router::{Router, RouterServices};

/// Name of the view port used when a route declares a bare `moduleId`.
pub const DEFAULT_VIEW_PORT: &str = "default";

// ---------------------------------------------------------------------------
// Activation Strategy
// ---------------------------------------------------------------------------

/// What happens to the component occupying a view port when a navigation
/// commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationStrategy {
    /// Same component, same view model, no lifecycle callbacks.
    NoChange,
    /// Same component, but deactivate/activate (and the `can-` variants) run
    /// again because parameters changed.
    InvokeLifecycle,
    /// A different component takes the slot.
    Replace,
}

impl ActivationStrategy {
    /// Whether components under this strategy take part in lifecycle calls.
    pub fn runs_lifecycle(self) -> bool {
        matches!(self, Self::InvokeLifecycle | Self::Replace)
    }
}

impl fmt::Display for ActivationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoChange => "no-change",
            Self::InvokeLifecycle => "invoke-lifecycle",
            Self::Replace => "replace",
        })
    }
}

impl FromStr for ActivationStrategy {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-change" => Ok(Self::NoChange),
            "invoke-lifecycle" => Ok(Self::InvokeLifecycle),
            "replace" => Ok(Self::Replace),
            other => Err(RouterError::InvalidRouteConfig(format!(
                "unknown activation strategy `{}`",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RouterError
// ---------------------------------------------------------------------------

/// Errors raised while resolving, planning or draining navigations.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Invalid route config: {0}")]
    InvalidRouteConfig(String),

    #[error("No route named `{0}` is registered")]
    UnknownRouteName(String),

    #[error("Missing required parameter `{param}` for route `{route}`")]
    MissingParameter { route: String, param: String },

    #[error("There was no view port named `{0}` registered with the router")]
    MissingViewPort(String),

    #[error("No component is configured for view port `{0}`")]
    MissingComponent(String),

    #[error("Redirecting instruction for `{0}` cannot hold view port instructions")]
    RedirectingInstruction(String),

    #[error("The owning router was dropped before the navigation settled")]
    RouterDropped,

    #[error("Navigation to `{0}` was superseded by a newer navigation")]
    Superseded(String),

    #[error("Maximum navigation attempts exceeded ({0}). Giving up.")]
    MaxAttemptsExceeded(usize),

    #[error("Pipeline failure: {0}")]
    Pipeline(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for RouterError {
    fn from(err: anyhow::Error) -> Self {
        Self::Pipeline(Arc::new(err))
    }
}
