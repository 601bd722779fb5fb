//! Pipeline - ordered, cancelable processing of one navigation attempt
//!
//! A [`Pipeline`] is a flat list of steps. Each step receives the shared
//! instruction and a [`Next`] continuation which it consumes exactly once:
//! 1. `proceed` runs the remaining steps
//! 2. `complete` / `cancel` / `reject` settle the run without them
//!
//! Returning `Err` from a step rejects the run with that error.
//!
//! The master sequence is fixed. External steps can only be registered
//! inside the four named slots, see [`PipelineProvider`].

pub mod lifecycle;
pub mod steps;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::command::NavigationCommand;
use crate::instruction::NavigationInstruction;
use crate::RouterError;

pub use lifecycle::{
    ActivateNextStep, CanActivateNextStep, CanDeactivatePreviousStep, DeactivatePreviousStep,
};
pub use steps::{BuildNavigationPlanStep, CommitChangesStep, LoadRouteStep};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Completed,
    Canceled,
    Rejected,
}

/// What a settled run carries besides its status.
#[derive(Clone)]
pub enum PipelineOutput {
    None,
    /// A `can-` callback said no.
    Denied,
    Error(Arc<anyhow::Error>),
    /// Navigate elsewhere once this attempt settles.
    Command(Arc<dyn NavigationCommand>),
}

impl PipelineOutput {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn command(&self) -> Option<&Arc<dyn NavigationCommand>> {
        match self {
            Self::Command(command) => Some(command),
            _ => None,
        }
    }
}

impl fmt::Debug for PipelineOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Denied => f.write_str("Denied"),
            Self::Error(err) => write!(f, "Error({:#})", err),
            Self::Command(command) => f.debug_tuple("Command").field(command).finish(),
        }
    }
}

impl From<anyhow::Error> for PipelineOutput {
    fn from(err: anyhow::Error) -> Self {
        Self::Error(Arc::new(err))
    }
}

impl From<RouterError> for PipelineOutput {
    fn from(err: RouterError) -> Self {
        Self::Error(Arc::new(err.into()))
    }
}

impl From<Arc<dyn NavigationCommand>> for PipelineOutput {
    fn from(command: Arc<dyn NavigationCommand>) -> Self {
        Self::Command(command)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub instruction: Arc<NavigationInstruction>,
    pub output: PipelineOutput,
}

impl PipelineResult {
    pub fn completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Steps and continuation
// ---------------------------------------------------------------------------

/// One stage of the pipeline.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult>;
}

/// Continuation handed to each step. Consumed by whichever terminal
/// operation the step picks, so a run can only settle once.
pub struct Next<'a> {
    steps: &'a [Arc<dyn PipelineStep>],
    instruction: &'a Arc<NavigationInstruction>,
}

impl<'a> Next<'a> {
    fn new(steps: &'a [Arc<dyn PipelineStep>], instruction: &'a Arc<NavigationInstruction>) -> Self {
        Self { steps, instruction }
    }

    /// Run the remaining steps. Completes when none are left.
    pub async fn proceed(self) -> PipelineResult {
        let Some((step, rest)) = self.steps.split_first() else {
            return self.complete(PipelineOutput::None);
        };
        let instruction = self.instruction;
        tracing::trace!(step = step.name(), fragment = %instruction.fragment, "pipeline step");
        match step.run(instruction, Next::new(rest, instruction)).await {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(step = step.name(), error = %err, "pipeline step failed");
                Next::new(&[], instruction).reject(err)
            }
        }
    }

    pub fn complete(self, output: impl Into<PipelineOutput>) -> PipelineResult {
        self.settle(PipelineStatus::Completed, output.into())
    }

    pub fn cancel(self, output: impl Into<PipelineOutput>) -> PipelineResult {
        self.settle(PipelineStatus::Canceled, output.into())
    }

    pub fn reject(self, output: impl Into<PipelineOutput>) -> PipelineResult {
        self.settle(PipelineStatus::Rejected, output.into())
    }

    fn settle(self, status: PipelineStatus, output: PipelineOutput) -> PipelineResult {
        PipelineResult {
            status,
            instruction: Arc::clone(self.instruction),
            output,
        }
    }
}

/// An ordered list of steps.
#[derive(Default, Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: Arc<dyn PipelineStep>) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, instruction: &Arc<NavigationInstruction>) -> PipelineResult {
        Next::new(&self.steps, instruction).proceed().await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.step_names()).finish()
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Extension points in the master sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotName {
    /// After load-route, before can-activate.
    Authorize,
    /// After can-activate, before deactivate.
    PreActivate,
    /// After activate, before commit.
    PreRender,
    /// After commit.
    PostRender,
}

impl SlotName {
    pub const ALL: [SlotName; 4] = [
        Self::Authorize,
        Self::PreActivate,
        Self::PreRender,
        Self::PostRender,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::PreActivate => "preActivate",
            Self::PreRender => "preRender",
            Self::PostRender => "postRender",
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the canonical names and the older aliases
/// (`modelbind`, `precommit`, `postcomplete`).
impl FromStr for SlotName {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorize" => Ok(Self::Authorize),
            "preActivate" | "modelbind" => Ok(Self::PreActivate),
            "preRender" | "precommit" => Ok(Self::PreRender),
            "postRender" | "postcomplete" => Ok(Self::PostRender),
            other => Err(RouterError::InvalidRouteConfig(format!(
                "unknown pipeline slot `{}`",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Builds pipelines from the fixed master sequence plus slot contents.
///
/// Slot contents are flattened into the pipeline when it is created, so
/// registering a step never affects a run already in progress.
#[derive(Default)]
pub struct PipelineProvider {
    slots: DashMap<SlotName, Vec<Arc<dyn PipelineStep>>>,
}

impl PipelineProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&self, slot: SlotName, step: Arc<dyn PipelineStep>) {
        tracing::debug!(%slot, step = step.name(), "pipeline step registered");
        self.slots.entry(slot).or_default().push(step);
    }

    /// Remove a previously registered step (matched by identity).
    pub fn remove_step(&self, slot: SlotName, step: &Arc<dyn PipelineStep>) -> bool {
        let Some(mut steps) = self.slots.get_mut(&slot) else {
            return false;
        };
        let before = steps.len();
        steps.retain(|registered| !Arc::ptr_eq(registered, step));
        before != steps.len()
    }

    pub fn slot_len(&self, slot: SlotName) -> usize {
        self.slots.get(&slot).map_or(0, |steps| steps.len())
    }

    /// Drop every registered slot step.
    pub fn reset(&self) {
        self.slots.clear();
    }

    pub fn create_pipeline(&self, use_can_deactivate_step: bool) -> Pipeline {
        let mut pipeline = Pipeline::new();
        pipeline.add_step(Arc::new(BuildNavigationPlanStep));
        if use_can_deactivate_step {
            pipeline.add_step(Arc::new(CanDeactivatePreviousStep));
        }
        pipeline.add_step(Arc::new(LoadRouteStep));
        self.extend_with_slot(&mut pipeline, SlotName::Authorize);
        pipeline.add_step(Arc::new(CanActivateNextStep));
        self.extend_with_slot(&mut pipeline, SlotName::PreActivate);
        pipeline.add_step(Arc::new(DeactivatePreviousStep));
        pipeline.add_step(Arc::new(ActivateNextStep));
        self.extend_with_slot(&mut pipeline, SlotName::PreRender);
        pipeline.add_step(Arc::new(CommitChangesStep));
        self.extend_with_slot(&mut pipeline, SlotName::PostRender);
        pipeline
    }

    fn extend_with_slot(&self, pipeline: &mut Pipeline, slot: SlotName) {
        if let Some(steps) = self.slots.get(&slot) {
            for step in steps.iter() {
                pipeline.add_step(Arc::clone(step));
            }
        }
    }
}

impl fmt::Debug for PipelineProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for slot in SlotName::ALL {
            map.entry(&slot.as_str(), &self.slot_len(slot));
        }
        map.finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
