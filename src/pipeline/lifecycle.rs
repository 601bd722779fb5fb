//! Lifecycle steps.
//!
//! Deactivation-family callbacks run inside-out over the previous
//! components; activation-family callbacks run top-down over the next ones.
//! Only slots whose strategy is invoke-lifecycle or replace take part.

use std::sync::Arc;

use async_trait::async_trait;

use crate::component::{LifecycleOutcome, RoutableComponent, RouteComponent, Verdict};
use crate::instruction::{LifecycleArgs, NavigationInstruction};
use crate::pipeline::{Next, PipelineOutput, PipelineResult, PipelineStep};
use crate::plan::NavigationPlan;
use crate::router::Router;
use crate::ActivationStrategy;

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Callback {
    CanDeactivate,
    Deactivate,
    CanActivate,
    Activate,
}

impl Callback {
    fn name(self) -> &'static str {
        match self {
            Self::CanDeactivate => "canDeactivate",
            Self::Deactivate => "deactivate",
            Self::CanActivate => "canActivate",
            Self::Activate => "activate",
        }
    }

    fn defined_on(self, view_model: &dyn RoutableComponent) -> bool {
        match self {
            Self::CanDeactivate => view_model.as_can_deactivate().is_some(),
            Self::Deactivate => view_model.as_deactivate().is_some(),
            Self::CanActivate => view_model.as_can_activate().is_some(),
            Self::Activate => view_model.as_activate().is_some(),
        }
    }

    fn invoke(self, view_model: &dyn RoutableComponent, args: &LifecycleArgs) -> Option<LifecycleOutcome> {
        match self {
            Self::CanDeactivate => view_model.as_can_deactivate().map(|c| c.can_deactivate()),
            Self::Deactivate => view_model.as_deactivate().map(|c| c.deactivate()),
            Self::CanActivate => view_model.as_can_activate().map(|c| c.can_activate(args)),
            Self::Activate => view_model.as_activate().map(|c| c.activate(args)),
        }
    }
}

/// A collected callback target.
struct Target {
    view_model: Arc<dyn RoutableComponent>,
    args: LifecycleArgs,
    router: Option<Arc<Router>>,
}

/// Previous components, parents before children.
fn find_deactivatable(
    instruction: &NavigationInstruction,
    plan: &NavigationPlan,
    callback: Callback,
    list: &mut Vec<Target>,
) {
    for vp_plan in plan.values() {
        let Some(prev) = &vp_plan.prev_component else {
            if let Some(child) = &vp_plan.child_navigation_instruction {
                find_deactivatable(child, &child.plan().unwrap_or_default(), callback, list);
            }
            continue;
        };
        if vp_plan.strategy.runs_lifecycle() && callback.defined_on(prev.view_model.as_ref()) {
            list.push(Target {
                view_model: Arc::clone(&prev.view_model),
                args: instruction.lifecycle_args().clone(),
                router: instruction.router().ok(),
            });
        }
        if vp_plan.strategy == ActivationStrategy::Replace {
            add_previous_deactivatable(prev, callback, list);
        } else if let Some(child) = &vp_plan.child_navigation_instruction {
            find_deactivatable(child, &child.plan().unwrap_or_default(), callback, list);
        }
    }
}

/// Everything still mounted under a replaced component's own router.
fn add_previous_deactivatable(component: &RouteComponent, callback: Callback, list: &mut Vec<Target>) {
    let Some(current) = component
        .child_router
        .as_ref()
        .and_then(|router| router.current_instruction())
    else {
        return;
    };
    for vpi in current.view_port_instructions().into_values() {
        if callback.defined_on(vpi.component.view_model.as_ref()) {
            list.push(Target {
                view_model: Arc::clone(&vpi.component.view_model),
                args: vpi.lifecycle_args.clone(),
                router: current.router().ok(),
            });
        }
        add_previous_deactivatable(&vpi.component, callback, list);
    }
}

/// Next components, parents before children.
fn find_activatable(instruction: &NavigationInstruction, callback: Callback, list: &mut Vec<Target>) {
    let Some(plan) = instruction.plan() else {
        return;
    };
    for (name, vp_plan) in plan {
        if let Some(vpi) = instruction.view_port_instruction(&name) {
            if vp_plan.strategy.runs_lifecycle()
                && callback.defined_on(vpi.component.view_model.as_ref())
            {
                list.push(Target {
                    view_model: Arc::clone(&vpi.component.view_model),
                    args: vpi.lifecycle_args.clone(),
                    router: instruction.router().ok(),
                });
            }
        }
        if let Some(child) = &vp_plan.child_navigation_instruction {
            find_activatable(child, callback, list);
        }
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// Outcome of walking one callback list.
enum Walk {
    Finished,
    Stopped(PipelineOutput),
}

/// Invoke each target in order. With `ignore_result` only failures stop
/// the walk; otherwise anything but an allow does.
async fn walk<I>(
    targets: I,
    callback: Callback,
    instruction: &Arc<NavigationInstruction>,
    ignore_result: bool,
) -> Walk
where
    I: IntoIterator<Item = Target>,
{
    for target in targets {
        let Some(outcome) = callback.invoke(target.view_model.as_ref(), &target.args) else {
            continue;
        };
        let verdict = outcome.settle().await;
        tracing::trace!(callback = callback.name(), ?verdict, "lifecycle callback");
        match verdict {
            Verdict::Fail(err) => return Walk::Stopped(err.into()),
            _ if ignore_result => {}
            Verdict::Allow => {}
            Verdict::Deny => return Walk::Stopped(PipelineOutput::Denied),
            Verdict::Navigate(command) => {
                if let Some(router) = &target.router {
                    command.set_router(router);
                }
                if command.should_continue_processing() {
                    instruction.defer_command(command);
                } else {
                    return Walk::Stopped(PipelineOutput::Command(command));
                }
            }
        }
    }
    Walk::Finished
}

fn deactivatable(instruction: &Arc<NavigationInstruction>, callback: Callback) -> Vec<Target> {
    let mut list = Vec::new();
    find_deactivatable(
        instruction,
        &instruction.plan().unwrap_or_default(),
        callback,
        &mut list,
    );
    list
}

fn activatable(instruction: &Arc<NavigationInstruction>, callback: Callback) -> Vec<Target> {
    let mut list = Vec::new();
    find_activatable(instruction, callback, &mut list);
    list
}

fn mark_could_deactivate(instruction: &NavigationInstruction) {
    if let Ok(router) = instruction.router() {
        router.set_could_deactivate();
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Asks the outgoing components, innermost first. A refusal cancels.
pub struct CanDeactivatePreviousStep;

#[async_trait]
impl PipelineStep for CanDeactivatePreviousStep {
    fn name(&self) -> &str {
        "CanDeactivatePreviousStep"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        let targets = deactivatable(instruction, Callback::CanDeactivate);
        match walk(targets.into_iter().rev(), Callback::CanDeactivate, instruction, false).await {
            Walk::Finished => {
                mark_could_deactivate(instruction);
                Ok(next.proceed().await)
            }
            Walk::Stopped(output) => Ok(next.cancel(output)),
        }
    }
}

/// Asks the incoming components, outermost first. A refusal rejects.
pub struct CanActivateNextStep;

#[async_trait]
impl PipelineStep for CanActivateNextStep {
    fn name(&self) -> &str {
        "CanActivateNextStep"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        let targets = activatable(instruction, Callback::CanActivate);
        match walk(targets, Callback::CanActivate, instruction, false).await {
            Walk::Finished => Ok(next.proceed().await),
            Walk::Stopped(output) => Ok(next.reject(output)),
        }
    }
}

/// Deactivates the outgoing components, innermost first.
pub struct DeactivatePreviousStep;

#[async_trait]
impl PipelineStep for DeactivatePreviousStep {
    fn name(&self) -> &str {
        "DeactivatePreviousStep"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        let targets = deactivatable(instruction, Callback::Deactivate);
        match walk(targets.into_iter().rev(), Callback::Deactivate, instruction, true).await {
            Walk::Finished => {
                mark_could_deactivate(instruction);
                Ok(next.proceed().await)
            }
            Walk::Stopped(output) => Ok(next.reject(output)),
        }
    }
}

/// Activates the incoming components, outermost first.
pub struct ActivateNextStep;

#[async_trait]
impl PipelineStep for ActivateNextStep {
    fn name(&self) -> &str {
        "ActivateNextStep"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        let targets = activatable(instruction, Callback::Activate);
        match walk(targets, Callback::Activate, instruction, true).await {
            Walk::Finished => Ok(next.proceed().await),
            Walk::Stopped(output) => Ok(next.reject(output)),
        }
    }
}
