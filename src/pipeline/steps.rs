//! Core pipeline steps: plan, load, commit.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::FutureExt;

use crate::command::{NavigationCommand, Redirect};
use crate::component::ComponentLoader;
use crate::instruction::NavigationInstruction;
use crate::pipeline::{Next, PipelineOutput, PipelineResult, PipelineStep};
use crate::plan::{self, PlanOutcome, ViewPortPlan};
use crate::{ActivationStrategy, RouterError};

// ---------------------------------------------------------------------------
// Build plan
// ---------------------------------------------------------------------------

/// Diffs the instruction against the current state. A redirecting route
/// cancels with the redirect as output.
pub struct BuildNavigationPlanStep;

#[async_trait]
impl PipelineStep for BuildNavigationPlanStep {
    fn name(&self) -> &str {
        "BuildNavigationPlanStep"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        match plan::build_navigation_plan(Arc::clone(instruction), false).await? {
            PlanOutcome::Plan(plan) => {
                instruction.set_plan(plan);
                Ok(next.proceed().await)
            }
            PlanOutcome::Redirect(redirect) => {
                let command: Arc<dyn NavigationCommand> = Arc::new(redirect);
                Ok(next.cancel(command))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load route
// ---------------------------------------------------------------------------

/// Loads every replaced component and records a view port instruction for
/// every planned slot. A nested redirect cancels; a load fault rejects.
pub struct LoadRouteStep;

#[async_trait]
impl PipelineStep for LoadRouteStep {
    fn name(&self) -> &str {
        "LoadRouteStep"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        let loader = Arc::clone(&instruction.router()?.services().loader);
        match load_new_route(loader, Arc::clone(instruction)).await {
            Ok(()) => Ok(next.proceed().await),
            Err(LoadInterrupt::Redirect(redirect)) => {
                let command: Arc<dyn NavigationCommand> = Arc::new(redirect);
                Ok(next.cancel(command))
            }
            Err(LoadInterrupt::Failed(err)) => {
                tracing::warn!(fragment = %instruction.fragment, error = ?err, "route load failed");
                Ok(next.reject(err))
            }
        }
    }
}

enum LoadInterrupt {
    Redirect(Redirect),
    Failed(PipelineOutput),
}

impl From<RouterError> for LoadInterrupt {
    fn from(err: RouterError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<anyhow::Error> for LoadInterrupt {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err.into())
    }
}

/// Slots kept from the previous state get their view port instruction now;
/// replaced slots are collected and loaded concurrently.
fn load_new_route(
    loader: Arc<dyn ComponentLoader>,
    instruction: Arc<NavigationInstruction>,
) -> BoxFuture<'static, Result<(), LoadInterrupt>> {
    async move {
        let mut to_load = Vec::new();
        determine_what_to_load(&instruction, &mut to_load)?;
        let loads = to_load
            .into_iter()
            .map(|(owner, vp_plan)| load_route(Arc::clone(&loader), owner, vp_plan));
        future::try_join_all(loads).await?;
        Ok(())
    }
    .boxed()
}

fn determine_what_to_load(
    instruction: &Arc<NavigationInstruction>,
    to_load: &mut Vec<(Arc<NavigationInstruction>, ViewPortPlan)>,
) -> Result<(), RouterError> {
    let Some(plan) = instruction.plan() else {
        return Ok(());
    };
    for (name, vp_plan) in plan {
        let child = vp_plan.child_navigation_instruction.clone();
        if vp_plan.strategy == ActivationStrategy::Replace {
            to_load.push((Arc::clone(instruction), vp_plan));
        } else {
            let (Some(module_id), Some(component)) =
                (vp_plan.prev_module_id.clone(), vp_plan.prev_component.clone())
            else {
                return Err(RouterError::MissingComponent(name.to_string()));
            };
            instruction.add_view_port_instruction(name.clone(), vp_plan.strategy, module_id, component)?;
            if let Some(child) = &child {
                instruction.set_view_port_child(&name, Arc::clone(child));
            }
        }
        if let Some(child) = child {
            determine_what_to_load(&child, to_load)?;
        }
    }
    Ok(())
}

async fn load_route(
    loader: Arc<dyn ComponentLoader>,
    instruction: Arc<NavigationInstruction>,
    vp_plan: ViewPortPlan,
) -> Result<(), LoadInterrupt> {
    let module_id = vp_plan
        .config
        .module_id
        .clone()
        .ok_or_else(|| RouterError::MissingComponent(vp_plan.name.to_string()))?;
    let router = instruction.router()?;
    let component = loader.load_component(&router, &instruction, &module_id).await?;
    let child_router = component.child_router.clone();
    instruction.add_view_port_instruction(
        vp_plan.name.clone(),
        vp_plan.strategy,
        module_id,
        component,
    )?;

    let Some(child_router) = child_router else {
        return Ok(());
    };
    let path = instruction.wildcard_path();
    let child = child_router.create_navigation_instruction(&path, Some(&instruction))?;
    instruction.set_plan_child(&vp_plan.name, Arc::clone(&child));
    match plan::build_navigation_plan(Arc::clone(&child), false).await? {
        PlanOutcome::Plan(child_plan) => child.set_plan(child_plan),
        PlanOutcome::Redirect(redirect) => return Err(LoadInterrupt::Redirect(redirect)),
    }
    instruction.set_view_port_child(&vp_plan.name, Arc::clone(&child));
    load_new_route(loader, child).await
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Hands the instruction tree to the view ports.
pub struct CommitChangesStep;

#[async_trait]
impl PipelineStep for CommitChangesStep {
    fn name(&self) -> &str {
        "CommitChangesStep"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        Arc::clone(instruction).commit_changes(true).await?;
        Ok(next.proceed().await)
    }
}
