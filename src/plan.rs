//! Navigation Plan Builder
//!
//! Diffs a new instruction against the one previously committed at the same
//! router level and decides, per view port, what happens to the component
//! occupying it. Nested routers are planned recursively and concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use arcstr::ArcStr;
use futures::future::{self, BoxFuture};
use futures::FutureExt;

use crate::command::Redirect;
use crate::component::{RouteComponent, StrategyCapability};
use crate::config::{ComponentIdentity, ComponentRef, ViewPortConfig};
use crate::instruction::{NavigationInstruction, Params, ViewPortInstruction};
use crate::recognizer;
use crate::router::Router;
use crate::{ActivationStrategy, RouterError};

/// One view port's decision for the current navigation attempt.
#[derive(Debug, Clone)]
pub struct ViewPortPlan {
    pub name: ArcStr,
    pub strategy: ActivationStrategy,
    /// Config the view port will be loaded from.
    pub config: ViewPortConfig,
    pub prev_component: Option<RouteComponent>,
    pub prev_module_id: Option<ComponentRef>,
    /// Resolved identity of the previous component.
    pub prev_target: Option<ComponentIdentity>,
    pub child_navigation_instruction: Option<Arc<NavigationInstruction>>,
}

impl ViewPortPlan {
    fn replace(name: ArcStr, config: ViewPortConfig) -> Self {
        Self {
            name,
            strategy: ActivationStrategy::Replace,
            config,
            prev_component: None,
            prev_module_id: None,
            prev_target: None,
            child_navigation_instruction: None,
        }
    }
}

/// View port name to plan.
pub type NavigationPlan = BTreeMap<ArcStr, ViewPortPlan>;

/// What the builder produced: a plan, or a redirect to follow instead.
#[derive(Debug)]
pub enum PlanOutcome {
    Plan(NavigationPlan),
    Redirect(Redirect),
}

/// Build the plan for `instruction`.
///
/// With `force_lifecycle_minimum`, view ports that would otherwise stay
/// untouched re-run their lifecycle. Set when the parent level's own
/// strategy is invoke-lifecycle.
pub fn build_navigation_plan(
    instruction: Arc<NavigationInstruction>,
    force_lifecycle_minimum: bool,
) -> BoxFuture<'static, Result<PlanOutcome, RouterError>> {
    async move {
        let router = instruction.router()?;
        if let Some(target) = instruction.config.redirect.clone() {
            return redirect_outcome(&router, &instruction, &target);
        }

        let defaults = router.view_port_defaults();
        let Some(previous) = instruction.previous_instruction() else {
            return Ok(PlanOutcome::Plan(first_plan(&instruction, &defaults)));
        };

        let params_changed = has_different_parameter_values(&previous, &instruction);
        let slots = previous.view_port_instructions().into_values().map(|prev| {
            let next_config = next_view_port_config(&instruction, &prev, &defaults);
            plan_view_port(
                Arc::clone(&instruction),
                prev,
                next_config,
                params_changed || force_lifecycle_minimum,
            )
        });

        let mut plan = NavigationPlan::new();
        for outcome in future::try_join_all(slots).await? {
            match outcome {
                SlotOutcome::Plan(vp_plan) => {
                    plan.insert(vp_plan.name.clone(), vp_plan);
                }
                SlotOutcome::Redirect(redirect) => return Ok(PlanOutcome::Redirect(redirect)),
            }
        }
        Ok(PlanOutcome::Plan(plan))
    }
    .boxed()
}

// ---------------------------------------------------------------------------
// Redirects
// ---------------------------------------------------------------------------

/// Resolve the redirect target and link `:name` values through to the
/// current instruction's params. Targets naming an unknown param drop it.
fn redirect_outcome(
    router: &Arc<Router>,
    instruction: &NavigationInstruction,
    target: &str,
) -> Result<PlanOutcome, RouterError> {
    let target_instruction = router.create_navigation_instruction(target, None)?;

    let mut params = Params::new();
    for (key, value) in target_instruction.params.iter() {
        match value.strip_prefix(':') {
            Some(linked) => {
                if let Some(value) = instruction.params.get(linked) {
                    params.insert(key, value);
                }
            }
            None => params.insert(key, value),
        }
    }

    let mut location = recognizer::generate_path(target_instruction.matched_pattern(), &params)?;
    if !instruction.query_string.is_empty() {
        location.push('?');
        location.push_str(&instruction.query_string);
    }
    tracing::debug!(from = %instruction.fragment, to = %location, "redirect");
    Ok(PlanOutcome::Redirect(Redirect::for_router(
        location,
        router,
        instruction.router_base_url(),
    )))
}

// ---------------------------------------------------------------------------
// First navigation
// ---------------------------------------------------------------------------

fn first_plan(
    instruction: &NavigationInstruction,
    defaults: &BTreeMap<String, ViewPortConfig>,
) -> NavigationPlan {
    instruction
        .config
        .view_ports
        .iter()
        .map(|(name, config)| {
            let config = match (&config.module_id, defaults.get(name)) {
                (None, Some(default)) => default.clone(),
                _ => config.clone(),
            };
            let name = ArcStr::from(name.as_str());
            (name.clone(), ViewPortPlan::replace(name, config))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

enum SlotOutcome {
    Plan(ViewPortPlan),
    Redirect(Redirect),
}

/// Explicit config if the new route declares the slot, else the previous
/// component carried forward. An empty config takes the slot default.
fn next_view_port_config(
    instruction: &NavigationInstruction,
    prev: &ViewPortInstruction,
    defaults: &BTreeMap<String, ViewPortConfig>,
) -> ViewPortConfig {
    let config = instruction
        .config
        .view_ports
        .get(prev.name.as_str())
        .cloned()
        .unwrap_or_else(|| ViewPortConfig::new(prev.module_id.clone()));
    match (&config.module_id, defaults.get(prev.name.as_str())) {
        (None, Some(default)) => default.clone(),
        _ => config,
    }
}

async fn plan_view_port(
    instruction: Arc<NavigationInstruction>,
    prev: ViewPortInstruction,
    config: ViewPortConfig,
    lifecycle_needed: bool,
) -> Result<SlotOutcome, RouterError> {
    let (prev_target, next_target) = future::try_join(
        prev.module_id.resolve(),
        async {
            match &config.module_id {
                Some(component) => component.resolve().await.map(Some),
                None => Ok(None),
            }
        },
    )
    .await?;

    let strategy = if next_target.as_ref() != Some(&prev_target) {
        ActivationStrategy::Replace
    } else if let StrategyCapability::Custom(provider) =
        prev.component.view_model.strategy_capability()
    {
        provider.determine_activation_strategy(instruction.lifecycle_args())
    } else if let Some(strategy) = instruction.config.activation_strategy {
        strategy
    } else if lifecycle_needed {
        ActivationStrategy::InvokeLifecycle
    } else {
        ActivationStrategy::NoChange
    };

    let mut vp_plan = ViewPortPlan {
        name: prev.name.clone(),
        strategy,
        config,
        prev_component: Some(prev.component.clone()),
        prev_module_id: Some(prev.module_id.clone()),
        prev_target: Some(prev_target),
        child_navigation_instruction: None,
    };

    if strategy != ActivationStrategy::Replace {
        if let Some(child_router) = prev.component.child_router.clone() {
            let path = instruction.wildcard_path();
            let child = child_router.create_navigation_instruction(&path, Some(&instruction))?;
            child.set_previous_instruction(child_router.current_instruction());
            let force = strategy == ActivationStrategy::InvokeLifecycle;
            match build_navigation_plan(Arc::clone(&child), force).await? {
                PlanOutcome::Plan(child_plan) => child.set_plan(child_plan),
                PlanOutcome::Redirect(redirect) => return Ok(SlotOutcome::Redirect(redirect)),
            }
            vp_plan.child_navigation_instruction = Some(child);
        }
    }

    Ok(SlotOutcome::Plan(vp_plan))
}

/// Non-wildcard params differ, or query params differ when the instruction
/// compares them.
fn has_different_parameter_values(
    prev: &NavigationInstruction,
    next: &NavigationInstruction,
) -> bool {
    let wildcard = next.wildcard_name();
    let differs = |a: &Params, b: &Params| {
        a.keys()
            .chain(b.keys())
            .filter(|key| Some(*key) != wildcard)
            .any(|key| a.get(key) != b.get(key))
    };
    if differs(&prev.params, &next.params) {
        return true;
    }
    next.compare_query_params && differs(&prev.query_params, &next.query_params)
}
