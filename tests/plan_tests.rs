mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::Harness;
use pretty_assertions::assert_eq;
use zenith_router::component::{Activate, ActivationStrategyProvider, StrategyCapability};
use zenith_router::{
    ActivationStrategy, ComponentModule, ComponentRef, LifecycleArgs, LifecycleOutcome,
    PipelineResult, PipelineStatus, RoutableComponent, RouteConfig, RouterConfiguration,
    RouterOptions, ViewPortConfig, DEFAULT_VIEW_PORT,
};

/// Stays mounted across visits but always re-runs `activate`.
struct Refreshing {
    log: common::Log,
}

impl RoutableComponent for Refreshing {
    fn as_activate(&self) -> Option<&dyn Activate> {
        Some(self)
    }

    fn strategy_capability(&self) -> StrategyCapability<'_> {
        StrategyCapability::Custom(self)
    }
}

impl ActivationStrategyProvider for Refreshing {
    fn determine_activation_strategy(&self, _args: &LifecycleArgs) -> ActivationStrategy {
        ActivationStrategy::InvokeLifecycle
    }
}

impl Activate for Refreshing {
    fn activate(&self, _args: &LifecycleArgs) -> LifecycleOutcome {
        self.log.lock().unwrap().push("refreshing.activate".to_string());
        LifecycleOutcome::ready(())
    }
}

/// A deferred reference whose factory hands out `module` every time.
fn deferred(module: &Arc<ComponentModule>) -> ComponentRef {
    let module = Arc::clone(module);
    ComponentRef::deferred(move || {
        let module = Arc::clone(&module);
        async move { Ok::<_, anyhow::Error>(module) }
    })
}

fn users_config() -> RouterConfiguration {
    RouterConfiguration::new()
        .map(RouteConfig::new("").with_module("home"))
        .map(RouteConfig::new("users/:id").with_module("user"))
        .map(RouteConfig::new("about").with_module("about"))
}

fn strategy_of(result: &PipelineResult) -> ActivationStrategy {
    result
        .instruction
        .view_port_instruction(DEFAULT_VIEW_PORT)
        .expect("default view port instruction")
        .strategy
}

// ============================================================================
// First navigation
// ============================================================================

#[tokio::test]
async fn first_navigation_replaces_every_slot() {
    let h = Harness::new("users/1");
    h.module("home");
    h.module("user");
    h.configure(users_config());

    let result = h.start().await;

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(strategy_of(&result), ActivationStrategy::Replace);
    assert_eq!(
        h.take_log(),
        vec![
            "load:user",
            "user.canActivate",
            "user.activate",
            "process:default:user",
            "swap:default:user",
        ]
    );
}

// ============================================================================
// Strategy selection
// ============================================================================

#[tokio::test]
async fn unchanged_params_keep_component_untouched() {
    let h = Harness::new("users/1");
    h.module("user");
    h.configure(users_config());
    h.start().await;
    let before = h.router.current_instruction().unwrap();
    h.take_log();

    let result = h.go("users/1?tab=2").await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(strategy_of(&result), ActivationStrategy::NoChange);
    assert!(h.take_lifecycle().is_empty());

    let after = h.router.current_instruction().unwrap();
    let prev_vm = before.view_port_instruction(DEFAULT_VIEW_PORT).unwrap();
    let next_vm = after.view_port_instruction(DEFAULT_VIEW_PORT).unwrap();
    assert!(Arc::ptr_eq(
        &prev_vm.component.view_model,
        &next_vm.component.view_model
    ));
}

#[tokio::test]
async fn changed_params_rerun_lifecycle_on_same_component() {
    let h = Harness::new("users/1");
    let user = h.module("user");
    h.configure(users_config());
    h.start().await;
    h.take_log();

    let result = h.go("users/2").await.unwrap();

    assert_eq!(strategy_of(&result), ActivationStrategy::InvokeLifecycle);
    assert_eq!(
        h.take_log(),
        vec![
            "user.canDeactivate",
            "user.canActivate",
            "user.deactivate",
            "user.activate",
        ]
    );
    assert_eq!(user.activated_with(), vec!["id=1", "id=2"]);
}

#[tokio::test]
async fn different_component_is_replaced() {
    let h = Harness::new("users/1");
    h.module("user");
    h.module("about");
    h.configure(users_config());
    h.start().await;
    h.take_log();

    let result = h.go("about").await.unwrap();

    assert_eq!(strategy_of(&result), ActivationStrategy::Replace);
    assert_eq!(
        h.take_log(),
        vec![
            "user.canDeactivate",
            "load:about",
            "about.canActivate",
            "user.deactivate",
            "about.activate",
            "process:default:about",
            "swap:default:about",
        ]
    );
    assert_eq!(h.current_module().as_deref(), Some("about"));
}

#[tokio::test]
async fn route_strategy_overrides_param_diff() {
    let h = Harness::new("users/1");
    h.module("user");
    h.configure(
        RouterConfiguration::new().map(
            RouteConfig::new("users/:id")
                .with_module("user")
                .with_activation_strategy(ActivationStrategy::Replace),
        ),
    );
    h.start().await;
    h.take_log();

    let result = h.go("users/2").await.unwrap();

    assert_eq!(strategy_of(&result), ActivationStrategy::Replace);
    assert!(h.take_log().contains(&"load:user".to_string()));
}

#[tokio::test]
async fn component_strategy_beats_route_strategy() {
    let h = Harness::new("users/1");
    h.loader.register_component(
        "user",
        Arc::new(Refreshing {
            log: Arc::clone(&h.log),
        }),
    );
    h.configure(
        RouterConfiguration::new().map(
            RouteConfig::new("users/:id")
                .with_module("user")
                .with_activation_strategy(ActivationStrategy::Replace),
        ),
    );
    h.start().await;
    h.take_log();

    let result = h.go("users/2").await.unwrap();

    assert_eq!(strategy_of(&result), ActivationStrategy::InvokeLifecycle);
    assert_eq!(h.take_log(), vec!["refreshing.activate"]);
}

#[tokio::test]
async fn deferred_resolvers_compare_by_module_identity() {
    let h = Harness::new("one");
    h.module("<deferred>");
    let shared = ComponentModule::new("panel");
    let lookalike = ComponentModule::new("panel");
    h.configure(
        RouterConfiguration::new()
            .map(RouteConfig::new("one").with_component(deferred(&shared)))
            .map(RouteConfig::new("two").with_component(deferred(&shared)))
            .map(RouteConfig::new("three").with_component(deferred(&lookalike))),
    );
    h.start().await;
    h.take_log();

    let result = h.go("two").await.unwrap();
    assert_eq!(strategy_of(&result), ActivationStrategy::NoChange);
    assert!(h.take_lifecycle().is_empty());

    let result = h.go("three").await.unwrap();
    assert_eq!(strategy_of(&result), ActivationStrategy::Replace);
    assert!(h.take_log().contains(&"load:<deferred>".to_string()));
}

// ============================================================================
// Query params
// ============================================================================

#[tokio::test]
async fn query_params_count_when_compared() {
    let h = Harness::new("users/1");
    h.module("user");
    h.configure(users_config().with_options(RouterOptions {
        compare_query_params: true,
        ..RouterOptions::default()
    }));
    h.start().await;
    h.take_log();

    let result = h.go("users/1?tab=2").await.unwrap();

    assert_eq!(strategy_of(&result), ActivationStrategy::InvokeLifecycle);
    assert!(h.take_lifecycle().contains(&"user.activate".to_string()));
}

// ============================================================================
// View port defaults
// ============================================================================

#[tokio::test]
async fn empty_slot_takes_view_port_default() {
    let h = Harness::new("");
    h.module("fallback-panel");
    let mut defaults = BTreeMap::new();
    defaults.insert(
        DEFAULT_VIEW_PORT.to_string(),
        ViewPortConfig::new(ComponentRef::id("fallback-panel")),
    );
    h.configure(
        RouterConfiguration::new()
            .map(RouteConfig::new("").with_view_port(DEFAULT_VIEW_PORT, ViewPortConfig::empty()))
            .use_view_port_defaults(defaults),
    );

    let result = h.start().await;

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(h.current_module().as_deref(), Some("fallback-panel"));
}
