mod common;

use common::Harness;
use pretty_assertions::assert_eq;
use zenith_router::{PipelineStatus, RouteConfig, RouterConfiguration};

fn harness(routes: Vec<RouteConfig>) -> Harness {
    let h = Harness::new("");
    h.module("home");
    h.module("b");
    h.module("d");
    let mut config = RouterConfiguration::new().map(RouteConfig::new("").with_module("home"));
    for route in routes {
        config = config.map(route);
    }
    h.configure(config);
    h
}

// ============================================================================
// Parameter linking
// ============================================================================

#[tokio::test]
async fn redirect_links_matching_param() {
    let h = harness(vec![
        RouteConfig::new("a/:id").with_redirect("b/:id"),
        RouteConfig::new("b/:id").with_module("b"),
    ]);
    h.start().await;

    let result = h.go("a/5").await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.instruction.fragment, "b/5");
    assert_eq!(h.history.fragment(), "b/5");
    assert_eq!(h.current_module().as_deref(), Some("b"));
}

#[tokio::test]
async fn redirect_links_by_name_not_position() {
    let h = harness(vec![
        RouteConfig::new("a/:x/:y").with_redirect("b/:y"),
        RouteConfig::new("b/:id").with_module("b"),
    ]);
    h.start().await;

    let result = h.go("a/5/6").await.unwrap();

    assert_eq!(result.instruction.fragment, "b/6");
    assert_eq!(result.instruction.params.get("id"), Some("6"));
}

#[tokio::test]
async fn redirect_drops_unknown_param() {
    let h = harness(vec![
        RouteConfig::new("c/:x").with_redirect("d/:missing"),
        RouteConfig::new("d/:y?").with_module("d"),
    ]);
    h.start().await;

    let result = h.go("c/1").await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.instruction.fragment, "d");
    assert_eq!(h.history.fragment(), "d");
}

#[tokio::test]
async fn redirect_keeps_query_string() {
    let h = harness(vec![
        RouteConfig::new("a/:id").with_redirect("b/:id"),
        RouteConfig::new("b/:id").with_module("b"),
    ]);
    h.start().await;

    let result = h.go("a/5?tab=2").await.unwrap();

    assert_eq!(result.instruction.fragment, "b/5");
    assert_eq!(result.instruction.query_params.get("tab"), Some("2"));
    assert_eq!(h.history.fragment(), "b/5?tab=2");
}

// ============================================================================
// History and events
// ============================================================================

#[tokio::test]
async fn redirect_replaces_history_entry() {
    let h = harness(vec![
        RouteConfig::new("old").with_redirect("b/1"),
        RouteConfig::new("b/:id").with_module("b"),
    ]);
    h.start().await;

    h.go("old").await.unwrap();

    assert_eq!(h.history.entries(), vec!["", "b/1"]);
}

#[tokio::test]
async fn redirect_settles_as_one_navigation() {
    use zenith_router::RouterEventKind::*;

    let mut h = harness(vec![
        RouteConfig::new("a/:id").with_redirect("b/:id"),
        RouteConfig::new("b/:id").with_module("b"),
    ]);
    h.start().await;
    h.events_until_complete().await;

    h.go("a/1").await.unwrap();

    assert_eq!(
        h.events_until_complete().await,
        vec![Processing, ChildComplete, Success, Complete]
    );
}
