mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::Harness;
use pretty_assertions::assert_eq;
use zenith_router::{
    NavigationInstruction, Next, PipelineOutput, PipelineResult, PipelineStatus, PipelineStep,
    RouteConfig, RouterConfiguration, SlotName,
};

/// Rejects every fragment under `admin` unless `signed_in` is set.
struct Authorize {
    signed_in: Mutex<bool>,
}

#[async_trait]
impl PipelineStep for Authorize {
    fn name(&self) -> &str {
        "Authorize"
    }

    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        if instruction.fragment.starts_with("admin") && !*self.signed_in.lock().unwrap() {
            return Ok(next.reject(PipelineOutput::Denied));
        }
        Ok(next.proceed().await)
    }
}

/// Appends `<label>:<fragment>` to the shared log.
struct Marker {
    label: &'static str,
    log: common::Log,
}

#[async_trait]
impl PipelineStep for Marker {
    async fn run(
        &self,
        instruction: &Arc<NavigationInstruction>,
        next: Next<'_>,
    ) -> anyhow::Result<PipelineResult> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.label, instruction.fragment));
        Ok(next.proceed().await)
    }
}

fn routes() -> RouterConfiguration {
    RouterConfiguration::new()
        .map(RouteConfig::new("").with_module("home"))
        .map(RouteConfig::new("admin").with_module("admin"))
}

// ============================================================================
// Slots
// ============================================================================

#[tokio::test]
async fn authorize_step_can_reject() {
    let h = Harness::new("");
    h.module("home");
    h.module("admin");
    let authorize = Arc::new(Authorize {
        signed_in: Mutex::new(false),
    });
    h.configure(routes().add_authorize_step(authorize.clone()));
    h.start().await;
    h.take_log();

    let result = h.go("admin").await.unwrap();
    assert_eq!(result.status, PipelineStatus::Rejected);
    assert_eq!(h.history.fragment(), "");
    // Load runs before the authorize slot; activation never does.
    assert_eq!(h.take_log(), vec!["home.canDeactivate", "load:admin"]);

    *authorize.signed_in.lock().unwrap() = true;
    let result = h.go("admin").await.unwrap();
    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(h.current_module().as_deref(), Some("admin"));
}

#[tokio::test]
async fn slot_steps_run_at_their_position() {
    let h = Harness::new("");
    h.module("home");
    h.module("admin");
    let mut config = routes();
    for (slot, label) in [
        (SlotName::PostRender, "postRender"),
        (SlotName::PreRender, "preRender"),
        (SlotName::PreActivate, "preActivate"),
        (SlotName::Authorize, "authorize"),
    ] {
        config = config.add_pipeline_step(
            slot,
            Arc::new(Marker {
                label,
                log: Arc::clone(&h.log),
            }),
        );
    }
    h.configure(config);

    h.start().await;

    assert_eq!(
        h.take_log(),
        vec![
            "load:home",
            "authorize:",
            "home.canActivate",
            "preActivate:",
            "home.activate",
            "preRender:",
            "process:default:home",
            "swap:default:home",
            "postRender:",
        ]
    );
}

#[tokio::test]
async fn reconfiguring_root_resets_slots() {
    let h = Harness::new("");
    h.module("home");
    h.configure(routes().add_pre_render_step(Arc::new(Marker {
        label: "stale",
        log: Arc::clone(&h.log),
    })));
    h.configure(routes());

    h.start().await;

    assert!(!h.take_log().iter().any(|entry| entry.starts_with("stale")));
}
