use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::process;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use zenith_router::{
    ActivationStrategy, MemoryHistory, NavigationOptions, PendingNavigation, PipelineStatus,
    RouteConfig, Router, RouterConfiguration, RouterError, RouterOptions, RouterServices,
    ViewPort, ViewPortInstruction, DEFAULT_VIEW_PORT,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RouterInput {
    #[serde(default)]
    options: RouterOptions,
    routes: Vec<RouteConfig>,
    #[serde(default)]
    fallback_route: Option<String>,
    /// Location the history starts at.
    #[serde(default)]
    start: String,
    #[serde(default)]
    navigations: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NavigationReport {
    requested: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<PipelineStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fragment: Option<String>,
    location: String,
    view_ports: BTreeMap<String, SlotReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SlotReport {
    strategy: ActivationStrategy,
    module: String,
}

/// View port that only records what it was asked to show.
struct RecordingViewPort {
    name: String,
}

#[async_trait]
impl ViewPort for RecordingViewPort {
    async fn process(
        &self,
        instruction: &ViewPortInstruction,
        defer_swap: bool,
    ) -> anyhow::Result<()> {
        tracing::debug!(
            view_port = %self.name,
            module = %instruction.module_id.label(),
            defer_swap,
            "process"
        );
        Ok(())
    }

    fn swap(&self, instruction: &ViewPortInstruction) {
        tracing::debug!(view_port = %self.name, module = %instruction.module_id.label(), "swap");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("[zenith-router] {}", err);
        process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let mut stdin_payload = String::new();
    io::stdin()
        .read_to_string(&mut stdin_payload)
        .map_err(|e| format!("failed to read stdin: {e}"))?;

    if stdin_payload.trim().is_empty() {
        return Err("stdin payload is empty".into());
    }

    let input: RouterInput =
        serde_json::from_str(&stdin_payload).map_err(|e| format!("invalid input JSON: {e}"))?;

    let history = Arc::new(MemoryHistory::new(&input.start));
    let router = Router::new(RouterServices::new(history.clone()));
    for name in view_port_names(&input.routes) {
        router.register_view_port(
            name.as_str(),
            Arc::new(RecordingViewPort { name: name.clone() }),
        );
    }

    let mut config = RouterConfiguration::new().with_options(input.options);
    config.fallback_route = input.fallback_route;
    for route in input.routes {
        config = config.map(route);
    }
    router
        .configure(config)
        .map_err(|e| format!("invalid router configuration: {e}"))?;

    let initial = router
        .activate()
        .await
        .map_err(|e| format!("activation failed: {e}"))?;
    emit(report(&input.start, initial, &history).await)?;

    for requested in &input.navigations {
        let pending = router.navigate(requested, &NavigationOptions::default()).await;
        let line = match pending {
            Ok(pending) => report(requested, pending, &history).await,
            Err(err) => failed(requested, &err, &history),
        };
        emit(line)?;
    }

    router.deactivate();
    Ok(())
}

/// Every view port named by any route, plus `default`.
fn view_port_names(routes: &[RouteConfig]) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = routes
        .iter()
        .flat_map(|route| route.view_ports.keys().cloned())
        .collect();
    names.insert(DEFAULT_VIEW_PORT.to_string());
    names
}

async fn report(
    requested: &str,
    pending: Option<PendingNavigation>,
    history: &MemoryHistory,
) -> NavigationReport {
    let Some(pending) = pending else {
        return NavigationReport {
            requested: requested.to_string(),
            status: None,
            fragment: None,
            location: history.fragment(),
            view_ports: BTreeMap::new(),
            error: Some("navigation was not triggered".to_string()),
        };
    };

    match pending.await {
        Ok(result) => NavigationReport {
            requested: requested.to_string(),
            status: Some(result.status),
            fragment: Some(result.instruction.fragment.clone()),
            location: history.fragment(),
            view_ports: result
                .instruction
                .view_port_instructions()
                .into_iter()
                .map(|(name, vpi)| {
                    (
                        name.to_string(),
                        SlotReport {
                            strategy: vpi.strategy,
                            module: vpi.module_id.label(),
                        },
                    )
                })
                .collect(),
            error: result
                .output
                .is_error()
                .then(|| format!("{:?}", result.output)),
        },
        Err(err) => failed(requested, &err, history),
    }
}

fn failed(requested: &str, err: &RouterError, history: &MemoryHistory) -> NavigationReport {
    NavigationReport {
        requested: requested.to_string(),
        status: None,
        fragment: None,
        location: history.fragment(),
        view_ports: BTreeMap::new(),
        error: Some(err.to_string()),
    }
}

fn emit(report: NavigationReport) -> Result<(), String> {
    let line = serde_json::to_string(&report).map_err(|e| format!("failed to encode report: {e}"))?;
    println!("{}", line);
    Ok(())
}
