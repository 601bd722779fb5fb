//! Shared fixtures: recording components, a registry-backed loader and
//! view ports that log what they are asked to show.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use zenith_router::component::{Activate, CanActivate, CanDeactivate, Deactivate};
use zenith_router::{
    ComponentLoader, ComponentRef, LifecycleArgs, LifecycleOutcome, MemoryHistory,
    NavigationInstruction, NavigationOptions, PipelineResult, Redirect, RoutableComponent,
    RouteComponent, Router, RouterConfiguration, RouterError, RouterEvent, RouterEventKind,
    RouterServices, ViewPort, ViewPortInstruction, DEFAULT_VIEW_PORT,
};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: String) {
    log.lock().unwrap().push(entry);
}

// ============================================================================
// Components
// ============================================================================

/// How a probe answers its `can-` callbacks.
#[derive(Debug, Default, Clone)]
pub struct Behavior {
    pub deny_deactivate: bool,
    pub deny_activate: bool,
    /// `canActivate` answers with a redirect to this fragment.
    pub redirect_to: Option<String>,
    /// The redirect lets the current navigation finish first.
    pub continue_after_redirect: bool,
}

/// A component implementing every lifecycle callback, logging each call as
/// `<name>.<callback>`.
pub struct Probe {
    name: String,
    log: Log,
    behavior: Mutex<Behavior>,
    params: Mutex<Vec<String>>,
}

impl Probe {
    pub fn new(name: &str, log: &Log) -> Arc<Self> {
        Self::with_behavior(name, log, Behavior::default())
    }

    pub fn with_behavior(name: &str, log: &Log, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            behavior: Mutex::new(behavior),
            params: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Params seen by each `activate`, rendered as `k=v&k=v`.
    pub fn activated_with(&self) -> Vec<String> {
        self.params.lock().unwrap().clone()
    }

    fn record(&self, callback: &str) {
        push(&self.log, format!("{}.{}", self.name, callback));
    }
}

impl RoutableComponent for Probe {
    fn as_can_deactivate(&self) -> Option<&dyn CanDeactivate> {
        Some(self)
    }

    fn as_deactivate(&self) -> Option<&dyn Deactivate> {
        Some(self)
    }

    fn as_can_activate(&self) -> Option<&dyn CanActivate> {
        Some(self)
    }

    fn as_activate(&self) -> Option<&dyn Activate> {
        Some(self)
    }
}

impl CanDeactivate for Probe {
    fn can_deactivate(&self) -> LifecycleOutcome {
        self.record("canDeactivate");
        LifecycleOutcome::ready(!self.behavior.lock().unwrap().deny_deactivate)
    }
}

impl Deactivate for Probe {
    fn deactivate(&self) -> LifecycleOutcome {
        self.record("deactivate");
        LifecycleOutcome::ready(())
    }
}

impl CanActivate for Probe {
    fn can_activate(&self, _args: &LifecycleArgs) -> LifecycleOutcome {
        self.record("canActivate");
        let behavior = self.behavior.lock().unwrap().clone();
        if let Some(target) = behavior.redirect_to {
            let redirect = Redirect::new(target);
            let redirect = if behavior.continue_after_redirect {
                redirect.continue_processing()
            } else {
                redirect
            };
            return LifecycleOutcome::ready(redirect);
        }
        LifecycleOutcome::pending(async move { !behavior.deny_activate })
    }
}

impl Activate for Probe {
    fn activate(&self, args: &LifecycleArgs) -> LifecycleOutcome {
        self.record("activate");
        let rendered: Vec<String> = args
            .params
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        self.params.lock().unwrap().push(rendered.join("&"));
        LifecycleOutcome::ready(())
    }
}

// ============================================================================
// Loader
// ============================================================================

struct Module {
    view_model: Arc<dyn RoutableComponent>,
    child: Option<RouterConfiguration>,
}

/// Resolves module ids to registered components. Modules registered with a
/// child configuration get a fresh nested router on every load.
pub struct RegistryLoader {
    log: Log,
    modules: Mutex<HashMap<String, Module>>,
}

impl RegistryLoader {
    pub fn new(log: &Log) -> Arc<Self> {
        Arc::new(Self {
            log: Arc::clone(log),
            modules: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, id: &str, probe: Arc<Probe>) {
        self.register_component(id, probe);
    }

    pub fn register_component(&self, id: &str, view_model: Arc<dyn RoutableComponent>) {
        self.modules.lock().unwrap().insert(
            id.to_string(),
            Module {
                view_model,
                child: None,
            },
        );
    }

    pub fn register_with_child(&self, id: &str, probe: Arc<Probe>, child: RouterConfiguration) {
        self.modules.lock().unwrap().insert(
            id.to_string(),
            Module {
                view_model: probe,
                child: Some(child),
            },
        );
    }
}

#[async_trait]
impl ComponentLoader for RegistryLoader {
    async fn load_component(
        &self,
        router: &Arc<Router>,
        _instruction: &Arc<NavigationInstruction>,
        component: &ComponentRef,
    ) -> anyhow::Result<RouteComponent> {
        let id = component.label();
        push(&self.log, format!("load:{}", id));
        let (view_model, child) = {
            let modules = self.modules.lock().unwrap();
            let module = modules
                .get(&id)
                .ok_or_else(|| anyhow::anyhow!("no module registered as `{}`", id))?;
            (Arc::clone(&module.view_model), module.child.clone())
        };

        let mut loaded = RouteComponent::new(view_model);
        if let Some(config) = child {
            let child_router = router.create_child();
            child_router.register_view_port(
                DEFAULT_VIEW_PORT,
                RecordingViewPort::new(&format!("{}>{}", id, DEFAULT_VIEW_PORT), &self.log),
            );
            child_router.configure(config)?;
            loaded = loaded.with_child_router(child_router);
        }
        Ok(loaded)
    }
}

// ============================================================================
// View ports
// ============================================================================

/// Logs `process:<name>:<module>` and `swap:<name>:<module>`.
pub struct RecordingViewPort {
    name: String,
    log: Log,
}

impl RecordingViewPort {
    pub fn new(name: &str, log: &Log) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
        })
    }
}

#[async_trait]
impl ViewPort for RecordingViewPort {
    async fn process(
        &self,
        instruction: &ViewPortInstruction,
        _defer_swap: bool,
    ) -> anyhow::Result<()> {
        push(
            &self.log,
            format!("process:{}:{}", self.name, instruction.module_id.label()),
        );
        Ok(())
    }

    fn swap(&self, instruction: &ViewPortInstruction) {
        push(
            &self.log,
            format!("swap:{}:{}", self.name, instruction.module_id.label()),
        );
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A root router over an in-memory history, wired to the fixtures above.
pub struct Harness {
    pub router: Arc<Router>,
    pub history: Arc<MemoryHistory>,
    pub loader: Arc<RegistryLoader>,
    pub log: Log,
    pub events: broadcast::Receiver<RouterEvent>,
}

impl Harness {
    pub fn new(start: &str) -> Self {
        let log = new_log();
        let history = Arc::new(MemoryHistory::new(start));
        let loader = RegistryLoader::new(&log);
        let services = RouterServices::new(history.clone()).with_loader(loader.clone());
        let events = services.events.subscribe();
        let router = Router::new(services);
        router.register_view_port(
            DEFAULT_VIEW_PORT,
            RecordingViewPort::new(DEFAULT_VIEW_PORT, &log),
        );
        Self {
            router,
            history,
            loader,
            log,
            events,
        }
    }

    /// Register a probe under `id` and return it.
    pub fn module(&self, id: &str) -> Arc<Probe> {
        let probe = Probe::new(id, &self.log);
        self.loader.register(id, Arc::clone(&probe));
        probe
    }

    pub fn configure(&self, config: RouterConfiguration) {
        self.router.configure(config).unwrap();
    }

    /// Activate and wait for the initial navigation.
    pub async fn start(&self) -> PipelineResult {
        let pending = self
            .router
            .activate()
            .await
            .unwrap()
            .expect("activation should trigger a navigation");
        pending.await.unwrap()
    }

    /// Navigate with default options and wait for the navigation to settle.
    pub async fn go(&self, fragment: &str) -> Result<PipelineResult, RouterError> {
        let pending = self
            .router
            .navigate(fragment, &NavigationOptions::default())
            .await?
            .expect("navigation should trigger");
        pending.await
    }

    /// Everything logged since the last call.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    /// Lifecycle entries only (`name.callback`), draining the log.
    pub fn take_lifecycle(&self) -> Vec<String> {
        self.take_log()
            .into_iter()
            .filter(|entry| entry.contains('.'))
            .collect()
    }

    /// Event kinds up to and including the next `Complete`.
    pub async fn events_until_complete(&mut self) -> Vec<RouterEventKind> {
        let mut kinds = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("timed out waiting for router events")
                .expect("event channel closed");
            kinds.push(event.kind);
            if event.kind == RouterEventKind::Complete {
                return kinds;
            }
        }
    }

    /// The module label shown in the root's `default` view port.
    pub fn current_module(&self) -> Option<String> {
        self.router
            .current_instruction()?
            .view_port_instruction(DEFAULT_VIEW_PORT)
            .map(|vpi| vpi.module_id.label())
    }
}
