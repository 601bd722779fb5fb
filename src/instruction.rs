//! Navigation and view port instructions.
//!
//! A [`NavigationInstruction`] is created per router level for one navigation
//! attempt. It is filled in as the plan is built and components load, then
//! committed and pruned. Instructions are never reused across navigations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use arcstr::ArcStr;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tokio::sync::oneshot;

use crate::command::NavigationCommand;
use crate::component::RouteComponent;
use crate::config::{ComponentRef, RouteConfig};
use crate::pipeline::PipelineResult;
use crate::plan::NavigationPlan;
use crate::router::Router;
use crate::{ActivationStrategy, RouterError};

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// String parameters with unique keys, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Insert or overwrite. An overwritten key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(&mut self, other: &Params) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

impl Serialize for Params {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// LifecycleArgs
// ---------------------------------------------------------------------------

/// Arguments handed verbatim to every lifecycle callback: merged params,
/// the route config, and the instruction itself.
#[derive(Clone)]
pub struct LifecycleArgs {
    /// Query params, then every ancestor's params, then this level's params.
    /// Wildcard remainders are stripped.
    pub params: Params,
    pub config: Arc<RouteConfig>,
    /// Set for view port instructions.
    pub view_port: Option<ArcStr>,
    instruction: Weak<NavigationInstruction>,
}

impl LifecycleArgs {
    pub fn instruction(&self) -> Option<Arc<NavigationInstruction>> {
        self.instruction.upgrade()
    }

    fn for_view_port(&self, name: &ArcStr) -> Self {
        Self {
            view_port: Some(name.clone()),
            ..self.clone()
        }
    }
}

impl fmt::Debug for LifecycleArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleArgs")
            .field("params", &self.params)
            .field("route", &self.config.route)
            .field("view_port", &self.view_port)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ViewPortInstruction
// ---------------------------------------------------------------------------

/// What one view port will show once the navigation commits.
#[derive(Clone)]
pub struct ViewPortInstruction {
    pub name: ArcStr,
    pub strategy: ActivationStrategy,
    pub module_id: ComponentRef,
    pub component: RouteComponent,
    pub child_navigation_instruction: Option<Arc<NavigationInstruction>>,
    pub lifecycle_args: LifecycleArgs,
}

impl fmt::Debug for ViewPortInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewPortInstruction")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("module_id", &self.module_id)
            .field(
                "child",
                &self
                    .child_navigation_instruction
                    .as_ref()
                    .map(|child| child.fragment.clone()),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// NavigationInstruction
// ---------------------------------------------------------------------------

/// Everything needed to build one [`NavigationInstruction`].
pub struct InstructionInit {
    pub fragment: String,
    pub query_string: String,
    pub params: Params,
    pub query_params: Params,
    pub config: Arc<RouteConfig>,
    /// The pattern that matched, used to find the wildcard segment.
    pub matched_pattern: String,
    pub router: Weak<Router>,
    pub parent_instruction: Option<Arc<NavigationInstruction>>,
    pub previous_instruction: Option<Arc<NavigationInstruction>>,
    /// Resolved through an ancestor router's unknown-route handler.
    pub parent_catch_handler: bool,
    pub compare_query_params: bool,
}

type Settler = oneshot::Sender<Result<PipelineResult, RouterError>>;

/// One router level's share of a navigation attempt.
pub struct NavigationInstruction {
    pub fragment: String,
    pub query_string: String,
    pub params: Params,
    pub query_params: Params,
    pub config: Arc<RouteConfig>,
    pub compare_query_params: bool,
    matched_pattern: String,
    parent_catch_handler: bool,
    router: Weak<Router>,
    parent_instruction: Option<Weak<NavigationInstruction>>,
    lifecycle_args: LifecycleArgs,
    previous_instruction: Mutex<Option<Arc<NavigationInstruction>>>,
    plan: Mutex<Option<NavigationPlan>>,
    view_port_instructions: Mutex<BTreeMap<ArcStr, ViewPortInstruction>>,
    /// Base URL the owning router takes on once this instruction commits.
    router_base_url: Mutex<Option<String>>,
    deferred_commands: Mutex<Vec<Arc<dyn NavigationCommand>>>,
    settler: Mutex<Option<Settler>>,
}

impl NavigationInstruction {
    pub fn new(init: InstructionInit) -> Arc<Self> {
        Arc::new_cyclic(|me| {
            let wildcard = wildcard_name(&init.matched_pattern).map(str::to_string);

            let mut own = init.params.clone();
            if let Some(name) = &wildcard {
                own.remove(name);
            }
            let mut levels = vec![own];
            let mut ancestor = init.parent_instruction.clone();
            while let Some(current) = ancestor {
                let mut params = current.params.clone();
                if let Some(name) = current.wildcard_name() {
                    params.remove(name);
                }
                levels.push(params);
                ancestor = current.parent_instruction();
            }

            let mut merged = init.query_params.clone();
            for params in levels.iter().rev() {
                merged.merge(params);
            }

            Self {
                lifecycle_args: LifecycleArgs {
                    params: merged,
                    config: Arc::clone(&init.config),
                    view_port: None,
                    instruction: me.clone(),
                },
                fragment: init.fragment,
                query_string: init.query_string,
                params: init.params,
                query_params: init.query_params,
                config: init.config,
                compare_query_params: init.compare_query_params,
                matched_pattern: init.matched_pattern,
                parent_catch_handler: init.parent_catch_handler,
                router: init.router,
                parent_instruction: init.parent_instruction.as_ref().map(Arc::downgrade),
                previous_instruction: Mutex::new(init.previous_instruction),
                plan: Mutex::new(None),
                view_port_instructions: Mutex::new(BTreeMap::new()),
                router_base_url: Mutex::new(None),
                deferred_commands: Mutex::new(Vec::new()),
                settler: Mutex::new(None),
            }
        })
    }

    pub fn router(&self) -> Result<Arc<Router>, RouterError> {
        self.router.upgrade().ok_or(RouterError::RouterDropped)
    }

    pub fn lifecycle_args(&self) -> &LifecycleArgs {
        &self.lifecycle_args
    }

    pub fn parent_instruction(&self) -> Option<Arc<NavigationInstruction>> {
        self.parent_instruction.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_parent_catch_handler(&self) -> bool {
        self.parent_catch_handler
    }

    pub fn previous_instruction(&self) -> Option<Arc<NavigationInstruction>> {
        lock(&self.previous_instruction).clone()
    }

    pub(crate) fn set_previous_instruction(&self, previous: Option<Arc<NavigationInstruction>>) {
        *lock(&self.previous_instruction) = previous;
    }

    pub fn plan(&self) -> Option<NavigationPlan> {
        lock(&self.plan).clone()
    }

    pub(crate) fn set_plan(&self, plan: NavigationPlan) {
        *lock(&self.plan) = Some(plan);
    }

    /// Attach a nested instruction to an existing view port plan.
    pub(crate) fn set_plan_child(&self, view_port: &ArcStr, child: Arc<NavigationInstruction>) {
        if let Some(plan) = lock(&self.plan).as_mut() {
            if let Some(vp_plan) = plan.get_mut(view_port) {
                vp_plan.child_navigation_instruction = Some(child);
            }
        }
    }

    pub fn view_port_instructions(&self) -> BTreeMap<ArcStr, ViewPortInstruction> {
        lock(&self.view_port_instructions).clone()
    }

    pub fn view_port_instruction(&self, name: &str) -> Option<ViewPortInstruction> {
        lock(&self.view_port_instructions).get(name).cloned()
    }

    /// Record what a view port will show. Redirecting instructions refuse.
    pub fn add_view_port_instruction(
        &self,
        name: ArcStr,
        strategy: ActivationStrategy,
        module_id: ComponentRef,
        component: RouteComponent,
    ) -> Result<ViewPortInstruction, RouterError> {
        if self.config.is_redirect() {
            return Err(RouterError::RedirectingInstruction(self.fragment.clone()));
        }
        let instruction = ViewPortInstruction {
            lifecycle_args: self.lifecycle_args.for_view_port(&name),
            name: name.clone(),
            strategy,
            module_id,
            component,
            child_navigation_instruction: None,
        };
        lock(&self.view_port_instructions).insert(name, instruction.clone());
        Ok(instruction)
    }

    pub(crate) fn set_view_port_child(&self, view_port: &ArcStr, child: Arc<NavigationInstruction>) {
        if let Some(vpi) = lock(&self.view_port_instructions).get_mut(view_port) {
            vpi.child_navigation_instruction = Some(child);
        }
    }

    /// The route pattern (or unknown-route fragment) this instruction matched.
    pub fn matched_pattern(&self) -> &str {
        &self.matched_pattern
    }

    /// Name of the wildcard segment of the matched pattern, if any.
    pub fn wildcard_name(&self) -> Option<&str> {
        wildcard_name(&self.matched_pattern)
    }

    /// The unconsumed remainder handed to nested routers, with the query string.
    pub fn wildcard_path(&self) -> String {
        let path = self
            .wildcard_name()
            .and_then(|name| self.params.get(name))
            .unwrap_or_default();
        if self.query_string.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, self.query_string)
        }
    }

    /// The part of the fragment consumed at this level.
    pub fn base_url(&self) -> String {
        let remainder = self
            .wildcard_name()
            .and_then(|name| self.params.get(name))
            .unwrap_or_default();
        let base = if remainder.is_empty() {
            self.fragment.as_str()
        } else {
            self.fragment
                .strip_suffix(remainder)
                .unwrap_or(self.fragment.as_str())
        };
        base.trim_end_matches('/').to_string()
    }

    /// The owning router's base URL as of this instruction: the pending one
    /// when this instruction was resolved under a parent, else the router's.
    pub fn router_base_url(&self) -> String {
        match lock(&self.router_base_url).clone() {
            Some(base) => base,
            None => self.router().map(|router| router.base_url()).unwrap_or_default(),
        }
    }

    pub(crate) fn set_router_base_url(&self, base: String) {
        *lock(&self.router_base_url) = Some(base);
    }

    /// This instruction and every nested instruction, parents first.
    pub fn all_instructions(self: &Arc<Self>) -> Vec<Arc<NavigationInstruction>> {
        let mut all = vec![Arc::clone(self)];
        for vpi in self.view_port_instructions().into_values() {
            if let Some(child) = vpi.child_navigation_instruction {
                all.extend(child.all_instructions());
            }
        }
        all
    }

    pub(crate) fn defer_command(&self, command: Arc<dyn NavigationCommand>) {
        lock(&self.deferred_commands).push(command);
    }

    pub(crate) fn take_deferred_commands(&self) -> Vec<Arc<dyn NavigationCommand>> {
        std::mem::take(&mut *lock(&self.deferred_commands))
    }

    pub(crate) fn attach_settler(&self, settler: Settler) {
        *lock(&self.settler) = Some(settler);
    }

    /// Resolve whoever is waiting on this instruction. Later calls are no-ops.
    pub(crate) fn settle(&self, result: Result<PipelineResult, RouterError>) {
        if let Some(settler) = lock(&self.settler).take() {
            let _ = settler.send(result);
        }
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Hand every view port its new instruction. Replaced slots are
    /// processed (and swapped afterwards when `wait_to_swap`), then nested
    /// instructions commit beneath them.
    pub fn commit_changes(
        self: Arc<Self>,
        wait_to_swap: bool,
    ) -> BoxFuture<'static, Result<(), RouterError>> {
        async move {
            let router = self.router()?;
            let mut loads: Vec<BoxFuture<'static, Result<(), RouterError>>> = Vec::new();
            let mut delayed_swaps = Vec::new();

            for (name, vpi) in self.view_port_instructions() {
                let view_port = router
                    .view_port(&name)
                    .ok_or_else(|| RouterError::MissingViewPort(name.to_string()))?;
                let child = vpi.child_navigation_instruction.clone();

                if vpi.strategy != ActivationStrategy::Replace {
                    if let Some(child) = child {
                        loads.push(child.commit_changes(wait_to_swap));
                    }
                    continue;
                }

                match child {
                    Some(child) if child.is_parent_catch_handler() => {
                        loads.push(child.commit_changes(wait_to_swap));
                    }
                    child => {
                        if wait_to_swap {
                            delayed_swaps.push((Arc::clone(&view_port), vpi.clone()));
                        }
                        loads.push(
                            async move {
                                view_port.process(&vpi, wait_to_swap).await?;
                                if let Some(child) = child {
                                    child.commit_changes(wait_to_swap).await?;
                                }
                                Ok(())
                            }
                            .boxed(),
                        );
                    }
                }
            }

            future::try_join_all(loads).await?;
            for (view_port, vpi) in delayed_swaps {
                view_port.swap(&vpi);
            }
            Ok(())
        }
        .boxed()
    }

    /// Make this tree the routers' current state and drop per-attempt data.
    pub(crate) fn finalize(self: &Arc<Self>) {
        for instruction in self.all_instructions() {
            if let Ok(router) = instruction.router() {
                if let Some(base) = lock(&instruction.router_base_url).clone() {
                    router.set_base_url(base);
                }
                router.set_current_instruction(Arc::clone(&instruction));
            }
            instruction.prune();
        }
    }

    fn prune(&self) {
        *lock(&self.previous_instruction) = None;
        *lock(&self.plan) = None;
    }
}

impl fmt::Debug for NavigationInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationInstruction")
            .field("fragment", &self.fragment)
            .field("query_string", &self.query_string)
            .field("params", &self.params)
            .field("route", &self.config.route)
            .finish()
    }
}

fn wildcard_name(pattern: &str) -> Option<&str> {
    pattern
        .rsplit('/')
        .next()
        .and_then(|segment| segment.strip_prefix('*'))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("instruction state poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(fragment: &str, pattern: &str, params: Params) -> InstructionInit {
        InstructionInit {
            fragment: fragment.to_string(),
            query_string: String::new(),
            params,
            query_params: Params::new(),
            config: Arc::new(RouteConfig::new(pattern).with_module("m")),
            matched_pattern: pattern.to_string(),
            router: Weak::new(),
            parent_instruction: None,
            previous_instruction: None,
            parent_catch_handler: false,
            compare_query_params: false,
        }
    }

    #[test]
    fn params_insert_keeps_position() {
        let mut params = Params::new();
        params.insert("a", "1");
        params.insert("b", "2");
        params.insert("a", "3");
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("a", "3"), ("b", "2")]);
        assert_eq!(params.remove("a"), Some("3".to_string()));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn params_serialize_as_ordered_map() {
        let params: Params = [("z", "1"), ("a", "2")].into_iter().collect();
        assert_eq!(serde_json::to_string(&params).unwrap(), r#"{"z":"1","a":"2"}"#);
    }

    #[test]
    fn wildcard_path_and_base_url() {
        let params: Params = [("id", "5"), ("childRoute", "edit/name")].into_iter().collect();
        let mut init = init("users/5/edit/name", "users/:id/*childRoute", params);
        init.query_string = "tab=1".to_string();
        let instruction = NavigationInstruction::new(init);

        assert_eq!(instruction.wildcard_name(), Some("childRoute"));
        assert_eq!(instruction.wildcard_path(), "edit/name?tab=1");
        assert_eq!(instruction.base_url(), "users/5");
    }

    #[test]
    fn lifecycle_args_merge_ancestors_without_wildcards() {
        let parent_params: Params = [("id", "5"), ("childRoute", "posts/9")].into_iter().collect();
        let parent = NavigationInstruction::new(init(
            "users/5/posts/9",
            "users/:id/*childRoute",
            parent_params,
        ));

        let child_params: Params = [("post", "9")].into_iter().collect();
        let mut child_init = init("posts/9", "posts/:post", child_params);
        child_init.parent_instruction = Some(Arc::clone(&parent));
        child_init.query_params = [("id", "query")].into_iter().collect();
        let child = NavigationInstruction::new(child_init);

        let args = child.lifecycle_args();
        assert_eq!(args.params.get("id"), Some("5"));
        assert_eq!(args.params.get("post"), Some("9"));
        assert!(!args.params.contains_key("childRoute"));
        assert!(Arc::ptr_eq(&args.instruction().unwrap(), &child));
    }

    #[test]
    fn redirecting_instruction_refuses_view_ports() {
        let mut init = init("a/5", "a/:x", Params::new());
        init.config = Arc::new(RouteConfig::new("a/:x").with_redirect("b/:x"));
        let instruction = NavigationInstruction::new(init);
        let component = RouteComponent::inert();
        let err = instruction
            .add_view_port_instruction(
                ArcStr::from("default"),
                ActivationStrategy::Replace,
                ComponentRef::id("b"),
                component,
            )
            .unwrap_err();
        assert!(matches!(err, RouterError::RedirectingInstruction(_)));
    }
}
