//! Router - route tables, instruction resolution and the navigation API
//!
//! There is a single router type. The root router owns the navigation queue
//! (see `queue.rs`); nested routers created with [`Router::create_child`]
//! share the root's services and hand queue work to it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use arcstr::ArcStr;
use dashmap::DashMap;
use serde::Serialize;

use crate::component::{ComponentLoader, InertLoader, ViewPort};
use crate::config::{
    NavSetting, RouteConfig, RouterConfiguration, RouterOptions, UnknownRouteHandler,
    ViewPortConfig,
};
use crate::events::EventAggregator;
use crate::history::{History, NavigationOptions};
use crate::instruction::{InstructionInit, NavigationInstruction, Params};
use crate::pipeline::PipelineProvider;
use crate::queue::{NavigationQueue, PendingNavigation};
use crate::recognizer::{RouteMatch, RouteRecognizer};
use crate::utils;
use crate::RouterError;

/// Order given to `nav: true` routes, after any explicit order.
const FALLBACK_NAV_ORDER: i32 = 100;

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Collaborators handed to a router at construction and shared with every
/// nested router.
#[derive(Clone)]
pub struct RouterServices {
    pub history: Arc<dyn History>,
    pub events: EventAggregator,
    pub loader: Arc<dyn ComponentLoader>,
    pub pipeline_provider: Arc<PipelineProvider>,
    /// Span that queue work is recorded under.
    pub span: tracing::Span,
}

impl RouterServices {
    pub fn new(history: Arc<dyn History>) -> Self {
        Self {
            history,
            events: EventAggregator::new(),
            loader: Arc::new(InertLoader),
            pipeline_provider: Arc::new(PipelineProvider::new()),
            span: tracing::info_span!("router"),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ComponentLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_events(mut self, events: EventAggregator) -> Self {
        self.events = events;
        self
    }

    pub fn with_pipeline_provider(mut self, provider: Arc<PipelineProvider>) -> Self {
        self.pipeline_provider = provider;
        self
    }

    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }
}

impl fmt::Debug for RouterServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterServices")
            .field("events", &self.events)
            .field("pipeline_provider", &self.pipeline_provider)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// NavModel
// ---------------------------------------------------------------------------

/// Menu entry for a route declared with `nav`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavModel {
    pub route: String,
    pub name: Option<String>,
    pub title: Option<String>,
    pub href: String,
    pub order: i32,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Route tables
// ---------------------------------------------------------------------------

/// Exact patterns plus a `<route>/*childRoute` table for nested routers.
#[derive(Debug, Default)]
struct RouteTables {
    exact: RouteRecognizer,
    child: RouteRecognizer,
    routes: Vec<Arc<RouteConfig>>,
}

impl RouteTables {
    fn add(&mut self, config: RouteConfig) -> Result<(), RouterError> {
        let config = Arc::new(config.normalize()?);
        let path = utils::normalize_fragment(&config.route);
        self.exact.add(&path, Arc::clone(&config))?;
        if !path.is_empty() && !config.is_redirect() {
            self.child
                .add(&format!("{}/*childRoute", path), Arc::clone(&config))?;
        }
        self.routes.push(config);
        Ok(())
    }

    /// Best match, consulting the child table only when nothing matches
    /// exactly.
    fn recognize(&self, url: &str) -> Option<RouteMatch> {
        self.exact
            .recognize(url)
            .into_iter()
            .next()
            .or_else(|| self.child.recognize(url).into_iter().next())
    }
}

#[derive(Debug, Default)]
struct RouterState {
    tables: RouteTables,
    title: Option<String>,
    options: RouterOptions,
    fallback_route: Option<String>,
    view_port_defaults: BTreeMap<String, ViewPortConfig>,
    unknown_route: Option<UnknownRouteHandler>,
    configured: bool,
    base_url: String,
    current_instruction: Option<Arc<NavigationInstruction>>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct Router {
    parent: Option<Weak<Router>>,
    services: RouterServices,
    view_ports: DashMap<ArcStr, Arc<dyn ViewPort>>,
    state: RwLock<RouterState>,
    /// Present on the root router only.
    pub(crate) queue: Option<NavigationQueue>,
}

impl Router {
    /// Create a root router.
    pub fn new(services: RouterServices) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            services,
            view_ports: DashMap::new(),
            state: RwLock::new(RouterState::default()),
            queue: Some(NavigationQueue::new()),
        })
    }

    /// Create a nested router sharing this router's services.
    pub fn create_child(self: &Arc<Self>) -> Arc<Router> {
        Arc::new(Self {
            parent: Some(Arc::downgrade(self)),
            services: self.services.clone(),
            view_ports: DashMap::new(),
            state: RwLock::new(RouterState::default()),
            queue: None,
        })
    }

    pub fn parent(&self) -> Option<Arc<Router>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// The router owning the navigation queue.
    pub fn root(self: &Arc<Self>) -> Arc<Router> {
        let mut router = Arc::clone(self);
        while let Some(parent) = router.parent() {
            router = parent;
        }
        router
    }

    pub fn services(&self) -> &RouterServices {
        &self.services
    }

    fn read(&self) -> RwLockReadGuard<'_, RouterState> {
        self.state.read().expect("router state poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, RouterState> {
        self.state.write().expect("router state poisoned")
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Replace the router's configuration. Nothing changes if any route is
    /// invalid. Pipeline steps are only accepted on the root router.
    pub fn configure(&self, config: RouterConfiguration) -> Result<(), RouterError> {
        let RouterConfiguration {
            title,
            options,
            routes,
            fallback_route,
            view_port_defaults,
            unknown_route,
            pipeline_steps,
        } = config;

        let mut tables = RouteTables::default();
        for route in routes {
            tables.add(route)?;
        }

        {
            let mut state = self.write();
            state.tables = tables;
            state.title = title;
            state.options = options;
            state.fallback_route = fallback_route;
            state.view_port_defaults = view_port_defaults;
            state.unknown_route = unknown_route;
            state.configured = true;
        }

        if self.is_root() {
            let provider = &self.services.pipeline_provider;
            provider.reset();
            for (slot, step) in pipeline_steps {
                provider.add_step(slot, step);
            }
        } else if !pipeline_steps.is_empty() {
            tracing::warn!(
                count = pipeline_steps.len(),
                "pipeline steps can only be registered on the root router; ignoring"
            );
        }

        tracing::debug!(routes = self.read().tables.routes.len(), "router configured");
        Ok(())
    }

    /// Register one more route.
    pub fn add_route(&self, config: RouteConfig) -> Result<(), RouterError> {
        let mut state = self.write();
        state.tables.add(config)?;
        state.configured = true;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.read().configured
    }

    /// Whether this router or an ancestor has a route with this name.
    pub fn has_route(&self, name: &str) -> bool {
        self.has_own_route(name) || self.parent().is_some_and(|parent| parent.has_route(name))
    }

    pub fn has_own_route(&self, name: &str) -> bool {
        self.read().tables.exact.has_route(name)
    }

    pub fn routes(&self) -> Vec<Arc<RouteConfig>> {
        self.read().tables.routes.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.read().title.clone()
    }

    pub fn options(&self) -> RouterOptions {
        self.read().options.clone()
    }

    pub fn fallback_route(&self) -> Option<String> {
        self.read().fallback_route.clone()
    }

    pub fn view_port_defaults(&self) -> BTreeMap<String, ViewPortConfig> {
        self.read().view_port_defaults.clone()
    }

    /// URL prefix consumed by the levels above this router.
    pub fn base_url(&self) -> String {
        self.read().base_url.clone()
    }

    pub(crate) fn set_base_url(&self, base: String) {
        self.write().base_url = base;
    }

    // -----------------------------------------------------------------------
    // View ports and current state
    // -----------------------------------------------------------------------

    pub fn register_view_port(&self, name: impl Into<ArcStr>, view_port: Arc<dyn ViewPort>) {
        self.view_ports.insert(name.into(), view_port);
    }

    pub fn view_port(&self, name: &str) -> Option<Arc<dyn ViewPort>> {
        self.view_ports.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// The last committed instruction at this level.
    pub fn current_instruction(&self) -> Option<Arc<NavigationInstruction>> {
        self.read().current_instruction.clone()
    }

    pub(crate) fn set_current_instruction(&self, instruction: Arc<NavigationInstruction>) {
        self.write().current_instruction = Some(instruction);
    }

    /// Menu entries for `nav` routes, ordered by `order`.
    pub fn nav_models(&self) -> Vec<NavModel> {
        let push_state = self.services.history.uses_push_state();
        let state = self.read();
        let current = state
            .current_instruction
            .as_ref()
            .map(|instruction| Arc::clone(&instruction.config));

        let mut models: Vec<NavModel> = state
            .tables
            .routes
            .iter()
            .enumerate()
            .filter_map(|(idx, config)| {
                let order = match config.nav {
                    NavSetting::Flag(false) => return None,
                    NavSetting::Flag(true) => FALLBACK_NAV_ORDER + idx as i32,
                    NavSetting::Order(order) => order,
                };
                Some(NavModel {
                    route: config.route.clone(),
                    name: config.name.clone(),
                    title: config.title.clone(),
                    href: config.href.clone().unwrap_or_else(|| {
                        utils::rooted_path(&config.route, &state.base_url, push_state)
                    }),
                    order,
                    is_active: current.as_ref().is_some_and(|c| Arc::ptr_eq(c, config)),
                })
            })
            .collect();
        models.sort_by_key(|model| model.order);
        models
    }

    // -----------------------------------------------------------------------
    // Instruction resolution
    // -----------------------------------------------------------------------

    /// Resolve `url` to an instruction at this level. Falls back to this
    /// router's unknown-route handler, then to the nearest ancestor's.
    pub fn create_navigation_instruction(
        self: &Arc<Self>,
        url: &str,
        parent_instruction: Option<&Arc<NavigationInstruction>>,
    ) -> Result<Arc<NavigationInstruction>, RouterError> {
        let (path, query) = utils::split_query(url);
        let fragment = utils::normalize_fragment(path);

        let (matched, unknown_route, compare_query_params) = {
            let state = self.read();
            (
                state.tables.recognize(url),
                state.unknown_route.clone(),
                state.options.compare_query_params,
            )
        };
        let init = |params: Params, query_params: Params, config: Arc<RouteConfig>, pattern: String| {
            InstructionInit {
                fragment: fragment.clone(),
                query_string: query.to_string(),
                params,
                query_params,
                config,
                matched_pattern: pattern,
                router: Arc::downgrade(self),
                parent_instruction: parent_instruction.cloned(),
                previous_instruction: None,
                parent_catch_handler: false,
                compare_query_params,
            }
        };

        if let Some(matched) = matched {
            let instruction = NavigationInstruction::new(init(
                matched.params,
                matched.query_params,
                matched.config,
                matched.pattern,
            ));
            inherit_base_url(&instruction, parent_instruction);
            return Ok(instruction);
        }

        if let Some(handler) = unknown_route {
            let config = Arc::new(handler.resolve(&fragment)?);
            tracing::debug!(%fragment, "resolved through unknown-route handler");
            let instruction = NavigationInstruction::new(init(
                unknown_params(&fragment),
                utils::parse_query_string(query),
                Arc::clone(&config),
                config.route.clone(),
            ));
            inherit_base_url(&instruction, parent_instruction);
            return Ok(instruction);
        }

        if !fragment.is_empty() {
            if let Some((catcher, handler)) = self.parent().and_then(|p| p.catch_all_router()) {
                let config = Arc::new(handler.resolve(&fragment)?);
                let parent = parent_instruction
                    .and_then(|p| instruction_for_router(p, &catcher))
                    .or_else(|| parent_instruction.cloned());
                tracing::debug!(%fragment, "resolved through an ancestor's unknown-route handler");
                return Ok(NavigationInstruction::new(InstructionInit {
                    router: Arc::downgrade(&catcher),
                    parent_instruction: parent,
                    parent_catch_handler: true,
                    compare_query_params: catcher.read().options.compare_query_params,
                    ..init(
                        unknown_params(&fragment),
                        utils::parse_query_string(query),
                        Arc::clone(&config),
                        config.route.clone(),
                    )
                }));
            }
        }

        Err(RouterError::RouteNotFound(url.to_string()))
    }

    /// Nearest router (this one or an ancestor) with an unknown-route handler.
    fn catch_all_router(self: Arc<Self>) -> Option<(Arc<Router>, UnknownRouteHandler)> {
        let mut router = self;
        loop {
            let handler = router.read().unknown_route.clone();
            if let Some(handler) = handler {
                return Some((router, handler));
            }
            router = router.parent()?;
        }
    }


    // -----------------------------------------------------------------------
    // Navigation API
    // -----------------------------------------------------------------------

    /// Navigate to a fragment, relative to this router's base URL unless
    /// absolute. Returns the queued navigation when the history triggered one.
    pub async fn navigate(
        self: &Arc<Self>,
        fragment: &str,
        options: &NavigationOptions,
    ) -> Result<Option<PendingNavigation>, RouterError> {
        let mut target = Arc::clone(self);
        while !target.is_configured() {
            match target.parent() {
                Some(parent) => target = parent,
                None => break,
            }
        }
        let url = utils::resolve_url(fragment, &target.base_url());
        tracing::debug!(%fragment, %url, trigger = options.trigger, replace = options.replace, "navigate");
        target.services.history.navigate(&url, options).await
    }

    /// Navigate to a named route.
    pub async fn navigate_to_route(
        self: &Arc<Self>,
        route: &str,
        params: &Params,
        options: &NavigationOptions,
    ) -> Result<Option<PendingNavigation>, RouterError> {
        let path = self.generate(route, params)?;
        self.navigate(&path, options).await
    }

    pub async fn navigate_back(&self) -> Result<Option<PendingNavigation>, RouterError> {
        self.services.history.navigate_back().await
    }

    /// Rooted URL for a named route (`#/…`, or `/…` with push state).
    /// Unknown names are looked up in the parent router.
    pub fn generate(&self, name: &str, params: &Params) -> Result<String, RouterError> {
        let generated = {
            let state = self.read();
            if state.tables.exact.has_route(name) {
                Some(
                    state
                        .tables
                        .exact
                        .generate(name, params)
                        .map(|path| (path, state.base_url.clone())),
                )
            } else {
                None
            }
        };
        match generated {
            Some(generated) => {
                let (path, base_url) = generated?;
                Ok(utils::rooted_path(
                    &path,
                    &base_url,
                    self.services.history.uses_push_state(),
                ))
            }
            None => match self.parent() {
                Some(parent) => parent.generate(name, params),
                None => Err(RouterError::UnknownRouteName(name.to_string())),
            },
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        f.debug_struct("Router")
            .field("root", &self.is_root())
            .field("routes", &state.tables.routes.len())
            .field("base_url", &state.base_url)
            .field(
                "current",
                &state
                    .current_instruction
                    .as_ref()
                    .map(|instruction| instruction.fragment.clone()),
            )
            .finish()
    }
}

fn unknown_params(fragment: &str) -> Params {
    [("path", fragment)].into_iter().collect()
}

/// A nested router's base is its parent's base plus the part of the parent
/// instruction's fragment it consumed. Recorded on the instruction and
/// applied to the router when the navigation commits.
fn inherit_base_url(
    instruction: &NavigationInstruction,
    parent_instruction: Option<&Arc<NavigationInstruction>>,
) {
    if let Some(parent) = parent_instruction {
        instruction.set_router_base_url(utils::join_fragments(
            &parent.router_base_url(),
            &parent.base_url(),
        ));
    }
}

/// Walk up from `instruction` to the one owned by `router`.
fn instruction_for_router(
    instruction: &Arc<NavigationInstruction>,
    router: &Arc<Router>,
) -> Option<Arc<NavigationInstruction>> {
    let mut current = Some(Arc::clone(instruction));
    while let Some(candidate) = current {
        if candidate
            .router()
            .is_ok_and(|owner| Arc::ptr_eq(&owner, router))
        {
            return Some(candidate);
        }
        current = candidate.parent_instruction();
    }
    None
}
