//! Route and router configuration.
//!
//! Everything here except deferred component resolvers, unknown-route
//! resolvers and pipeline steps can be loaded from JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Deserializer, Serialize};

use crate::pipeline::{PipelineStep, SlotName};
use crate::{ActivationStrategy, RouterError, DEFAULT_VIEW_PORT};

// ---------------------------------------------------------------------------
// Component references
// ---------------------------------------------------------------------------

/// The resolved target of a deferred component reference.
///
/// Identity is pointer identity: two resolvers returning the same
/// `Arc<ComponentModule>` name the same component.
#[derive(Debug)]
pub struct ComponentModule {
    pub id: String,
}

impl ComponentModule {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id: id.into() })
    }
}

/// Async factory producing a component module on demand.
pub type ModuleResolver =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Arc<ComponentModule>>> + Send + Sync>;

/// How a view port names its component: either a static module id or a
/// deferred resolver. Exactly one is always present.
#[derive(Clone)]
pub enum ComponentRef {
    Id(String),
    Deferred(ModuleResolver),
}

impl ComponentRef {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    /// Wrap an async factory as a deferred reference.
    pub fn deferred<F, Fut>(resolver: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Arc<ComponentModule>>> + Send + 'static,
    {
        Self::Deferred(Arc::new(move || resolver().boxed()))
    }

    /// Canonicalize for identity comparison. Deferred resolvers are invoked.
    pub async fn resolve(&self) -> anyhow::Result<ComponentIdentity> {
        match self {
            Self::Id(id) => Ok(ComponentIdentity::Id(id.clone())),
            Self::Deferred(resolver) => Ok(ComponentIdentity::Module(resolver().await?)),
        }
    }

    /// A readable label for logs and reports.
    pub fn label(&self) -> String {
        match self {
            Self::Id(id) => id.clone(),
            Self::Deferred(_) => "<deferred>".to_string(),
        }
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => f.debug_tuple("Id").field(id).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for ComponentRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ComponentRef::Id)
    }
}

/// Canonical component identity used by the plan builder.
#[derive(Debug, Clone)]
pub enum ComponentIdentity {
    Id(String),
    Module(Arc<ComponentModule>),
}

impl PartialEq for ComponentIdentity {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Id(a), Self::Id(b)) => a == b,
            (Self::Module(a), Self::Module(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for ComponentIdentity {}

// ---------------------------------------------------------------------------
// RouteConfig
// ---------------------------------------------------------------------------

/// Per-slot component configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ViewPortConfig {
    #[serde(default)]
    pub module_id: Option<ComponentRef>,
}

impl ViewPortConfig {
    pub fn new(component: ComponentRef) -> Self {
        Self {
            module_id: Some(component),
        }
    }

    /// A slot that deliberately names no component (the router's view port
    /// default fills it in).
    pub fn empty() -> Self {
        Self { module_id: None }
    }
}

/// Whether a route appears in the navigation menu, optionally with an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NavSetting {
    Flag(bool),
    Order(i32),
}

impl Default for NavSetting {
    fn default() -> Self {
        Self::Flag(false)
    }
}

/// Static configuration of one route.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteConfig {
    /// Route pattern: `users/:id`, `files/*path`, `posts/:slug?`.
    pub route: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Shorthand for a single `default` view port.
    #[serde(default)]
    pub module_id: Option<ComponentRef>,
    #[serde(default)]
    pub view_ports: BTreeMap<String, ViewPortConfig>,
    /// Redirect target pattern. `:name` segments link through to the
    /// matched route's params.
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub activation_strategy: Option<ActivationStrategy>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub nav: NavSetting,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl RouteConfig {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(ComponentRef::Id(module_id.into()));
        self
    }

    pub fn with_component(mut self, component: ComponentRef) -> Self {
        self.module_id = Some(component);
        self
    }

    pub fn with_view_port(mut self, name: impl Into<String>, config: ViewPortConfig) -> Self {
        self.view_ports.insert(name.into(), config);
        self
    }

    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect = Some(target.into());
        self
    }

    pub fn with_activation_strategy(mut self, strategy: ActivationStrategy) -> Self {
        self.activation_strategy = Some(strategy);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_nav(mut self, nav: NavSetting) -> Self {
        self.nav = nav;
        self
    }

    pub fn is_redirect(&self) -> bool {
        self.redirect.is_some()
    }

    /// Validate and fold `module_id` into the `default` view port.
    pub fn normalize(mut self) -> Result<Self, RouterError> {
        if self.route.contains("//") {
            return Err(RouterError::InvalidRouteConfig(format!(
                "route `{}` contains an empty segment",
                self.route
            )));
        }
        if let Some(module) = self.module_id.take() {
            if self.view_ports.contains_key(DEFAULT_VIEW_PORT) {
                return Err(RouterError::InvalidRouteConfig(format!(
                    "route `{}` declares both moduleId and a `{}` view port",
                    self.route, DEFAULT_VIEW_PORT
                )));
            }
            self.view_ports
                .insert(DEFAULT_VIEW_PORT.to_string(), ViewPortConfig::new(module));
        }
        if self.redirect.is_none() && self.view_ports.is_empty() {
            return Err(RouterError::InvalidRouteConfig(format!(
                "route `{}` must specify a moduleId, viewPorts or redirect",
                self.route
            )));
        }
        if self.redirect.is_some() && !self.view_ports.is_empty() {
            return Err(RouterError::InvalidRouteConfig(format!(
                "redirecting route `{}` cannot declare view ports",
                self.route
            )));
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Unknown routes
// ---------------------------------------------------------------------------

/// Catch-all consulted when no route matches a fragment.
#[derive(Clone)]
pub enum UnknownRouteHandler {
    /// Render this component for every unmatched fragment.
    Module(ComponentRef),
    /// Use this config for every unmatched fragment.
    Config(RouteConfig),
    /// Compute a config from the unmatched fragment.
    Resolver(Arc<dyn Fn(&str) -> anyhow::Result<RouteConfig> + Send + Sync>),
}

impl UnknownRouteHandler {
    /// Produce the normalized config for an unmatched fragment.
    pub fn resolve(&self, fragment: &str) -> Result<RouteConfig, RouterError> {
        let config = match self {
            Self::Module(component) => {
                RouteConfig::new(fragment).with_component(component.clone())
            }
            Self::Config(config) => {
                let mut config = config.clone();
                config.route = fragment.to_string();
                config
            }
            Self::Resolver(resolve) => resolve(fragment)?,
        };
        config.normalize()
    }
}

impl fmt::Debug for UnknownRouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(component) => f.debug_tuple("Module").field(component).finish(),
            Self::Config(config) => f.debug_tuple("Config").field(&config.route).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// RouterOptions
// ---------------------------------------------------------------------------

/// Behavioral switches for a router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RouterOptions {
    /// Treat query-param changes as parameter changes when diffing.
    /// Ignored by default.
    pub compare_query_params: bool,
    /// Attempts allowed per navigation before giving up.
    pub max_instruction_count: usize,
    /// Use `/path` URLs instead of `#/path`.
    pub push_state: bool,
    /// Application root handed to the history backend.
    pub root: String,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            compare_query_params: false,
            max_instruction_count: 10,
            push_state: false,
            root: "/".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// RouterConfiguration
// ---------------------------------------------------------------------------

/// Everything a router needs to be configured in one value.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouterConfiguration {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub options: RouterOptions,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Navigated to when a navigation fails and there is no previous
    /// location to restore.
    #[serde(default)]
    pub fallback_route: Option<String>,
    /// Components used for slots whose config names no component.
    #[serde(default)]
    pub view_port_defaults: BTreeMap<String, ViewPortConfig>,
    #[serde(skip)]
    pub unknown_route: Option<UnknownRouteHandler>,
    #[serde(skip)]
    pub pipeline_steps: Vec<(SlotName, Arc<dyn PipelineStep>)>,
}

impl RouterConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, RouterError> {
        serde_json::from_str(json).map_err(|e| RouterError::InvalidRouteConfig(e.to_string()))
    }

    pub fn map(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    pub fn map_unknown_routes(mut self, handler: UnknownRouteHandler) -> Self {
        self.unknown_route = Some(handler);
        self
    }

    pub fn fallback_route(mut self, fragment: impl Into<String>) -> Self {
        self.fallback_route = Some(fragment.into());
        self
    }

    pub fn use_view_port_defaults(mut self, defaults: BTreeMap<String, ViewPortConfig>) -> Self {
        self.view_port_defaults = defaults;
        self
    }

    pub fn with_options(mut self, options: RouterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn add_pipeline_step(mut self, slot: SlotName, step: Arc<dyn PipelineStep>) -> Self {
        self.pipeline_steps.push((slot, step));
        self
    }

    pub fn add_authorize_step(self, step: Arc<dyn PipelineStep>) -> Self {
        self.add_pipeline_step(SlotName::Authorize, step)
    }

    pub fn add_pre_activate_step(self, step: Arc<dyn PipelineStep>) -> Self {
        self.add_pipeline_step(SlotName::PreActivate, step)
    }

    pub fn add_pre_render_step(self, step: Arc<dyn PipelineStep>) -> Self {
        self.add_pipeline_step(SlotName::PreRender, step)
    }

    pub fn add_post_render_step(self, step: Arc<dyn PipelineStep>) -> Self {
        self.add_pipeline_step(SlotName::PostRender, step)
    }
}

impl fmt::Debug for RouterConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterConfiguration")
            .field("title", &self.title)
            .field("options", &self.options)
            .field("routes", &self.routes.len())
            .field("fallback_route", &self.fallback_route)
            .field("unknown_route", &self.unknown_route)
            .field("pipeline_steps", &self.pipeline_steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_id_folds_into_default_view_port() {
        let config = RouteConfig::new("users/:id").with_module("users").normalize().unwrap();
        assert!(config.module_id.is_none());
        assert!(config.view_ports.contains_key(DEFAULT_VIEW_PORT));
    }

    #[test]
    fn config_without_target_is_rejected() {
        let err = RouteConfig::new("empty").normalize().unwrap_err();
        assert!(matches!(err, RouterError::InvalidRouteConfig(_)));
    }

    #[test]
    fn redirect_with_view_ports_is_rejected() {
        let err = RouteConfig::new("a")
            .with_redirect("b")
            .with_module("a")
            .normalize()
            .unwrap_err();
        assert!(matches!(err, RouterError::InvalidRouteConfig(_)));
    }

    #[test]
    fn options_default_ignores_query_params() {
        let options = RouterOptions::default();
        assert!(!options.compare_query_params);
        assert_eq!(options.max_instruction_count, 10);
    }

    #[test]
    fn configuration_parses_from_json() {
        let config = RouterConfiguration::from_json_str(
            r#"{
                "options": { "compareQueryParams": true },
                "fallbackRoute": "home",
                "routes": [
                    { "route": "", "moduleId": "home", "nav": 1 },
                    { "route": "old", "redirect": "" },
                    { "route": "users/:id", "viewPorts": { "left": { "moduleId": "list" } },
                      "activationStrategy": "replace" }
                ]
            }"#,
        )
        .unwrap();
        assert!(config.options.compare_query_params);
        assert_eq!(config.routes.len(), 3);
        assert_eq!(config.routes[0].nav, NavSetting::Order(1));
        assert_eq!(
            config.routes[2].activation_strategy,
            Some(ActivationStrategy::Replace)
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(RouterConfiguration::from_json_str(r#"{ "routs": [] }"#).is_err());
    }

    #[tokio::test]
    async fn deferred_resolvers_compare_by_target() {
        let module = ComponentModule::new("shared");
        let a = {
            let module = module.clone();
            ComponentRef::deferred(move || {
                let module = module.clone();
                async move { Ok(module) }
            })
        };
        let b = {
            let module = module.clone();
            ComponentRef::deferred(move || {
                let module = module.clone();
                async move { Ok(module) }
            })
        };
        let other = ComponentRef::deferred(|| async { Ok(ComponentModule::new("shared")) });

        assert_eq!(a.resolve().await.unwrap(), b.resolve().await.unwrap());
        assert_ne!(a.resolve().await.unwrap(), other.resolve().await.unwrap());
        assert_ne!(
            ComponentRef::id("shared").resolve().await.unwrap(),
            a.resolve().await.unwrap()
        );
    }
}
