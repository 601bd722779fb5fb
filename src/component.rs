//! Component boundary: lifecycle capabilities, loader and view ports.
//!
//! Components opt into each lifecycle callback by returning `Some(self)`
//! from the matching `as_*` accessor. A component that returns `None` is
//! skipped entirely for that callback.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream};
use futures::{FutureExt, StreamExt};

use crate::command::{NavigationCommand, Redirect, RedirectToRoute};
use crate::config::ComponentRef;
use crate::instruction::{LifecycleArgs, NavigationInstruction, ViewPortInstruction};
use crate::router::Router;
use crate::ActivationStrategy;

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// The normalized answer of a lifecycle callback.
pub enum Verdict {
    /// Keep going. Also what a callback with nothing to say returns.
    Allow,
    /// Refuse the navigation.
    Deny,
    /// The callback failed; refuses the navigation.
    Fail(anyhow::Error),
    /// Refuse (unless the command says to continue) and navigate elsewhere.
    Navigate(Arc<dyn NavigationCommand>),
}

impl Verdict {
    pub fn navigate(command: impl NavigationCommand + 'static) -> Self {
        Self::Navigate(Arc::new(command))
    }
}

impl fmt::Debug for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("Allow"),
            Self::Deny => f.write_str("Deny"),
            Self::Fail(err) => f.debug_tuple("Fail").field(err).finish(),
            Self::Navigate(command) => f.debug_tuple("Navigate").field(command).finish(),
        }
    }
}

impl From<bool> for Verdict {
    fn from(allowed: bool) -> Self {
        if allowed {
            Self::Allow
        } else {
            Self::Deny
        }
    }
}

impl From<()> for Verdict {
    fn from(_: ()) -> Self {
        Self::Allow
    }
}

/// `None` means the callback expressed no opinion.
impl From<Option<bool>> for Verdict {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Allow, Self::from)
    }
}

impl From<anyhow::Error> for Verdict {
    fn from(err: anyhow::Error) -> Self {
        Self::Fail(err)
    }
}

impl<T: Into<Verdict>> From<anyhow::Result<T>> for Verdict {
    fn from(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(err) => Self::Fail(err),
        }
    }
}

impl From<Redirect> for Verdict {
    fn from(command: Redirect) -> Self {
        Self::navigate(command)
    }
}

impl From<RedirectToRoute> for Verdict {
    fn from(command: RedirectToRoute) -> Self {
        Self::navigate(command)
    }
}

/// What a lifecycle callback hands back: a value now, a value later, or a
/// stream whose first item is the answer.
pub enum LifecycleOutcome {
    Ready(Verdict),
    Pending(BoxFuture<'static, Verdict>),
    Stream(BoxStream<'static, Verdict>),
}

impl LifecycleOutcome {
    pub fn ready(verdict: impl Into<Verdict>) -> Self {
        Self::Ready(verdict.into())
    }

    pub fn pending<F, V>(future: F) -> Self
    where
        F: Future<Output = V> + Send + 'static,
        V: Into<Verdict>,
    {
        Self::Pending(future.map(|value| -> Verdict { value.into() }).boxed())
    }

    pub fn stream<S, V>(stream: S) -> Self
    where
        S: Stream<Item = V> + Send + 'static,
        V: Into<Verdict>,
    {
        Self::Stream(stream.map(|value| -> Verdict { value.into() }).boxed())
    }

    /// Wait for the answer. A stream that ends without an item allows.
    pub async fn settle(self) -> Verdict {
        match self {
            Self::Ready(verdict) => verdict,
            Self::Pending(future) => future.await,
            Self::Stream(mut stream) => stream.next().await.unwrap_or(Verdict::Allow),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle capabilities
// ---------------------------------------------------------------------------

pub trait CanDeactivate: Send + Sync {
    fn can_deactivate(&self) -> LifecycleOutcome;
}

pub trait Deactivate: Send + Sync {
    fn deactivate(&self) -> LifecycleOutcome;
}

pub trait CanActivate: Send + Sync {
    fn can_activate(&self, args: &LifecycleArgs) -> LifecycleOutcome;
}

pub trait Activate: Send + Sync {
    fn activate(&self, args: &LifecycleArgs) -> LifecycleOutcome;
}

/// Lets a component pick its own activation strategy.
pub trait ActivationStrategyProvider: Send + Sync {
    fn determine_activation_strategy(&self, args: &LifecycleArgs) -> ActivationStrategy;
}

/// Whether a component decides its own activation strategy.
pub enum StrategyCapability<'a> {
    Default,
    Custom(&'a dyn ActivationStrategyProvider),
}

/// A view model that can be routed to.
pub trait RoutableComponent: Send + Sync {
    fn as_can_deactivate(&self) -> Option<&dyn CanDeactivate> {
        None
    }

    fn as_deactivate(&self) -> Option<&dyn Deactivate> {
        None
    }

    fn as_can_activate(&self) -> Option<&dyn CanActivate> {
        None
    }

    fn as_activate(&self) -> Option<&dyn Activate> {
        None
    }

    fn strategy_capability(&self) -> StrategyCapability<'_> {
        StrategyCapability::Default
    }
}

/// A loaded component: its view model and, for nested routing, its router.
#[derive(Clone)]
pub struct RouteComponent {
    pub view_model: Arc<dyn RoutableComponent>,
    pub child_router: Option<Arc<Router>>,
}

impl RouteComponent {
    pub fn new(view_model: Arc<dyn RoutableComponent>) -> Self {
        Self {
            view_model,
            child_router: None,
        }
    }

    pub fn with_child_router(mut self, router: Arc<Router>) -> Self {
        self.child_router = Some(router);
        self
    }

    /// A component with no lifecycle callbacks.
    pub fn inert() -> Self {
        Self::new(Arc::new(InertComponent))
    }
}

impl fmt::Debug for RouteComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteComponent")
            .field("child_router", &self.child_router.is_some())
            .finish()
    }
}

struct InertComponent;

impl RoutableComponent for InertComponent {}

// ---------------------------------------------------------------------------
// External collaborators
// ---------------------------------------------------------------------------

/// Loads a component for a view port. Construction and module loading live
/// outside the router.
#[async_trait]
pub trait ComponentLoader: Send + Sync {
    async fn load_component(
        &self,
        router: &Arc<Router>,
        instruction: &Arc<NavigationInstruction>,
        component: &ComponentRef,
    ) -> anyhow::Result<RouteComponent>;
}

/// A named rendering target.
#[async_trait]
pub trait ViewPort: Send + Sync {
    /// Prepare (and unless `defer_swap`, show) the instruction's component.
    async fn process(&self, instruction: &ViewPortInstruction, defer_swap: bool)
        -> anyhow::Result<()>;

    /// Show a component prepared by a deferred `process`.
    fn swap(&self, instruction: &ViewPortInstruction);
}

/// Loader that hands out inert components for every reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct InertLoader;

#[async_trait]
impl ComponentLoader for InertLoader {
    async fn load_component(
        &self,
        _router: &Arc<Router>,
        _instruction: &Arc<NavigationInstruction>,
        _component: &ComponentRef,
    ) -> anyhow::Result<RouteComponent> {
        Ok(RouteComponent::inert())
    }
}
