//! Navigation commands: values that, when returned from a lifecycle callback
//! or produced by a redirecting route, navigate somewhere else.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::history::NavigationOptions;
use crate::instruction::Params;
use crate::router::Router;
use crate::{utils, RouterError};

/// Something that can navigate a router.
///
/// Returned from a `can-` callback, a command refuses the current
/// navigation unless [`should_continue_processing`] says otherwise; either
/// way its own navigation is queued once the current attempt settles.
///
/// [`should_continue_processing`]: NavigationCommand::should_continue_processing
#[async_trait]
pub trait NavigationCommand: Send + Sync + fmt::Debug {
    fn should_continue_processing(&self) -> bool {
        false
    }

    /// Capture the router whose callback produced this command.
    fn set_router(&self, _router: &Arc<Router>) {}

    /// Queue the command's navigation. Does not wait for it to settle.
    async fn navigate(&self, app_router: &Arc<Router>) -> Result<(), RouterError>;
}

/// Navigation options used by redirects unless overridden.
fn redirect_options() -> NavigationOptions {
    NavigationOptions {
        trigger: true,
        replace: true,
        use_app_router: false,
    }
}

fn pick_router(
    captured: &Mutex<Option<Weak<Router>>>,
    app_router: &Arc<Router>,
    use_app_router: bool,
) -> Arc<Router> {
    if use_app_router {
        return Arc::clone(app_router);
    }
    captured
        .lock()
        .expect("command router poisoned")
        .as_ref()
        .and_then(Weak::upgrade)
        .unwrap_or_else(|| Arc::clone(app_router))
}

// ---------------------------------------------------------------------------
// Redirect
// ---------------------------------------------------------------------------

/// Navigate to a URL, relative to the capturing router unless absolute.
pub struct Redirect {
    url: String,
    options: NavigationOptions,
    continue_processing: bool,
    router: Mutex<Option<Weak<Router>>>,
    /// Base to resolve a relative `url` against instead of the router's
    /// committed one.
    base_url: Option<String>,
}

impl Redirect {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: redirect_options(),
            continue_processing: false,
            router: Mutex::new(None),
            base_url: None,
        }
    }

    pub fn with_options(mut self, options: NavigationOptions) -> Self {
        self.options = options;
        self
    }

    /// Let the current navigation proceed; the redirect still runs afterwards.
    pub fn continue_processing(mut self) -> Self {
        self.continue_processing = true;
        self
    }

    pub(crate) fn for_router(
        url: impl Into<String>,
        router: &Arc<Router>,
        base_url: String,
    ) -> Self {
        let mut redirect = Self::new(url);
        redirect.base_url = Some(base_url);
        *redirect.router.lock().expect("command router poisoned") = Some(Arc::downgrade(router));
        redirect
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &NavigationOptions {
        &self.options
    }
}

impl fmt::Debug for Redirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Redirect")
            .field("url", &self.url)
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl NavigationCommand for Redirect {
    fn should_continue_processing(&self) -> bool {
        self.continue_processing
    }

    fn set_router(&self, router: &Arc<Router>) {
        *self.router.lock().expect("command router poisoned") = Some(Arc::downgrade(router));
    }

    async fn navigate(&self, app_router: &Arc<Router>) -> Result<(), RouterError> {
        let router = pick_router(&self.router, app_router, self.options.use_app_router);
        let url = match &self.base_url {
            Some(base) if !self.options.use_app_router => {
                format!("/{}", utils::resolve_url(&self.url, base))
            }
            _ => self.url.clone(),
        };
        router.navigate(&url, &self.options).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RedirectToRoute
// ---------------------------------------------------------------------------

/// Navigate to a named route.
pub struct RedirectToRoute {
    route: String,
    params: Params,
    options: NavigationOptions,
    router: Mutex<Option<Weak<Router>>>,
}

impl RedirectToRoute {
    pub fn new(route: impl Into<String>, params: Params) -> Self {
        Self {
            route: route.into(),
            params,
            options: redirect_options(),
            router: Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: NavigationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }
}

impl fmt::Debug for RedirectToRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectToRoute")
            .field("route", &self.route)
            .field("params", &self.params)
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl NavigationCommand for RedirectToRoute {
    fn set_router(&self, router: &Arc<Router>) {
        *self.router.lock().expect("command router poisoned") = Some(Arc::downgrade(router));
    }

    async fn navigate(&self, app_router: &Arc<Router>) -> Result<(), RouterError> {
        let router = pick_router(&self.router, app_router, self.options.use_app_router);
        router
            .navigate_to_route(&self.route, &self.params, &self.options)
            .await?;
        Ok(())
    }
}
