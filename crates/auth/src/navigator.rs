//! Boundary to the client-side router.

/// Page routing as seen by the session layer.
pub trait Navigator: Send + Sync {
    /// Route currently displayed, if the router knows it.
    fn current_route(&self) -> Option<String>;

    /// Navigate to the login screen, remembering where the user was headed.
    fn redirect_to_login(&self, return_to: Option<&str>);
}

/// Navigator for headless runtimes; never navigates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn current_route(&self) -> Option<String> {
        None
    }

    fn redirect_to_login(&self, return_to: Option<&str>) {
        tracing::debug!(?return_to, "login redirect requested without a router");
    }
}
