use serde::{Deserialize, Serialize};

/// What the hosting runtime can do.
///
/// Consulted once when the session and the realtime registry are built. A
/// server-side render pass has neither durable storage nor sockets: the
/// session resolves straight to "ready, unauthenticated" and subscriptions are
/// inert.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeCapabilities {
    pub has_persistent_storage: bool,
    pub has_network_sockets: bool,
}

impl RuntimeCapabilities {
    /// Interactive client runtime.
    pub const fn ui() -> Self {
        Self {
            has_persistent_storage: true,
            has_network_sockets: true,
        }
    }

    /// Server-side rendering pass.
    pub const fn server_render() -> Self {
        Self {
            has_persistent_storage: false,
            has_network_sockets: false,
        }
    }
}

impl Default for RuntimeCapabilities {
    fn default() -> Self {
        Self::ui()
    }
}
