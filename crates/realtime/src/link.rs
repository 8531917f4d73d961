//! Transport seam between the connection driver and a concrete broker.

use std::fmt;

use async_trait::async_trait;

use crate::error::RealtimeError;

/// Broker-side subscription id (`sub-<n>`), unique per registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(n: u64) -> Self {
        Self(format!("sub-{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A payload delivered by the broker for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub subscription: SubscriptionId,
    pub destination: String,
    pub body: String,
}

/// One open broker session.
///
/// `next_message` must be cancel-safe: the driver polls it inside
/// `tokio::select!` alongside its command queue.
#[async_trait]
pub trait BrokerLink: Send {
    async fn subscribe(&mut self, id: &SubscriptionId, topic: &str) -> Result<(), RealtimeError>;

    async fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<(), RealtimeError>;

    /// `None` once the broker closed the session.
    async fn next_message(&mut self) -> Option<Result<InboundMessage, RealtimeError>>;

    async fn heartbeat(&mut self) -> Result<(), RealtimeError>;

    /// Best-effort graceful close.
    async fn close(&mut self);
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerLink>, RealtimeError>;
}
