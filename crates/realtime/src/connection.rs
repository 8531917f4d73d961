//! Channel connection driver.
//!
//! One background task per connection owns the broker link. It connects,
//! asks the registry for every subscription to (re)attach, then multiplexes
//! registry commands, inbound messages and heart-beats until the link drops.
//! After an unexpected close it waits `reconnect_delay` and starts over.
//!
//! The driver holds only a `Weak` reference to the registry: dropping the
//! registry (or its connection handle) stops the task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use storefront_core::ClientConfig;

use crate::link::{BrokerLink, Connector, InboundMessage, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Fixed wait between connection attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed connects before giving up (0 = never give up).
    pub max_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
            heartbeat_interval: config.heartbeat_interval,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

#[derive(Debug)]
pub(crate) enum LinkCommand {
    Attach {
        generation: u64,
        id: SubscriptionId,
        topic: String,
    },
    Detach {
        generation: u64,
        id: SubscriptionId,
    },
    Shutdown,
}

/// Callbacks from the driver into the registry. `connection` identifies the
/// driver so callbacks from a superseded connection can be ignored.
pub(crate) trait ConnectionEvents: Send + Sync {
    fn on_connecting(&self, connection: u64);

    /// Link is up. Returns the new link generation and every subscription to
    /// attach, in registration order.
    fn on_open(&self, connection: u64) -> (u64, Vec<(SubscriptionId, String)>);

    fn on_close(&self, connection: u64);

    /// The driver gave up (attempt limit) or was shut down.
    fn on_stopped(&self, connection: u64);

    fn deliver(&self, message: InboundMessage);
}

/// Handle to a running driver task.
pub(crate) struct ChannelConnection {
    id: u64,
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl ChannelConnection {
    pub(crate) fn open(
        runtime: &Handle,
        id: u64,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        events: Weak<dyn ConnectionEvents>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(drive(id, connector, policy, events, rx));
        Self { id, commands }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn send(&self, command: LinkCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!(connection = self.id, "realtime driver already stopped");
        }
    }

    pub(crate) fn shutdown(&self) {
        self.send(LinkCommand::Shutdown);
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

async fn drive(
    id: u64,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    events: Weak<dyn ConnectionEvents>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let mut failures = 0u32;

    loop {
        let Some(registry) = events.upgrade() else { break };
        registry.on_connecting(id);
        drop(registry);

        let connected = tokio::select! {
            result = connector.connect() => result,
            _ = until_shutdown(&mut commands) => break,
        };

        match connected {
            Ok(mut link) => {
                failures = 0;
                let Some(registry) = events.upgrade() else {
                    link.close().await;
                    break;
                };
                let (generation, entries) = registry.on_open(id);
                drop(registry);
                tracing::info!(connection = id, generation, subscriptions = entries.len(), "realtime channel open");

                match run_session(link.as_mut(), generation, entries, &policy, &events, &mut commands).await {
                    SessionEnd::Shutdown => {
                        link.close().await;
                        break;
                    }
                    SessionEnd::Lost(reason) => {
                        tracing::warn!(connection = id, %reason, "realtime channel lost");
                        if let Some(registry) = events.upgrade() {
                            registry.on_close(id);
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(connection = id, attempt = failures, error = %e, "realtime connect failed");
                if let Some(registry) = events.upgrade() {
                    registry.on_close(id);
                }
                if policy.max_attempts > 0 && failures >= policy.max_attempts {
                    tracing::error!(
                        connection = id,
                        max_attempts = policy.max_attempts,
                        "giving up on realtime channel"
                    );
                    break;
                }
            }
        }

        tracing::info!(connection = id, delay = ?policy.reconnect_delay, "reconnecting realtime channel");
        tokio::select! {
            _ = tokio::time::sleep(policy.reconnect_delay) => {}
            _ = until_shutdown(&mut commands) => break,
        }
    }

    if let Some(registry) = events.upgrade() {
        registry.on_stopped(id);
    }
    tracing::debug!(connection = id, "realtime driver stopped");
}

async fn run_session(
    link: &mut dyn BrokerLink,
    generation: u64,
    entries: Vec<(SubscriptionId, String)>,
    policy: &ReconnectPolicy,
    events: &Weak<dyn ConnectionEvents>,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
) -> SessionEnd {
    for (id, topic) in entries {
        if let Err(e) = link.subscribe(&id, &topic).await {
            return SessionEnd::Lost(e.to_string());
        }
        tracing::debug!(%id, %topic, generation, "subscription attached");
    }

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + policy.heartbeat_interval,
        policy.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None | Some(LinkCommand::Shutdown) => return SessionEnd::Shutdown,
                Some(LinkCommand::Attach { generation: g, id, topic }) if g == generation => {
                    if let Err(e) = link.subscribe(&id, &topic).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                    tracing::debug!(%id, %topic, generation, "subscription attached");
                }
                Some(LinkCommand::Detach { generation: g, id }) if g == generation => {
                    if let Err(e) = link.unsubscribe(&id).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                    tracing::debug!(%id, generation, "subscription detached");
                }
                Some(stale) => tracing::debug!(?stale, generation, "dropping command for a previous link"),
            },
            message = link.next_message() => match message {
                Some(Ok(message)) => match events.upgrade() {
                    Some(registry) => registry.deliver(message),
                    None => return SessionEnd::Shutdown,
                },
                Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                None => return SessionEnd::Lost("closed by broker".to_string()),
            },
            _ = heartbeat.tick() => {
                if let Err(e) = link.heartbeat().await {
                    return SessionEnd::Lost(e.to_string());
                }
            }
        }
    }
}

/// Resolves on `Shutdown` or once every sender is gone. Commands arriving
/// while no link is open target a dead generation and are discarded.
async fn until_shutdown(commands: &mut mpsc::UnboundedReceiver<LinkCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            LinkCommand::Shutdown => return,
            stale => tracing::debug!(?stale, "no open link; dropping command"),
        }
    }
}
