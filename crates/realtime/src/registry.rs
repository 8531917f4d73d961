//! Subscription registry.
//!
//! Entries live in an arena keyed by a stable id, in registration order.
//! An entry is either pending (no broker handle) or attached (live handle).
//! Every time the connection opens, all entries get a fresh handle and are
//! attached again; handles from the previous link are discarded first, so a
//! reconnect never duplicates or loses a subscription.
//!
//! `cancel` removes the entry; when the last entry goes, the connection is
//! torn down.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;

use storefront_core::{ClientConfig, RuntimeCapabilities};

use crate::connection::{ChannelConnection, ConnectionEvents, ConnectionState, LinkCommand, ReconnectPolicy};
use crate::link::{Connector, InboundMessage, SubscriptionId};
use crate::stomp::{StompConnector, TokenSource};

type Handler = Arc<dyn Fn(Value) + Send + Sync>;

struct Entry {
    topic: String,
    handler: Handler,
    handle: Option<SubscriptionId>,
}

struct RegistryState {
    entries: BTreeMap<u64, Entry>,
    routes: HashMap<SubscriptionId, u64>,
    state: ConnectionState,
    generation: u64,
    connection: Option<ChannelConnection>,
    next_entry: u64,
    next_handle: u64,
    next_connection: u64,
}

impl RegistryState {
    fn allocate_handle(&mut self) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_handle);
        self.next_handle += 1;
        id
    }

    fn is_current(&self, connection: u64) -> bool {
        self.connection.as_ref().is_some_and(|c| c.id() == connection)
    }

    fn detach_all(&mut self) {
        self.routes.clear();
        for entry in self.entries.values_mut() {
            entry.handle = None;
        }
    }
}

struct Shared {
    me: Weak<Shared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    runtime: Option<Handle>,
    state: Mutex<RegistryState>,
}

/// Topic subscriptions over one auto-reconnecting broker connection.
///
/// Cheap to clone; clones share the same connection and entries.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    shared: Arc<Shared>,
}

impl SubscriptionRegistry {
    /// Build the registry and, when the runtime has network sockets, open
    /// the connection right away.
    ///
    /// Without sockets (server-side render) or outside a tokio runtime no
    /// transport is ever opened and `subscribe` returns inert handles.
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        capabilities: RuntimeCapabilities,
    ) -> Self {
        let runtime = if capabilities.has_network_sockets {
            match Handle::try_current() {
                Ok(handle) => Some(handle),
                Err(_) => {
                    tracing::warn!("no async runtime available; realtime channel disabled");
                    None
                }
            }
        } else {
            None
        };

        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            connector,
            policy,
            runtime,
            state: Mutex::new(RegistryState {
                entries: BTreeMap::new(),
                routes: HashMap::new(),
                state: ConnectionState::Disconnected,
                generation: 0,
                connection: None,
                next_entry: 0,
                next_handle: 0,
                next_connection: 0,
            }),
        });

        {
            let mut state = shared.lock();
            shared.open_connection(&mut state);
        }
        Self { shared }
    }

    /// STOMP-over-WebSocket registry for `config.realtime_url`.
    pub fn from_config(
        config: &ClientConfig,
        capabilities: RuntimeCapabilities,
        token: Option<TokenSource>,
    ) -> Self {
        let connector = StompConnector::new(config);
        let connector = match token {
            Some(token) => connector.with_token_source(token),
            None => connector,
        };
        Self::new(
            Arc::new(connector),
            ReconnectPolicy::from_config(config),
            capabilities,
        )
    }

    /// Register `handler` for JSON payloads published on `topic`.
    ///
    /// Attached immediately when the connection is open; otherwise attached
    /// as soon as it opens.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if self.shared.runtime.is_none() {
            tracing::debug!(topic, "realtime disabled; subscription is inert");
            return Subscription::inert();
        }

        let mut state = self.shared.lock();
        let entry_id = state.next_entry;
        state.next_entry += 1;

        let mut entry = Entry {
            topic: topic.to_string(),
            handler: Arc::new(handler),
            handle: None,
        };

        if state.connection.is_none() {
            self.shared.open_connection(&mut state);
        }

        if state.state == ConnectionState::Connected {
            let handle = state.allocate_handle();
            state.routes.insert(handle.clone(), entry_id);
            entry.handle = Some(handle.clone());
            let command = LinkCommand::Attach {
                generation: state.generation,
                id: handle,
                topic: topic.to_string(),
            };
            if let Some(connection) = &state.connection {
                connection.send(command);
            }
        } else {
            tracing::debug!(topic, "channel not open yet; subscription pending");
        }

        state.entries.insert(entry_id, entry);
        drop(state);

        Subscription {
            registry: Arc::downgrade(&self.shared),
            entry: entry_id,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Like [`SubscriptionRegistry::subscribe`], decoding each payload into
    /// `T`. Payloads of a different shape are logged and dropped.
    pub fn subscribe_json<T, F>(&self, topic: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = topic.to_string();
        self.subscribe(topic, move |value| match serde_json::from_value::<T>(value) {
            Ok(payload) => handler(payload),
            Err(e) => tracing::warn!(topic = %name, error = %e, "unexpected payload shape; dropped"),
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Registered (not cancelled) subscriptions.
    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("state", &state.state)
            .field("entries", &state.entries.len())
            .field("generation", &state.generation)
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_connection(&self, state: &mut RegistryState) {
        let Some(runtime) = &self.runtime else { return };

        let id = state.next_connection;
        state.next_connection += 1;
        let events: Weak<dyn ConnectionEvents> = self.me.clone();
        state.connection = Some(ChannelConnection::open(
            runtime,
            id,
            self.connector.clone(),
            self.policy.clone(),
            events,
        ));
        state.state = ConnectionState::Connecting;
    }

    fn cancel(&self, entry_id: u64) {
        let mut state = self.lock();
        let Some(entry) = state.entries.remove(&entry_id) else { return };

        if let Some(handle) = &entry.handle {
            state.routes.remove(handle);
            if state.state == ConnectionState::Connected {
                let command = LinkCommand::Detach {
                    generation: state.generation,
                    id: handle.clone(),
                };
                if let Some(connection) = &state.connection {
                    connection.send(command);
                }
            }
        }
        tracing::debug!(topic = %entry.topic, "subscription cancelled");

        if state.entries.is_empty() {
            if let Some(connection) = state.connection.take() {
                connection.shutdown();
                tracing::info!("no subscriptions left; closing realtime channel");
            }
            state.state = ConnectionState::Disconnected;
            state.detach_all();
        }
        drop(state);
        // Handler (and whatever it captured) is released outside the lock.
        drop(entry);
    }
}

impl ConnectionEvents for Shared {
    fn on_connecting(&self, connection: u64) {
        let mut state = self.lock();
        if state.is_current(connection) {
            state.state = ConnectionState::Connecting;
        }
    }

    fn on_open(&self, connection: u64) -> (u64, Vec<(SubscriptionId, String)>) {
        let mut state = self.lock();
        if !state.is_current(connection) {
            return (0, Vec::new());
        }

        state.generation += 1;
        state.state = ConnectionState::Connected;
        state.detach_all();

        let ids: Vec<u64> = state.entries.keys().copied().collect();
        let mut attach = Vec::with_capacity(ids.len());
        for entry_id in ids {
            let handle = state.allocate_handle();
            state.routes.insert(handle.clone(), entry_id);
            if let Some(entry) = state.entries.get_mut(&entry_id) {
                entry.handle = Some(handle.clone());
                attach.push((handle, entry.topic.clone()));
            }
        }
        (state.generation, attach)
    }

    fn on_close(&self, connection: u64) {
        let mut state = self.lock();
        if state.is_current(connection) {
            state.state = ConnectionState::Disconnected;
            state.detach_all();
        }
    }

    fn on_stopped(&self, connection: u64) {
        let mut state = self.lock();
        if state.is_current(connection) {
            state.connection = None;
            state.state = ConnectionState::Disconnected;
            state.detach_all();
        }
    }

    fn deliver(&self, message: InboundMessage) {
        let (topic, handler) = {
            let state = self.lock();
            let Some(entry) = state
                .routes
                .get(&message.subscription)
                .and_then(|entry_id| state.entries.get(entry_id))
            else {
                tracing::debug!(subscription = %message.subscription, "message for a detached subscription; dropped");
                return;
            };
            (entry.topic.clone(), entry.handler.clone())
        };

        let payload = match serde_json::from_str::<Value>(&message.body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%topic, error = %e, "malformed realtime payload; dropped");
                return;
            }
        };
        // A panicking handler must not take the shared driver down with it.
        if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            tracing::error!(%topic, "subscription handler panicked; message dropped");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = state.connection.take() {
            connection.shutdown();
        }
    }
}

/// Returned by [`SubscriptionRegistry::subscribe`].
///
/// Dropping it does **not** cancel the subscription.
#[must_use = "keep the Subscription to be able to cancel it"]
pub struct Subscription {
    registry: Weak<Shared>,
    entry: u64,
    cancelled: AtomicBool,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            registry: Weak::new(),
            entry: 0,
            cancelled: AtomicBool::new(true),
        }
    }

    /// Stop delivery and remove the entry. Idempotent; safe to call from
    /// inside the subscription's own handler.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.cancel(self.entry);
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst) && self.registry.strong_count() > 0
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("entry", &self.entry)
            .field("active", &self.is_active())
            .finish()
    }
}
