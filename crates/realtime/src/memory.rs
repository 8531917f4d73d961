//! In-process broker for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RealtimeError;
use crate::link::{BrokerLink, Connector, InboundMessage, SubscriptionId};

/// Topic-based pub/sub broker living in the current process.
///
/// - Every `connect` opens an independent session
/// - `drop_connections` simulates a network blip (sessions end, clients
///   must reconnect and resubscribe)
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerState>>,
}

struct BrokerState {
    available: bool,
    attempts: usize,
    connects: usize,
    next_session: u64,
    sessions: HashMap<u64, Session>,
}

struct Session {
    outbox: mpsc::UnboundedSender<InboundMessage>,
    subscriptions: HashMap<SubscriptionId, String>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerState {
                available: true,
                attempts: 0,
                connects: 0,
                next_session: 0,
                sessions: HashMap::new(),
            })),
        }
    }

    /// Deliver `body` to every live subscription on `topic`; returns the
    /// number of deliveries.
    pub fn publish(&self, topic: &str, body: impl Into<String>) -> usize {
        let body = body.into();
        let state = self.state();

        let mut delivered = 0;
        for session in state.sessions.values() {
            for (id, subscribed) in &session.subscriptions {
                if subscribed != topic {
                    continue;
                }
                let message = InboundMessage {
                    subscription: id.clone(),
                    destination: topic.to_string(),
                    body: body.clone(),
                };
                if session.outbox.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// End every open session, as if the network dropped.
    pub fn drop_connections(&self) {
        let dropped = std::mem::take(&mut self.state().sessions);
        tracing::debug!(sessions = dropped.len(), "memory broker dropped all sessions");
    }

    /// Refuse (or accept again) new sessions.
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Connect attempts so far, refused ones included.
    pub fn attempt_count(&self) -> usize {
        self.state().attempts
    }

    pub fn connection_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Live subscriptions across all sessions.
    pub fn subscription_count(&self) -> usize {
        self.state()
            .sessions
            .values()
            .map(|s| s.subscriptions.len())
            .sum()
    }

    /// Live subscriptions on one topic.
    pub fn topic_subscribers(&self, topic: &str) -> usize {
        self.state()
            .sessions
            .values()
            .flat_map(|s| s.subscriptions.values())
            .filter(|t| *t == topic)
            .count()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerLink>, RealtimeError> {
        let mut state = self.state();
        state.attempts += 1;
        if !state.available {
            return Err(RealtimeError::Unavailable);
        }

        let (outbox, inbox) = mpsc::unbounded_channel();
        let session = state.next_session;
        state.next_session += 1;
        state.connects += 1;
        state.sessions.insert(
            session,
            Session {
                outbox,
                subscriptions: HashMap::new(),
            },
        );

        Ok(Box::new(MemoryLink {
            broker: self.clone(),
            session,
            inbox,
        }))
    }
}

struct MemoryLink {
    broker: MemoryBroker,
    session: u64,
    inbox: mpsc::UnboundedReceiver<InboundMessage>,
}

impl MemoryLink {
    fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> T) -> Result<T, RealtimeError> {
        let mut state = self.broker.state();
        state
            .sessions
            .get_mut(&self.session)
            .map(f)
            .ok_or(RealtimeError::Closed)
    }
}

#[async_trait]
impl BrokerLink for MemoryLink {
    async fn subscribe(&mut self, id: &SubscriptionId, topic: &str) -> Result<(), RealtimeError> {
        self.with_session(|s| {
            s.subscriptions.insert(id.clone(), topic.to_string());
        })
    }

    async fn unsubscribe(&mut self, id: &SubscriptionId) -> Result<(), RealtimeError> {
        self.with_session(|s| {
            s.subscriptions.remove(id);
        })
    }

    async fn next_message(&mut self) -> Option<Result<InboundMessage, RealtimeError>> {
        self.inbox.recv().await.map(Ok)
    }

    async fn heartbeat(&mut self) -> Result<(), RealtimeError> {
        self.with_session(|_| ())
    }

    async fn close(&mut self) {
        self.broker.state().sessions.remove(&self.session);
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.broker.state().sessions.remove(&self.session);
    }
}
