//! `storefront-realtime`: topic subscriptions over a STOMP broker.
//!
//! - `frame`: STOMP 1.2 text codec
//! - `link`: transport seam (`Connector` / `BrokerLink`)
//! - `stomp`: WebSocket connector
//! - `memory`: in-process broker for tests/dev
//! - `connection`: auto-reconnecting driver task
//! - `registry`: subscriptions, replayed on every reconnect

pub mod connection;
pub mod error;
pub mod frame;
pub mod link;
pub mod memory;
pub mod registry;
pub mod stomp;

pub use connection::{ConnectionState, ReconnectPolicy};
pub use error::RealtimeError;
pub use frame::{Command, Frame, FrameError};
pub use link::{BrokerLink, Connector, InboundMessage, SubscriptionId};
pub use memory::MemoryBroker;
pub use registry::{Subscription, SubscriptionRegistry};
pub use stomp::{StompConnector, TokenSource};
