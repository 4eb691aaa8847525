//! Broker client boundary.
//!
//! The call pipeline talks to the broker exclusively through these traits.
//! `mqtt` implements them over a real transport; `memory` is the in-process
//! broker the tests drive and fault-inject.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConnectionParams;

pub mod memory;
pub mod mqtt;

/// A transport-ready outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireMessage {
    pub payload: Vec<u8>,
    pub content_type: String,
    /// Application headers; duplicate keys already resolved by the envelope
    /// builder.
    pub headers: HashMap<String, String>,
    /// Set only when the caller expects a correlated reply.
    pub correlation: Option<String>,
}

/// One message handed to a subscriber. Header values are raw bytes at this
/// boundary; decoding them into text is the caller's concern.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub correlation: Option<String>,
    /// Headers in the order the broker iterates them.
    pub headers: Vec<(String, Vec<u8>)>,
}

/// Invoked from the broker's delivery task for every message arriving on the
/// subscribed queue. Never invoked from the calling task.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Opens sessions. One session per call.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> anyhow::Result<Box<dyn BrokerSession>>;
}

/// A live connection scoped to exactly one call.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn publish(&self, queue: &str, message: &WireMessage) -> anyhow::Result<()>;

    async fn subscribe(
        &self,
        queue: &str,
        on_deliver: DeliveryHandler,
    ) -> anyhow::Result<Box<dyn Subscription>>;

    /// Tear the session down. Any subscriptions still registered stop
    /// delivering.
    async fn close(&self) -> anyhow::Result<()>;
}

/// An active subscription on one queue.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Stop delivery. After cancel returns, the handler is never invoked
    /// again.
    async fn cancel(&self) -> anyhow::Result<()>;
}
