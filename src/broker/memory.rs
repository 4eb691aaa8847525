//! In-process broker for tests.
//!
//! Records published messages, lets a test inject deliveries into live
//! subscriptions, fails individual stages on demand, and counts lifecycle
//! calls so tests can assert that every opened session was closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BrokerClient, BrokerSession, Delivery, DeliveryHandler, Subscription, WireMessage};
use crate::config::ConnectionParams;

/// Which stages should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub connect: bool,
    pub publish: bool,
    pub subscribe: bool,
}

#[derive(Default)]
struct Inner {
    faults: Faults,
    published: Mutex<Vec<(String, WireMessage)>>,
    subscribers: Mutex<HashMap<String, DeliveryHandler>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    cancels: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: Faults) -> Self {
        Self {
            inner: Arc::new(Inner {
                faults,
                ..Inner::default()
            }),
        }
    }

    /// Hand a delivery to the live subscription on `queue`, if any. The
    /// handler runs synchronously on the test's task, which stands in for
    /// the broker's delivery thread.
    pub fn deliver(&self, queue: &str, delivery: Delivery) {
        let handler = self.inner.subscribers.lock().get(queue).cloned();
        if let Some(handler) = handler {
            handler(delivery);
        }
    }

    pub fn published(&self) -> Vec<(String, WireMessage)> {
        self.inner.published.lock().clone()
    }

    pub fn has_subscriber(&self, queue: &str) -> bool {
        self.inner.subscribers.lock().contains_key(queue)
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.inner.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    async fn connect(&self, _params: &ConnectionParams) -> anyhow::Result<Box<dyn BrokerSession>> {
        if self.inner.faults.connect {
            bail!("connection refused");
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            inner: self.inner.clone(),
        }))
    }
}

struct MemorySession {
    inner: Arc<Inner>,
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn publish(&self, queue: &str, message: &WireMessage) -> anyhow::Result<()> {
        if self.inner.faults.publish {
            bail!("publish rejected by broker");
        }
        self.inner
            .published
            .lock()
            .push((queue.to_string(), message.clone()));
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        on_deliver: DeliveryHandler,
    ) -> anyhow::Result<Box<dyn Subscription>> {
        if self.inner.faults.subscribe {
            bail!("subscribe refused by broker");
        }
        self.inner
            .subscribers
            .lock()
            .insert(queue.to_string(), on_deliver);
        Ok(Box::new(MemorySubscription {
            queue: queue.to_string(),
            inner: self.inner.clone(),
        }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.inner.subscribers.lock().clear();
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySubscription {
    queue: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn cancel(&self) -> anyhow::Result<()> {
        self.inner.subscribers.lock().remove(&self.queue);
        self.inner.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: "mq.internal".into(),
            port: 5672,
            username: "guest".into(),
            password: "guest".into(),
            tls: false,
        }
    }

    #[tokio::test]
    async fn deliver_reaches_registered_handler() {
        let broker = MemoryBroker::new();
        let session = broker.connect(&params()).await.unwrap();

        let seen: Arc<Mutex<Vec<Delivery>>> = Arc::default();
        let sink = seen.clone();
        let handler: DeliveryHandler = Arc::new(move |delivery| sink.lock().push(delivery));
        session.subscribe("replies", handler).await.unwrap();

        broker.deliver(
            "replies",
            Delivery {
                payload: b"pong".to_vec(),
                ..Delivery::default()
            },
        );
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].payload, b"pong");
    }

    #[tokio::test]
    async fn cancel_stops_delivery() {
        let broker = MemoryBroker::new();
        let session = broker.connect(&params()).await.unwrap();

        let seen: Arc<Mutex<Vec<Delivery>>> = Arc::default();
        let sink = seen.clone();
        let handler: DeliveryHandler = Arc::new(move |delivery| sink.lock().push(delivery));
        let subscription = session.subscribe("replies", handler).await.unwrap();

        subscription.cancel().await.unwrap();
        broker.deliver("replies", Delivery::default());

        assert!(seen.lock().is_empty());
        assert_eq!(broker.cancels(), 1);
    }

    #[tokio::test]
    async fn close_clears_subscriptions_and_counts() {
        let broker = MemoryBroker::new();
        let session = broker.connect(&params()).await.unwrap();
        session
            .subscribe("replies", Arc::new(|_| {}))
            .await
            .unwrap();

        session.close().await.unwrap();

        assert!(!broker.has_subscriber("replies"));
        assert_eq!(broker.connects(), 1);
        assert_eq!(broker.closes(), 1);
    }

    #[tokio::test]
    async fn connect_fault_fails_without_counting() {
        let broker = MemoryBroker::with_faults(Faults {
            connect: true,
            ..Faults::default()
        });
        assert!(broker.connect(&params()).await.is_err());
        assert_eq!(broker.connects(), 0);
    }
}
