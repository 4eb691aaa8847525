//! MQTT v5 broker client.
//!
//! MQTT 5 publish properties carry exactly the metadata the call pipeline
//! needs: `content_type`, `correlation_data`, and `user_properties` for the
//! application header map. A session is scoped to one call, so unlike a
//! long-running listener there is no reconnect: the first connection error
//! after the handshake stops delivery and the session is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Transport;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BrokerClient, BrokerSession, Delivery, DeliveryHandler, Subscription, WireMessage};
use crate::config::ConnectionParams;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const EVENT_CAPACITY: usize = 64;

type HandlerMap = Arc<Mutex<HashMap<String, DeliveryHandler>>>;

/// Connects to an MQTT v5 broker. Stateless; all per-call state lives in the
/// session it hands out.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttBroker;

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn BrokerSession>> {
        let client_id = format!("mqcall-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, params.host.as_str(), params.port);
        options.set_keep_alive(KEEP_ALIVE);
        if !params.username.is_empty() {
            options.set_credentials(params.username.as_str(), params.password.as_str());
        }
        if params.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, EVENT_CAPACITY);
        let handlers: HandlerMap = Arc::default();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(drive_eventloop(eventloop, handlers.clone(), ready_tx));

        match tokio::time::timeout(CONNECT_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                task.abort();
                return Err(e.context(format!(
                    "cannot connect to {}:{}",
                    params.host, params.port
                )));
            }
            Ok(Err(_)) => {
                task.abort();
                bail!("event loop stopped before the connection was acknowledged");
            }
            Err(_) => {
                task.abort();
                bail!(
                    "timed out connecting to {}:{}",
                    params.host,
                    params.port
                );
            }
        }

        debug!(host = %params.host, port = params.port, "mqtt session open");
        Ok(Box::new(MqttSession {
            client,
            handlers,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Drives the connection until it ends, converting inbound publishes into
/// `Delivery` values for whichever handler is registered on the topic.
async fn drive_eventloop(
    mut eventloop: EventLoop,
    handlers: HandlerMap,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut ready = Some(ready);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let Some(tx) = ready.take() else { continue };
                if ack.code == ConnectReturnCode::Success {
                    let _ = tx.send(Ok(()));
                } else {
                    let _ = tx.send(Err(anyhow!("broker refused connection: {:?}", ack.code)));
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = String::from_utf8_lossy(&publish.topic).to_string();
                let handler = handlers.lock().get(&topic).cloned();
                match handler {
                    Some(handler) => {
                        handler(delivery_from(&publish.payload, publish.properties.as_ref()));
                    }
                    None => debug!(topic = %topic, "publish on topic with no handler, dropped"),
                }
            }
            Ok(_) => {}
            Err(e) => {
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(anyhow::Error::new(e)));
                    }
                    None => warn!("mqtt connection error, stopping delivery: {e}"),
                }
                return;
            }
        }
    }
}

fn delivery_from(payload: &Bytes, properties: Option<&PublishProperties>) -> Delivery {
    Delivery {
        payload: payload.to_vec(),
        content_type: properties.and_then(|p| p.content_type.clone()),
        // A correlation slot that is not valid UTF-8 can never equal a
        // caller-supplied token; treat it as absent.
        correlation: properties
            .and_then(|p| p.correlation_data.as_ref())
            .and_then(|data| String::from_utf8(data.to_vec()).ok()),
        headers: properties
            .map(|p| {
                p.user_properties
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone().into_bytes()))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

struct MqttSession {
    client: AsyncClient,
    handlers: HandlerMap,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn publish(&self, queue: &str, message: &WireMessage) -> Result<()> {
        let properties = PublishProperties {
            content_type: Some(message.content_type.clone()),
            correlation_data: message
                .correlation
                .clone()
                .map(|token| Bytes::from(token.into_bytes())),
            user_properties: message
                .headers
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            ..PublishProperties::default()
        };
        self.client
            .publish_with_properties(
                queue,
                QoS::AtLeastOnce,
                false,
                message.payload.clone(),
                properties,
            )
            .await
            .with_context(|| format!("publish to '{queue}' failed"))
    }

    async fn subscribe(
        &self,
        queue: &str,
        on_deliver: DeliveryHandler,
    ) -> Result<Box<dyn Subscription>> {
        // Register before subscribing so a reply racing the SubAck is not
        // dropped.
        self.handlers.lock().insert(queue.to_string(), on_deliver);
        if let Err(e) = self.client.subscribe(queue, QoS::AtLeastOnce).await {
            self.handlers.lock().remove(queue);
            return Err(
                anyhow::Error::new(e).context(format!("subscribe to '{queue}' failed"))
            );
        }
        Ok(Box::new(MqttSubscription {
            queue: queue.to_string(),
            client: self.client.clone(),
            handlers: self.handlers.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.handlers.lock().clear();
        let disconnected = self.client.disconnect().await;
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        disconnected.context("mqtt disconnect failed")?;
        Ok(())
    }
}

struct MqttSubscription {
    queue: String,
    client: AsyncClient,
    handlers: HandlerMap,
}

#[async_trait]
impl Subscription for MqttSubscription {
    async fn cancel(&self) -> Result<()> {
        // Drop the handler first: delivery must stop immediately even if the
        // broker takes its time acknowledging the unsubscribe.
        self.handlers.lock().remove(&self.queue);
        self.client
            .unsubscribe(self.queue.as_str())
            .await
            .with_context(|| format!("unsubscribe from '{}' failed", self.queue))
    }
}
