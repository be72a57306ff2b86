// MIT License - Copyright (c) 2021 TJForc
// homebridge-mqtt gateway

use std::future::Future;
use std::sync::Arc;

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::constants::{
    HOMEBRIDGE_CHARACTERISTIC, HOMEBRIDGE_SERVICE, TOPIC_ADD, TOPIC_FROM_ALL, TOPIC_FROM_SET,
    TOPIC_TO_SET,
};
use crate::event::{InboundSender, OutboundReceiver};
use crate::registry::{RegistryStore, Scene};

/// How the bridge presents itself to homebridge-mqtt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Accessory name; inbound messages for other accessories are ignored
    pub name: String,
    pub service_name: String,
    /// Topic root, without a trailing slash
    pub topic_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "scenesetter".to_string(),
            service_name: "Scenesetter".to_string(),
            topic_prefix: "homebridge".to_string(),
        }
    }
}

impl GatewayConfig {
    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_prefix.trim_end_matches('/'), suffix)
    }

    pub fn add_topic(&self) -> String {
        self.topic(TOPIC_ADD)
    }

    pub fn status_topic(&self) -> String {
        self.topic(TOPIC_TO_SET)
    }

    pub fn set_topic(&self) -> String {
        self.topic(TOPIC_FROM_SET)
    }

    pub fn subscribe_filter(&self) -> String {
        self.topic(TOPIC_FROM_ALL)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Accessory registration, published on `<prefix>/to/add`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AddAccessory {
    pub name: String,
    pub service_name: String,
    pub service: String,
    #[serde(rename = "Brightness")]
    pub brightness: String,
}

/// Characteristic change requested by HomeKit, received on `<prefix>/from/set`.
#[derive(Debug, Deserialize)]
pub struct SetRequest {
    pub name: String,
    #[serde(default)]
    pub service_name: Option<String>,
    pub characteristic: String,
    pub value: Value,
}

/// Characteristic update, published on `<prefix>/to/set`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SetStatus {
    pub name: String,
    pub service_name: String,
    pub characteristic: String,
    pub value: Value,
}

/// Scene number carried by a brightness value.
///
/// HomeKit sends integers; integral floats and strings are accepted too.
pub fn scene_number_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                (f.is_finite() && f.fract() == 0.0).then(|| format!("{f:.0}"))
            }
        }
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Brightness value for a scene number: a JSON number when the number is
/// numeric, else the text.
pub fn status_value(number: &str) -> Value {
    match number.parse::<u64>() {
        Ok(n) if n.to_string() == number => Value::from(n),
        _ => Value::String(number.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Publishing
// ---------------------------------------------------------------------------

/// Publishes JSON payloads on the bus.
///
/// Failures are logged by the implementation; bus delivery is best effort.
pub trait BusPublisher: Send + Sync {
    fn publish_message(&self, topic: &str, payload: String) -> impl Future<Output = ()> + Send;
}

impl BusPublisher for AsyncClient {
    async fn publish_message(&self, topic: &str, payload: String) {
        if let Err(e) = self.publish(topic, QoS::AtLeastOnce, false, payload).await {
            error!("Failed to publish to {topic}: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Connects the message bus to the scene queues.
pub struct BusGateway {
    config: GatewayConfig,
    registry: Arc<RegistryStore>,
    inbound: InboundSender,
}

impl BusGateway {
    pub fn new(config: GatewayConfig, registry: Arc<RegistryStore>, inbound: InboundSender) -> Self {
        Self {
            config,
            registry,
            inbound,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The accessory registration document.
    pub fn registration_payload(&self) -> String {
        let doc = AddAccessory {
            name: self.config.name.clone(),
            service_name: self.config.service_name.clone(),
            service: HOMEBRIDGE_SERVICE.to_string(),
            brightness: "default".to_string(),
        };
        to_json(&doc)
    }

    /// The status document announcing that scene `number` was activated.
    pub fn status_payload(&self, number: &str) -> String {
        let doc = SetStatus {
            name: self.config.name.clone(),
            service_name: self.config.service_name.clone(),
            characteristic: HOMEBRIDGE_CHARACTERISTIC.to_string(),
            value: status_value(number),
        };
        to_json(&doc)
    }

    /// Handle one incoming bus message.
    ///
    /// A brightness change for this accessory that names a known scene is
    /// queued for execution and returned. Everything else is dropped.
    pub async fn handle_publish(&self, topic: &str, payload: &[u8]) -> Option<Arc<Scene>> {
        if topic != self.config.set_topic() {
            trace!("Ignoring message on {topic}");
            return None;
        }

        let request: SetRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to parse message on {topic}: {e}");
                return None;
            }
        };
        if request.name != self.config.name
            || request.characteristic != HOMEBRIDGE_CHARACTERISTIC
        {
            trace!(
                "Ignoring {} change for accessory {}",
                request.characteristic, request.name
            );
            return None;
        }

        let Some(number) = scene_number_from_value(&request.value) else {
            warn!("Brightness value {} is not a scene number", request.value);
            return None;
        };
        let Some(scene) = self.registry.resolve_scene_number(&number).await else {
            debug!("No such scene as {number}");
            return None;
        };

        info!("Bus selects scene {}", scene.label());
        if self.inbound.send(Arc::clone(&scene)).is_err() {
            warn!("Inbound queue closed, dropping scene {number}");
            return None;
        }
        Some(scene)
    }

    /// Subscribe and register the accessory. Called on every broker connect.
    ///
    /// Runs on its own task: the client's request queue is only drained by
    /// `EventLoop::poll`, and it may be full of requests queued while the
    /// broker was away.
    pub fn on_connect(&self, client: &AsyncClient) -> JoinHandle<()> {
        let client = client.clone();
        let filter = self.config.subscribe_filter();
        let add_topic = self.config.add_topic();
        let registration = self.registration_payload();
        info!("MQTT: connected, subscribing to {filter}");
        tokio::spawn(async move {
            if let Err(e) = client.subscribe(filter.as_str(), QoS::AtLeastOnce).await {
                error!("Failed to subscribe to {filter}: {e}");
            }
            client.publish_message(&add_topic, registration).await;
        })
    }

    /// Drive the MQTT event loop until shutdown.
    pub async fn run_event_loop(
        &self,
        client: AsyncClient,
        mut eventloop: EventLoop,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => break,
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // rumqttc does not resubscribe after a broker reconnect
                    self.on_connect(&client);
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    self.handle_publish(&msg.topic, &msg.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!("MQTT event loop stopped");
    }

    /// Publish every activated scene number until the queue closes or shutdown.
    pub async fn run_outbound<P: BusPublisher>(
        &self,
        publisher: &P,
        mut rx: OutboundReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let topic = self.config.status_topic();
        loop {
            let number = tokio::select! {
                _ = shutdown.changed() => break,
                number = rx.recv() => number,
            };
            let Some(number) = number else {
                debug!("Outbound queue closed");
                break;
            };
            debug!("Publishing scene {number} on {topic}");
            publisher
                .publish_message(&topic, self.status_payload(&number))
                .await;
        }
    }
}

fn to_json(doc: &impl Serialize) -> String {
    // Plain structs of strings and JSON values always serialize
    serde_json::to_string(doc).unwrap_or_default()
}
