// MIT License - Copyright (c) 2021 TJForc
// Lutron scene bridge
//
//! # lutron-scenesetter
//!
//! Bridges a Lutron lighting controller's integration terminal with a
//! homebridge-mqtt message bus.
//!
//! A Pico button press reported by the controller activates the scene
//! mapped to that button; HomeKit selects scenes by setting the brightness
//! of a virtual light accessory to the scene number. Every activation is
//! published back on the bus.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lutron_scenesetter::{
//!     inbound_queue, outbound_queue, Bridge, BusGateway, GatewayConfig, LutronConfig,
//!     LutronSession, RegistrySources, RegistryStore, SceneDispatcher, TcpConnector,
//! };
//! use rumqttc::{AsyncClient, MqttOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LutronConfig::builder().host("192.168.0.50").build();
//!     let sources = RegistrySources::files("scenes.ini", "picos.ini");
//!
//!     let registry = Arc::new(RegistryStore::new());
//!     registry.reload(&sources).await?;
//!
//!     let session = Arc::new(LutronSession::new(TcpConnector::from_config(&config), config));
//!     session.connect().await?;
//!
//!     let (inbound_tx, inbound_rx) = inbound_queue();
//!     let (outbound_tx, outbound_rx) = outbound_queue();
//!     let dispatcher = SceneDispatcher::new(Arc::clone(&registry), sources, outbound_tx);
//!     let gateway = Arc::new(BusGateway::new(GatewayConfig::default(), registry, inbound_tx));
//!
//!     let (client, eventloop) = AsyncClient::new(MqttOptions::new("scenesetter", "localhost", 1883), 64);
//!     let mut bridge = Bridge::start(session, dispatcher, gateway, client.clone(), inbound_rx, outbound_rx);
//!     bridge.spawn_event_loop(client, eventloop);
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use bridge::Bridge;
pub use config::{ConfigSource, LutronConfig, LutronConfigBuilder, RegistrySources};
pub use dispatch::{Activation, LevelSink, SceneDispatcher};
pub use error::{ConfigError, Result, SessionError};
pub use event::{inbound_queue, outbound_queue, InboundReceiver, InboundSender, OutboundReceiver, OutboundSender};
pub use gateway::{BusGateway, BusPublisher, GatewayConfig};
pub use protocol::{parse_events, parse_line, ButtonAction, ButtonEvent, Event};
pub use registry::{Command, Pico, Registry, RegistryStore, Scene};
pub use session::{LutronSession, SessionState};
pub use transport::{Connector, TcpConnector};
