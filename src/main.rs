// MIT License - Copyright (c) 2021 TJForc
// Scenesetter daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions};
use serde::Deserialize;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Duration;
use tracing::{info, warn};

use lutron_scenesetter::{
    inbound_queue, outbound_queue, Bridge, BusGateway, GatewayConfig, LutronConfig,
    LutronSession, RegistrySources, RegistryStore, SceneDispatcher, TcpConnector,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "scenesetter")]
#[command(about = "Bridge between Lutron Pico remotes, Lutron scenes and homebridge-mqtt")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct Config {
    #[serde(default)]
    lutron: LutronToml,
    #[serde(default)]
    mqtt: MqttToml,
    #[serde(default)]
    homebridge: HomebridgeToml,
    #[serde(default)]
    registry: RegistryToml,
}

#[derive(Debug, Deserialize)]
struct LutronToml {
    #[serde(default = "default_lutron_host")]
    host: String,
    #[serde(default = "default_lutron_port")]
    port: u16,
    #[serde(default = "default_lutron_user")]
    user: String,
    #[serde(default = "default_lutron_password")]
    password: String,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_prompt_timeout")]
    prompt_timeout_ms: u64,
    #[serde(default = "default_read_timeout")]
    read_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
}

impl Default for LutronToml {
    fn default() -> Self {
        Self {
            host: default_lutron_host(),
            port: default_lutron_port(),
            user: default_lutron_user(),
            password: default_lutron_password(),
            connect_timeout_ms: default_connect_timeout(),
            prompt_timeout_ms: default_prompt_timeout(),
            read_timeout_ms: default_read_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

fn default_lutron_host() -> String {
    LutronConfig::default().host
}
fn default_lutron_port() -> u16 {
    LutronConfig::default().port
}
fn default_lutron_user() -> String {
    LutronConfig::default().user
}
fn default_lutron_password() -> String {
    LutronConfig::default().password
}
fn default_connect_timeout() -> u64 {
    LutronConfig::default().connect_timeout_ms
}
fn default_prompt_timeout() -> u64 {
    LutronConfig::default().prompt_timeout_ms
}
fn default_read_timeout() -> u64 {
    LutronConfig::default().read_timeout_ms
}
fn default_reconnect_delay() -> u64 {
    LutronConfig::default().reconnect_delay_ms
}

#[derive(Debug, Deserialize)]
struct MqttToml {
    #[serde(default = "default_mqtt_url")]
    url: String,
    #[serde(default = "default_client_id")]
    client_id: String,
    #[serde(default = "default_keep_alive")]
    keep_alive_secs: u64,
}

impl Default for MqttToml {
    fn default() -> Self {
        Self {
            url: default_mqtt_url(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
        }
    }
}

fn default_mqtt_url() -> String {
    "mqtt://localhost:1883".to_string()
}
fn default_client_id() -> String {
    "scenesetter".to_string()
}
fn default_keep_alive() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
struct HomebridgeToml {
    #[serde(default = "default_accessory_name")]
    name: String,
    #[serde(default = "default_service_name")]
    service_name: String,
    #[serde(default = "default_topic_prefix")]
    topic_prefix: String,
}

impl Default for HomebridgeToml {
    fn default() -> Self {
        Self {
            name: default_accessory_name(),
            service_name: default_service_name(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

fn default_accessory_name() -> String {
    GatewayConfig::default().name
}
fn default_service_name() -> String {
    GatewayConfig::default().service_name
}
fn default_topic_prefix() -> String {
    GatewayConfig::default().topic_prefix
}

#[derive(Debug, Deserialize)]
struct RegistryToml {
    #[serde(default = "default_scenes_path")]
    scenes: PathBuf,
    #[serde(default = "default_picos_path")]
    picos: PathBuf,
}

impl Default for RegistryToml {
    fn default() -> Self {
        Self {
            scenes: default_scenes_path(),
            picos: default_picos_path(),
        }
    }
}

fn default_scenes_path() -> PathBuf {
    PathBuf::from("scenes.ini")
}
fn default_picos_path() -> PathBuf {
    PathBuf::from("picos.ini")
}

fn build_lutron_config(toml: &LutronToml) -> LutronConfig {
    LutronConfig::builder()
        .host(&toml.host)
        .port(toml.port)
        .user(&toml.user)
        .password(&toml.password)
        .connect_timeout_ms(toml.connect_timeout_ms)
        .prompt_timeout_ms(toml.prompt_timeout_ms)
        .read_timeout_ms(toml.read_timeout_ms)
        .reconnect_delay_ms(toml.reconnect_delay_ms)
        .build()
}

fn build_gateway_config(toml: &HomebridgeToml) -> GatewayConfig {
    GatewayConfig {
        name: toml.name.clone(),
        service_name: toml.service_name.clone(),
        topic_prefix: toml.topic_prefix.clone(),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=lutron_scenesetter=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let lutron_config = build_lutron_config(&config.lutron);
    let gateway_config = build_gateway_config(&config.homebridge);
    let sources = RegistrySources::files(&config.registry.scenes, &config.registry.picos);
    let (mqtt_host, mqtt_port) = parse_mqtt_url(&config.mqtt.url)?;

    let registry = Arc::new(RegistryStore::new());
    registry
        .reload(&sources)
        .await
        .context("Failed to load scene and Pico configuration")?;

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    // Controller session; the session reader keeps retrying if this fails
    let session = Arc::new(LutronSession::new(
        TcpConnector::from_config(&lutron_config),
        lutron_config,
    ));
    if let Err(e) = session.connect().await {
        warn!("Initial connection to the controller failed, will keep retrying: {e}");
    }

    let (inbound_tx, inbound_rx) = inbound_queue();
    let (outbound_tx, outbound_rx) = outbound_queue();
    let dispatcher = SceneDispatcher::new(Arc::clone(&registry), sources.clone(), outbound_tx);
    let gateway = Arc::new(BusGateway::new(
        gateway_config,
        Arc::clone(&registry),
        inbound_tx,
    ));

    let mut mqtt_opts = MqttOptions::new(&config.mqtt.client_id, &mqtt_host, mqtt_port);
    mqtt_opts.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
    let (client, eventloop) = AsyncClient::new(mqtt_opts, 64);
    info!("MQTT: connecting to {mqtt_host}:{mqtt_port}");

    let mut bridge = Bridge::start(
        session,
        dispatcher,
        gateway,
        client.clone(),
        inbound_rx,
        outbound_rx,
    );
    bridge.spawn_event_loop(client.clone(), eventloop);

    info!("Scenesetter running. Send SIGHUP to reload scenes and Picos, SIGINT/SIGTERM to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, reloading scene and Pico configuration");
                if let Err(e) = registry.reload(&sources).await {
                    warn!("Reload failed, keeping previous configuration: {e}");
                }
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        warn!("Error disconnecting from MQTT broker: {e}");
    }
    bridge.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

/// Parse an MQTT URL like "mqtt://host:port" into (host, port). The port
/// defaults to 1883.
fn parse_mqtt_url(url: &str) -> Result<(String, u16)> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    let (host, port) = match stripped.rsplit_once(':') {
        Some((host, port_str)) => {
            let port: u16 = port_str.parse().context("Invalid MQTT port number")?;
            (host, port)
        }
        None => (stripped, 1883),
    };

    if host.is_empty() {
        anyhow::bail!("MQTT URL must be in format mqtt://host:port");
    }

    Ok((host.to_string(), port))
}
