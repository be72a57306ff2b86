// End-to-end scenarios: fake controller, real registry, recording bus

mod common;

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration, Instant};

use common::{test_config, ChannelPublisher, FakeConnector, FakeController, WAIT};
use lutron_scenesetter::{
    inbound_queue, outbound_queue, Bridge, BusGateway, BusPublisher, ConfigSource,
    GatewayConfig, LutronSession, RegistrySources, RegistryStore, SceneDispatcher,
    SessionState,
};

const SCENES: &str = "\
[5]
name = Evening
fadetime = 2
10 = 75
11 = 20, 0.5

[6]
name = Off
10 = 0
11 = 0
";

const PICOS: &str = "\
[2]
name = Living room
1 = 5
2 = 99
4 = 6
";

const QUIET: Duration = Duration::from_millis(200);

struct Harness {
    _dir: TempDir,
    scenes_path: std::path::PathBuf,
    picos_path: std::path::PathBuf,
    connector: FakeConnector,
    controller: FakeController,
    registry: Arc<RegistryStore>,
    gateway: Arc<BusGateway>,
    published: UnboundedReceiver<(String, String)>,
    bridge: Bridge<FakeConnector>,
}

fn write(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

async fn start() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let scenes_path = dir.path().join("scenes.ini");
    let picos_path = dir.path().join("picos.ini");
    write(&scenes_path, SCENES);
    write(&picos_path, PICOS);
    let sources = RegistrySources::files(&scenes_path, &picos_path);

    let registry = Arc::new(RegistryStore::new());
    registry.reload(&sources).await.unwrap();

    let connector = FakeConnector::new();
    let mut controller = connector.offer();
    let session = Arc::new(LutronSession::new(connector.clone(), test_config()));
    let (connected, _) = tokio::join!(session.connect(), controller.login());
    connected.unwrap();

    let (inbound_tx, inbound_rx) = inbound_queue();
    let (outbound_tx, outbound_rx) = outbound_queue();
    let dispatcher = SceneDispatcher::new(Arc::clone(&registry), sources, outbound_tx);
    let gateway = Arc::new(BusGateway::new(
        GatewayConfig::default(),
        Arc::clone(&registry),
        inbound_tx,
    ));
    let (publisher, published) = ChannelPublisher::new();

    let bridge = Bridge::start(
        session,
        dispatcher,
        Arc::clone(&gateway),
        publisher,
        inbound_rx,
        outbound_rx,
    );

    Harness {
        _dir: dir,
        scenes_path,
        picos_path,
        connector,
        controller,
        registry,
        gateway,
        published,
        bridge,
    }
}

impl Harness {
    /// Next status published on the bus, as (topic, value).
    async fn next_status(&mut self) -> (String, Value) {
        let (topic, payload) = timeout(WAIT, self.published.recv())
            .await
            .expect("timed out waiting for a status")
            .expect("publisher closed");
        let doc: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(doc["name"], "scenesetter");
        assert_eq!(doc["characteristic"], "Brightness");
        (topic, doc["value"].clone())
    }

    async fn assert_no_status(&mut self) {
        tokio::time::sleep(QUIET).await;
        assert!(self.published.try_recv().is_err(), "unexpected status published");
    }
}

fn set_message(value: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "name": "scenesetter",
        "service_name": "Scenesetter",
        "characteristic": "Brightness",
        "value": value,
    }))
    .unwrap()
}

#[tokio::test]
async fn button_press_runs_mapped_scene() {
    let mut h = start().await;

    h.controller.send("GNET> ~DEVICE,2,1,3\r\n").await;
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,10,1,75,2"));
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,11,1,20,0.5"));
    assert!(h.controller.is_silent_for(QUIET).await);

    let (topic, value) = h.next_status().await;
    assert_eq!(topic, "homebridge/to/set");
    assert_eq!(value, json!(5));
    h.assert_no_status().await;
}

#[tokio::test]
async fn bus_selection_runs_scene_once() {
    let mut h = start().await;

    let scene = h
        .gateway
        .handle_publish("homebridge/from/set", &set_message(json!(6)))
        .await
        .unwrap();
    assert_eq!(scene.number, "6");

    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,10,1,0,1"));
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,11,1,0,1"));

    let (_, value) = h.next_status().await;
    assert_eq!(value, json!(6));
    h.assert_no_status().await;
}

#[tokio::test]
async fn bus_selections_run_in_order() {
    let mut h = start().await;

    for value in [json!(5), json!("6")] {
        h.gateway
            .handle_publish("homebridge/from/set", &set_message(value))
            .await
            .unwrap();
    }

    let lines: Vec<String> = [
        h.controller.next_line().await,
        h.controller.next_line().await,
        h.controller.next_line().await,
        h.controller.next_line().await,
    ]
    .into_iter()
    .flatten()
    .collect();
    assert_eq!(
        lines,
        [
            "#OUTPUT,10,1,75,2",
            "#OUTPUT,11,1,20,0.5",
            "#OUTPUT,10,1,0,1",
            "#OUTPUT,11,1,0,1",
        ]
    );
    assert_eq!(h.next_status().await.1, json!(5));
    assert_eq!(h.next_status().await.1, json!(6));
}

#[tokio::test]
async fn every_report_on_a_line_is_handled() {
    let mut h = start().await;

    h.controller.send("GNET> ~DEVICE,2,1,4 ~DEVICE,2,4,3\r\n").await;
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,10,1,0,1"));
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,11,1,0,1"));
    assert_eq!(h.next_status().await.1, json!(6));
    h.assert_no_status().await;
}

#[tokio::test]
async fn shutdown_notice_reconnects_once() {
    let mut h = start().await;
    let mut second = h.connector.offer();

    h.controller
        .send("\r\nshutting down the integration terminal\r\n")
        .await;
    second.login().await;

    // The new session carries button events
    second.send("~DEVICE,2,4,3\r\n").await;
    assert_eq!(second.next_line().await.as_deref(), Some("#OUTPUT,10,1,0,1"));
    assert_eq!(second.next_line().await.as_deref(), Some("#OUTPUT,11,1,0,1"));

    assert_eq!(h.bridge.session().reconnect_count(), 1);
    assert_eq!(h.bridge.session().state(), SessionState::Ready);
    assert_eq!(h.connector.connects(), 2);

    // Only the button press was published, not the notice
    assert_eq!(h.next_status().await.1, json!(6));
    h.assert_no_status().await;
    // The old transport was closed
    assert_eq!(h.controller.next_line().await, None);
}

#[tokio::test]
async fn dropped_connection_is_retried_until_controller_returns() {
    let mut h = start().await;

    // Nothing on offer: the first attempts are refused
    drop(h.controller);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.connector.connects() >= 2);

    let mut back = h.connector.offer();
    back.login().await;
    back.send("~DEVICE,2,1,3\r\n").await;
    assert_eq!(back.next_line().await.as_deref(), Some("#OUTPUT,10,1,75,2"));
}

#[tokio::test]
async fn unmapped_and_released_buttons_do_nothing() {
    let mut h = start().await;

    h.controller.send("~DEVICE,2,3,3\r\n").await;
    h.controller.send("~DEVICE,9,1,3\r\n").await;
    h.controller.send("~DEVICE,2,1,4\r\n").await;
    h.controller.send("~OUTPUT,10,1,75.00\r\n").await;
    assert!(h.controller.is_silent_for(QUIET).await);
    h.assert_no_status().await;

    // The reader is still alive
    h.controller.send("~DEVICE,2,4,3\r\n").await;
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,10,1,0,1"));
}

#[tokio::test]
async fn reload_button_reloads_configuration() {
    let mut h = start().await;
    let before = h.registry.snapshot().await.generation();

    write(&h.scenes_path, &format!("{SCENES}\n[7]\n30 = 100\n"));
    write(&h.picos_path, "[2]\n2 = 99\n3 = 7\n");

    h.controller.send("~DEVICE,2,2,3\r\n").await;
    assert_eq!(h.next_status().await.1, json!(99));

    // Pressed after the reload: the new mapping is live
    h.controller.send("~DEVICE,2,3,3\r\n").await;
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,30,1,100,1"));
    assert_eq!(h.next_status().await.1, json!(7));
    assert_eq!(h.registry.snapshot().await.generation(), before + 1);

    // Button 1 was dropped from the Pico table
    h.controller.send("~DEVICE,2,1,3\r\n").await;
    assert!(h.controller.is_silent_for(QUIET).await);
}

#[tokio::test]
async fn broken_reload_keeps_previous_configuration() {
    let mut h = start().await;
    let before = h.registry.snapshot().await.generation();

    write(&h.scenes_path, "[5]\n10 = loud\n");
    h.controller.send("~DEVICE,2,2,3\r\n").await;
    assert_eq!(h.next_status().await.1, json!(99));

    h.controller.send("~DEVICE,2,1,3\r\n").await;
    assert_eq!(h.controller.next_line().await.as_deref(), Some("#OUTPUT,10,1,75,2"));
    assert_eq!(h.registry.snapshot().await.generation(), before);
}

#[tokio::test]
async fn shutdown_stops_tasks_and_closes_session() {
    let mut h = start().await;
    h.bridge.shutdown().await;

    assert_eq!(h.bridge.session().state(), SessionState::Disconnected);
    assert_eq!(h.controller.next_line().await, None);
}

/// A bus that never completes a publish.
struct StalledPublisher;

impl BusPublisher for StalledPublisher {
    async fn publish_message(&self, _topic: &str, _payload: String) {
        std::future::pending::<()>().await
    }
}

#[tokio::test]
async fn shutdown_aborts_a_stalled_task() {
    let sources = RegistrySources::new(
        ConfigSource::inline("scenes", SCENES),
        ConfigSource::inline("picos", PICOS),
    );
    let registry = Arc::new(RegistryStore::new());
    registry.reload(&sources).await.unwrap();

    let connector = FakeConnector::new();
    let mut controller = connector.offer();
    let session = Arc::new(LutronSession::new(connector, test_config()));
    let (connected, _) = tokio::join!(session.connect(), controller.login());
    connected.unwrap();

    let (inbound_tx, inbound_rx) = inbound_queue();
    let (outbound_tx, outbound_rx) = outbound_queue();
    let dispatcher = SceneDispatcher::new(Arc::clone(&registry), sources, outbound_tx);
    let gateway = Arc::new(BusGateway::new(GatewayConfig::default(), registry, inbound_tx));
    let mut bridge = Bridge::start(
        session,
        dispatcher,
        gateway,
        StalledPublisher,
        inbound_rx,
        outbound_rx,
    );

    // The outbound consumer is now stuck publishing scene 5
    controller.send("~DEVICE,2,1,3\r\n").await;
    assert_eq!(controller.next_line().await.as_deref(), Some("#OUTPUT,10,1,75,2"));
    assert_eq!(controller.next_line().await.as_deref(), Some("#OUTPUT,11,1,20,0.5"));

    let started = Instant::now();
    bridge.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(7));
    assert_eq!(bridge.session().state(), SessionState::Disconnected);
    assert_eq!(controller.next_line().await, None);
}
