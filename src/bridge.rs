// MIT License - Copyright (c) 2021 TJForc
// Task wiring between the controller session and the bus

use std::sync::Arc;

use rumqttc::{AsyncClient, EventLoop};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::SceneDispatcher;
use crate::event::{InboundReceiver, OutboundReceiver};
use crate::gateway::{BusGateway, BusPublisher};
use crate::protocol::{parse_events, Event};
use crate::session::LutronSession;
use crate::transport::Connector;

/// How long `shutdown` waits for a task to finish its current work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The running bridge.
///
/// Owns the long-lived tasks:
///
/// - **session reader**: reads controller lines, runs the scene of every
///   pressed Pico button inline, and reconnects when the session drops;
/// - **inbound consumer**: runs scenes selected on the bus;
/// - **outbound consumer**: publishes activated scene numbers on the bus;
/// - **bus event loop** (optional): feeds the inbound queue from the broker.
///
/// All tasks stop when `shutdown` is called; dropping the bridge aborts them.
pub struct Bridge<C: Connector> {
    session: Arc<LutronSession<C>>,
    gateway: Arc<BusGateway>,
    shutdown_tx: watch::Sender<bool>,
    reader_handle: Option<JoinHandle<()>>,
    inbound_handle: Option<JoinHandle<()>>,
    outbound_handle: Option<JoinHandle<()>>,
    event_loop_handle: Option<JoinHandle<()>>,
}

impl<C: Connector> Bridge<C> {
    /// Spawn the session reader and both queue consumers.
    ///
    /// The session does not need to be connected: the reader logs in on its
    /// first iteration if it is not.
    pub fn start<P>(
        session: Arc<LutronSession<C>>,
        dispatcher: SceneDispatcher,
        gateway: Arc<BusGateway>,
        publisher: P,
        inbound_rx: InboundReceiver,
        outbound_rx: OutboundReceiver,
    ) -> Self
    where
        P: BusPublisher + 'static,
    {
        let (shutdown_tx, _) = watch::channel(false);

        let reader_handle = tokio::spawn(read_loop(
            Arc::clone(&session),
            dispatcher.clone(),
            shutdown_tx.subscribe(),
        ));

        let inbound_handle = tokio::spawn(inbound_loop(
            Arc::clone(&session),
            dispatcher,
            inbound_rx,
            shutdown_tx.subscribe(),
        ));

        let outbound_handle = {
            let gateway = Arc::clone(&gateway);
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                gateway
                    .run_outbound(&publisher, outbound_rx, shutdown_rx)
                    .await;
                debug!("Outbound consumer stopped");
            })
        };

        Self {
            session,
            gateway,
            shutdown_tx,
            reader_handle: Some(reader_handle),
            inbound_handle: Some(inbound_handle),
            outbound_handle: Some(outbound_handle),
            event_loop_handle: None,
        }
    }

    /// Drive the MQTT event loop as one of the bridge tasks.
    pub fn spawn_event_loop(&mut self, client: AsyncClient, eventloop: EventLoop) {
        let gateway = Arc::clone(&self.gateway);
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.event_loop_handle = Some(tokio::spawn(async move {
            gateway.run_event_loop(client, eventloop, shutdown_rx).await;
        }));
    }

    pub fn session(&self) -> &Arc<LutronSession<C>> {
        &self.session
    }

    /// Stop every task and close the session.
    ///
    /// A scene that is being executed is allowed to finish; tasks still
    /// running after one shared grace period are aborted.
    pub async fn shutdown(&mut self) {
        info!("Stopping bridge");
        let _ = self.shutdown_tx.send(true);

        let mut handles: Vec<JoinHandle<()>> = [
            self.reader_handle.take(),
            self.inbound_handle.take(),
            self.outbound_handle.take(),
            self.event_loop_handle.take(),
        ]
        .into_iter()
        .flatten()
        .collect();

        // The tasks stop concurrently; the grace period covers all of them.
        let joined = timeout(SHUTDOWN_GRACE, async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!("Bridge task panicked: {e}");
                    }
                }
            }
        })
        .await;
        if joined.is_err() {
            let stuck = handles.iter().filter(|h| !h.is_finished()).count();
            warn!("{stuck} task(s) did not stop in time, aborting");
            for handle in &handles {
                handle.abort();
            }
        }

        self.session.disconnect().await;
    }
}

impl<C: Connector> Drop for Bridge<C> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in [
            self.reader_handle.take(),
            self.inbound_handle.take(),
            self.outbound_handle.take(),
            self.event_loop_handle.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

/// Session reader: the only task that reads from the controller, and the
/// one that owns reconnection.
async fn read_loop<C: Connector>(
    session: Arc<LutronSession<C>>,
    dispatcher: SceneDispatcher,
    mut shutdown: watch::Receiver<bool>,
) {
    let tick = session.config().read_timeout();
    'read: loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = session.read_event(tick) => read,
        };

        let line = match read {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                warn!("Session read failed: {e}");
                if !recover(&session, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        for event in parse_events(&line) {
            match event {
                Event::Button(event) if event.is_pressed() => {
                    let outcome = dispatcher.press(&event, session.as_ref()).await;
                    trace!("Button {:?}: {:?}", event, outcome);
                }
                Event::Button(event) => {
                    trace!(
                        "Pico {} button {} {:?}, not dispatched",
                        event.device_id, event.button_id, event.action
                    );
                }
                Event::ShutdownNotice => {
                    warn!("Controller is closing the integration session");
                    if !recover(&session, &mut shutdown).await {
                        break 'read;
                    }
                }
                Event::Ignored => {}
            }
        }
    }
    debug!("Session reader stopped");
}

/// Reconnect until it succeeds. Returns false if shutdown interrupted it.
async fn recover<C: Connector>(
    session: &LutronSession<C>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let delay = session.config().reconnect_delay(attempt);
            error!(
                "Reconnection attempt {attempt} failed. Retrying in {:.1}s...",
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = shutdown.changed() => return false,
                _ = sleep(delay) => {}
            }
        }
        attempt += 1;

        info!("Attempting controller reconnection (attempt {attempt})...");
        let result = tokio::select! {
            _ = shutdown.changed() => return false,
            result = session.reconnect() => result,
        };
        match result {
            Ok(()) => {
                info!("Controller reconnected");
                return true;
            }
            Err(e) => warn!("Reconnection error: {e}"),
        }
    }
}

/// Inbound consumer: runs bus-selected scenes in arrival order.
async fn inbound_loop<C: Connector>(
    session: Arc<LutronSession<C>>,
    dispatcher: SceneDispatcher,
    mut rx: InboundReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let scene = tokio::select! {
            _ = shutdown.changed() => break,
            scene = rx.recv() => scene,
        };
        let Some(scene) = scene else {
            debug!("Inbound queue closed");
            break;
        };
        dispatcher.run(&scene, session.as_ref()).await;
    }
    debug!("Inbound consumer stopped");
}
