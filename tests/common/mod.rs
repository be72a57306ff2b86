// Shared fixtures: an in-memory controller and a recording bus publisher.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{
    AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use lutron_scenesetter::{BusPublisher, Connector, LutronConfig, SessionError};

pub const WAIT: Duration = Duration::from_secs(5);

/// Session settings with short timings for tests.
pub fn test_config() -> LutronConfig {
    LutronConfig::builder()
        .host("controller.test")
        .prompt_timeout_ms(1_000)
        .read_timeout_ms(50)
        .reconnect_delay_ms(10)
        .build()
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Pending {
    streams: Mutex<VecDeque<DuplexStream>>,
    connects: AtomicUsize,
}

/// Hands out in-memory streams offered by the test, one per connect.
///
/// Connecting with nothing on offer fails like a refused TCP connection.
#[derive(Clone, Default)]
pub struct FakeConnector {
    pending: Arc<Pending>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a stream for the next connect and return the controller side.
    pub fn offer(&self) -> FakeController {
        let (bridge, controller) = tokio::io::duplex(4096);
        self.pending.streams.lock().unwrap().push_back(bridge);
        FakeController::new(controller)
    }

    /// Connect calls made so far, including refused ones.
    pub fn connects(&self) -> usize {
        self.pending.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> Result<DuplexStream, SessionError> {
        self.pending.connects.fetch_add(1, Ordering::SeqCst);
        let stream = self.pending.streams.lock().unwrap().pop_front();
        stream.ok_or_else(|| {
            SessionError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no controller on offer",
            ))
        })
    }

    fn describe(&self) -> String {
        "fake controller".to_string()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// The controller end of an in-memory session.
pub struct FakeController {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeController {
    fn new(stream: DuplexStream) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Run the integration login. Returns the user and password received.
    pub async fn login(&mut self) -> (String, String) {
        self.send("\r\nlogin: ").await;
        let user = self.next_line().await.expect("no user name");
        self.send("password: ").await;
        let password = self.next_line().await.expect("no password");
        self.send("\r\nGNET> ").await;
        (user, password)
    }

    pub async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read exactly `n` bytes written by the bridge.
    pub async fn read_raw(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        timeout(WAIT, self.reader.read_exact(&mut buf))
            .await
            .expect("timed out waiting for the bridge")
            .unwrap();
        buf
    }

    /// Next line written by the bridge, or None at EOF.
    pub async fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for the bridge")
            .ok()?;
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// True if the bridge writes nothing for `quiet`.
    pub async fn is_silent_for(&mut self, quiet: Duration) -> bool {
        let mut line = String::new();
        match timeout(quiet, self.reader.read_line(&mut line)).await {
            Err(_) => true,
            // EOF
            Ok(Ok(0)) => true,
            Ok(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Forwards every published message to a channel.
pub struct ChannelPublisher(pub mpsc::UnboundedSender<(String, String)>);

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl BusPublisher for ChannelPublisher {
    async fn publish_message(&self, topic: &str, payload: String) {
        let _ = self.0.send((topic.to_string(), payload));
    }
}
