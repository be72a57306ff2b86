// MIT License - Copyright (c) 2021 TJForc
// Integration terminal session

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::LutronConfig;
use crate::constants::{LOGIN_PROMPT, PASSWORD_PROMPT, READY_PROMPT};
use crate::dispatch::LevelSink;
use crate::error::{Result, SessionError};
use crate::protocol::format_output_command;
use crate::transport::{Connector, TelnetCodec, TelnetReader};

/// Lifecycle of the integration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport; initial state and the state after a failed login
    Disconnected,
    /// Transport open, login sequence in progress
    Authenticating,
    /// Ready prompt received; events flow and commands are accepted
    Ready,
    /// The transport failed or the controller closed the session
    TornDown,
}

/// The one session with the Lutron controller.
///
/// The read half and the write half are locked separately so the session
/// reader can block on the next line while commands are being sent. Each
/// command is written under the writer lock, so command bytes from
/// concurrent senders never interleave. Reconnecting takes both locks
/// (reader first) for the whole teardown and login.
pub struct LutronSession<C: Connector> {
    connector: C,
    config: LutronConfig,
    reader: Mutex<Option<TelnetReader<ReadHalf<C::Stream>>>>,
    writer: Mutex<Option<WriteHalf<C::Stream>>>,
    state_tx: watch::Sender<SessionState>,
    reconnects: AtomicU64,
}

impl<C: Connector> LutronSession<C> {
    /// Create a disconnected session.
    pub fn new(connector: C, config: LutronConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            connector,
            config,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            state_tx,
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LutronConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Number of completed `reconnect` calls, successful or not.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Open the transport and log in.
    pub async fn connect(&self) -> Result<()> {
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        let (new_reader, new_writer) = self.establish().await?;
        *reader = Some(new_reader);
        *writer = Some(new_writer);
        Ok(())
    }

    /// Tear the current transport down and log in again.
    pub async fn reconnect(&self) -> Result<()> {
        debug!("Restarting connection");
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        reader.take();
        if let Some(mut old) = writer.take() {
            let _ = old.shutdown().await;
        }
        self.set_state(SessionState::TornDown);

        let result = self.establish().await;
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        let (new_reader, new_writer) = result?;
        *reader = Some(new_reader);
        *writer = Some(new_writer);
        debug!("Restarted connection");
        Ok(())
    }

    /// Close the transport without reconnecting.
    pub async fn disconnect(&self) {
        info!("Disconnecting from {}", self.connector.describe());
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        reader.take();
        if let Some(mut old) = writer.take() {
            let _ = old.shutdown().await;
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Send an `#OUTPUT` level command. No acknowledgment is awaited.
    pub async fn send_level(&self, device_id: &str, level: f64, fade_time: f64) -> Result<()> {
        let line = format_output_command(device_id, level, fade_time);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Disconnected)?;
        debug!("Sending: {}", line.trim_end());
        if let Err(e) = write_raw(writer, line.as_bytes()).await {
            warn!("Failed to write command: {}", e);
            self.mark_torn_down();
            return Err(SessionError::Io(e));
        }
        Ok(())
    }

    /// Wait up to `limit` for the next line. `None` means the wait timed out.
    pub async fn read_event(&self, limit: Duration) -> Result<Option<String>> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(SessionError::Disconnected)?;
        match timeout(limit, reader.next_line()).await {
            Err(_) => Ok(None),
            Ok(Ok(line)) => {
                if !line.trim().is_empty() {
                    debug!("Got telnet input: {}", line.trim());
                }
                Ok(Some(line))
            }
            Ok(Err(e)) => {
                guard.take();
                self.mark_torn_down();
                Err(e)
            }
        }
    }

    /// Connect and run the login sequence, returning the split stream.
    async fn establish(
        &self,
    ) -> Result<(TelnetReader<ReadHalf<C::Stream>>, WriteHalf<C::Stream>)> {
        self.set_state(SessionState::Authenticating);
        info!("Connecting to {}", self.connector.describe());

        let attempt = async {
            let mut stream = self.connector.connect().await?;
            let mut codec = TelnetCodec::new();
            self.login(&mut stream, &mut codec).await?;
            Ok::<_, SessionError>((stream, codec))
        };

        match attempt.await {
            Ok((stream, codec)) => {
                let (read_half, write_half) = tokio::io::split(stream);
                self.set_state(SessionState::Ready);
                info!("Integration session ready");
                Ok((TelnetReader::new(read_half, codec), write_half))
            }
            Err(e) => {
                warn!("Login to {} failed: {}", self.connector.describe(), e);
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn login(&self, stream: &mut C::Stream, codec: &mut TelnetCodec) -> Result<()> {
        let limit = self.config.prompt_timeout();
        expect_prompt(stream, codec, LOGIN_PROMPT, limit).await?;
        write_line(stream, &self.config.user).await?;
        expect_prompt(stream, codec, PASSWORD_PROMPT, limit).await?;
        write_line(stream, &self.config.password).await?;
        expect_prompt(stream, codec, READY_PROMPT, limit).await?;
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn mark_torn_down(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Ready {
                *state = SessionState::TornDown;
                true
            } else {
                false
            }
        });
    }
}

impl<C: Connector> LevelSink for LutronSession<C> {
    async fn set_level(&self, device_id: &str, level: f64, fade_time: f64) -> Result<()> {
        self.send_level(device_id, level, fade_time).await
    }
}

/// Read until `prompt` arrives, answering telnet negotiation on the way.
async fn expect_prompt<S>(
    stream: &mut S,
    codec: &mut TelnetCodec,
    prompt: &str,
    limit: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(limit, read_through(stream, codec, prompt))
        .await
        .map_err(|_| SessionError::PromptTimeout {
            prompt: prompt.to_string(),
        })?
}

async fn read_through<S>(stream: &mut S, codec: &mut TelnetCodec, prompt: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    loop {
        if codec.consume_through(prompt) {
            return Ok(());
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(SessionError::Disconnected);
        }
        codec.push(&buf[..n]);
        let replies = codec.take_replies();
        if !replies.is_empty() {
            write_raw(stream, &replies).await?;
        }
    }
}

async fn write_line<S: AsyncWrite + Unpin>(stream: &mut S, text: &str) -> Result<()> {
    write_raw(stream, format!("{text}\n").as_bytes()).await?;
    Ok(())
}

async fn write_raw<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes).await?;
    stream.flush().await
}
