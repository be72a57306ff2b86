// MIT License - Copyright (c) 2021 TJForc
// Direct TCP connection to the integration terminal

use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, error};

use crate::config::LutronConfig;
use crate::error::{Result, SessionError};
use crate::transport::Connector;

/// Connects to the controller's telnet port over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
        }
    }

    pub fn from_config(config: &LutronConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.connect_timeout())
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<TcpStream> {
        let address = format!("{}:{}", self.host, self.port);
        let stream = timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                error!("TCP connect to {} timed out", address);
                SessionError::ConnectTimeout
            })?
            .map_err(|e| {
                error!("TCP connect to {} failed: {}", address, e);
                SessionError::Io(e)
            })?;
        stream.set_nodelay(true)?;
        debug!("TCP socket connected to {}", address);
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
