// MIT License - Copyright (c) 2021 TJForc
// Transports to the integration terminal

pub mod direct;
pub mod telnet;

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Opens byte streams to the integration terminal.
///
/// The session calls `connect` once per (re)connection and runs the login
/// sequence itself, so implementations only provide the raw stream.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new stream.
    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Peer description for log records.
    fn describe(&self) -> String;
}

pub use direct::TcpConnector;
pub use telnet::{TelnetCodec, TelnetReader};
