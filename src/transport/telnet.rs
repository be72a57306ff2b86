// MIT License - Copyright (c) 2021 TJForc
// Telnet byte stream handling

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::constants::{DO, DONT, IAC, MAX_LINE_LEN, SB, SE, WILL, WONT};
use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ParseState {
    #[default]
    Data,
    /// After IAC
    Command,
    /// After IAC DO/DONT/WILL/WONT, waiting for the option byte
    Option(u8),
    /// Inside IAC SB ... IAC SE
    Subnegotiation,
    /// IAC inside a subnegotiation
    SubnegotiationCommand,
}

/// Strips telnet commands from the incoming byte stream and buffers the data.
///
/// Option requests are refused (`DO` → `WONT`, `WILL` → `DONT`); the replies
/// are queued for the caller to write back. State carries over between
/// `push` calls, so a command split across two reads is handled.
///
/// A partial line longer than `MAX_LINE_LEN` is dropped, along with the rest
/// of it up to the next newline.
#[derive(Debug, Default)]
pub struct TelnetCodec {
    state: ParseState,
    data: Vec<u8>,
    replies: Vec<u8>,
    /// Bytes buffered after the last newline
    partial: usize,
    /// Skipping the tail of an oversized line
    discarding: bool,
}

impl TelnetCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes read from the socket.
    pub fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = match self.state {
                ParseState::Data if byte == IAC => ParseState::Command,
                ParseState::Data => {
                    self.push_data(byte);
                    ParseState::Data
                }
                ParseState::Command => match byte {
                    IAC => {
                        self.push_data(IAC);
                        ParseState::Data
                    }
                    DO | DONT | WILL | WONT => ParseState::Option(byte),
                    SB => ParseState::Subnegotiation,
                    _ => ParseState::Data,
                },
                ParseState::Option(verb) => {
                    match verb {
                        DO => self.replies.extend_from_slice(&[IAC, WONT, byte]),
                        WILL => self.replies.extend_from_slice(&[IAC, DONT, byte]),
                        _ => {}
                    }
                    ParseState::Data
                }
                ParseState::Subnegotiation if byte == IAC => ParseState::SubnegotiationCommand,
                ParseState::Subnegotiation => ParseState::Subnegotiation,
                ParseState::SubnegotiationCommand if byte == SE => ParseState::Data,
                ParseState::SubnegotiationCommand => ParseState::Subnegotiation,
            };
        }
    }

    fn push_data(&mut self, byte: u8) {
        if self.discarding {
            self.discarding = byte != b'\n';
            return;
        }
        self.data.push(byte);
        if byte == b'\n' {
            self.partial = 0;
            return;
        }
        self.partial += 1;
        if self.partial > MAX_LINE_LEN {
            warn!("Dropping line longer than {MAX_LINE_LEN} bytes");
            self.data.truncate(self.data.len() - self.partial);
            self.partial = 0;
            self.discarding = true;
        }
    }

    /// Negotiation replies queued since the last call.
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    /// Pop the next complete line, without its line terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.data.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.data.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw);
        Some(line.trim_end_matches(['\r', '\n', '\0']).to_string())
    }

    /// Discard buffered data up to and including `prompt`.
    ///
    /// Returns false, leaving the buffer untouched, if the prompt has not
    /// arrived yet.
    pub fn consume_through(&mut self, prompt: &str) -> bool {
        let needle = prompt.as_bytes();
        if needle.is_empty() {
            return true;
        }
        match self.data.windows(needle.len()).position(|w| w == needle) {
            Some(start) => {
                self.data.drain(..start + needle.len());
                self.partial = match self.data.iter().rposition(|&b| b == b'\n') {
                    Some(end) => self.data.len() - end - 1,
                    None => self.data.len(),
                };
                true
            }
            None => false,
        }
    }
}

/// Reads lines from the read half of an authenticated session.
pub struct TelnetReader<R> {
    io: R,
    codec: TelnetCodec,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> TelnetReader<R> {
    /// Wrap `io`, keeping any data `codec` buffered during login.
    pub fn new(io: R, codec: TelnetCodec) -> Self {
        Self {
            io,
            codec,
            buf: vec![0u8; 4096],
        }
    }

    /// Wait for the next complete line.
    ///
    /// Cancel safe: bytes are only consumed from the socket together with
    /// being buffered, so dropping the future loses nothing.
    pub async fn next_line(&mut self) -> Result<String> {
        loop {
            if let Some(line) = self.codec.next_line() {
                return Ok(line);
            }
            let n = self.io.read(&mut self.buf).await?;
            if n == 0 {
                debug!("Reader: connection closed");
                return Err(SessionError::Disconnected);
            }
            self.codec.push(&self.buf[..n]);
            let replies = self.codec.take_replies();
            if !replies.is_empty() {
                // The write half belongs to the command sender; late
                // negotiation is left unanswered.
                debug!("Ignoring {} bytes of telnet negotiation", replies.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_lines_split_across_pushes() {
        let mut codec = TelnetCodec::new();
        codec.push(b"GNET> ~DEVI");
        assert_eq!(codec.next_line(), None);
        codec.push(b"CE,2,1,3\r\n~DEVICE,2,1,4\r\n~OUT");
        assert_eq!(codec.next_line().as_deref(), Some("GNET> ~DEVICE,2,1,3"));
        assert_eq!(codec.next_line().as_deref(), Some("~DEVICE,2,1,4"));
        assert_eq!(codec.next_line(), None);
    }

    #[test]
    fn test_option_negotiation_is_refused() {
        let mut codec = TelnetCodec::new();
        codec.push(&[IAC, DO, 1, IAC, WILL, 3, IAC, DONT, 5]);
        codec.push(b"login: ");
        assert_eq!(
            codec.take_replies(),
            vec![IAC, WONT, 1, IAC, DONT, 3]
        );
        assert!(codec.take_replies().is_empty());
        assert!(codec.consume_through("login: "));
    }

    #[test]
    fn test_command_split_across_pushes() {
        let mut codec = TelnetCodec::new();
        codec.push(&[b'a', IAC]);
        codec.push(&[DO]);
        codec.push(&[24, b'b', b'\n']);
        assert_eq!(codec.next_line().as_deref(), Some("ab"));
        assert_eq!(codec.take_replies(), vec![IAC, WONT, 24]);
    }

    #[test]
    fn test_subnegotiation_and_escaped_iac() {
        let mut codec = TelnetCodec::new();
        codec.push(&[IAC, SB, 24, 1, IAC, SE, b'x', IAC, IAC, b'\n']);
        let line = codec.next_line().unwrap();
        // 0xFF alone is not valid UTF-8
        assert!(line.starts_with('x'));
        assert_eq!(line.chars().count(), 2);
    }

    #[test]
    fn test_consume_through_prompt() {
        let mut codec = TelnetCodec::new();
        codec.push(b"\r\nWelcome\r\nlog");
        assert!(!codec.consume_through("login: "));
        codec.push(b"in: rest");
        assert!(codec.consume_through("login: "));
        codec.push(b"\n");
        assert_eq!(codec.next_line().as_deref(), Some("rest"));
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let mut codec = TelnetCodec::new();
        codec.push(b"~DEVICE,2,1,3\r\n");
        codec.push(&vec![b'x'; MAX_LINE_LEN]);
        codec.push(&vec![b'y'; 100]);
        assert!(codec.data.len() <= MAX_LINE_LEN + 16);
        codec.push(b"yyy\r\n~DEVICE,2,4,3\r\n");

        assert_eq!(codec.next_line().as_deref(), Some("~DEVICE,2,1,3"));
        assert_eq!(codec.next_line().as_deref(), Some("~DEVICE,2,4,3"));
        assert_eq!(codec.next_line(), None);
    }

    #[test]
    fn test_line_limit_counts_from_last_prompt() {
        let mut codec = TelnetCodec::new();
        codec.push(b"banner\r\nlogin: ");
        assert!(codec.consume_through("login: "));
        codec.push(&vec![b'z'; MAX_LINE_LEN - 1]);
        codec.push(b"\n");
        assert_eq!(codec.next_line().map(|l| l.len()), Some(MAX_LINE_LEN - 1));
    }

    #[tokio::test]
    async fn test_reader_yields_lines_then_disconnect() {
        let (mut controller, bridge) = tokio::io::duplex(256);
        let mut codec = TelnetCodec::new();
        codec.push(b"left");
        let mut reader = TelnetReader::new(bridge, codec);

        controller.write_all(b"over\r\nsecond\n").await.unwrap();
        assert_eq!(reader.next_line().await.unwrap(), "leftover");
        assert_eq!(reader.next_line().await.unwrap(), "second");

        drop(controller);
        assert!(matches!(
            reader.next_line().await,
            Err(SessionError::Disconnected)
        ));
    }
}
