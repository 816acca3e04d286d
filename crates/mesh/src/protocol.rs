//! Gateway wire protocol
//!
//! Every message travels as one frame: a 4-byte big-endian length followed by
//! that many bytes of UTF-8. A connection carries exactly one command, opened
//! by a command frame `<token>[ <origin>]`, and the exchange that follows is
//! fixed per command.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{MeshError, MeshResult};

/// Largest payload accepted in one frame (1 MiB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Acknowledgement and success reply
pub const REPLY_OK: &str = "ok";
/// Generic failure reply
pub const REPLY_ERROR: &str = "error";
/// Platform-side trust rejection
pub const REPLY_PLATFORM_REJECTED: &str = "authentication rejected";
/// Domain-side trust rejection on `consume`
pub const REPLY_DOMAIN_REJECTED: &str = "Authentication rejected";

const LENGTH_PREFIX: usize = 4;

/// Closed set of command tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Announce the caller to the platform
    Hello,
    /// Ask the platform for the product catalog
    Discover,
    /// Register one product under the caller's record
    RegisterProduct,
    /// Ask the platform for a trust decision
    Authenticate,
    /// Pull a product from its owning domain
    Consume,
}

impl Command {
    /// Wire token
    pub fn token(&self) -> &'static str {
        match self {
            Command::Hello => "hello",
            Command::Discover => "discover",
            Command::RegisterProduct => "discover/registration",
            Command::Authenticate => "authenticate",
            Command::Consume => "consume",
        }
    }

    /// Parse a wire token; tokens are case sensitive
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "hello" => Some(Command::Hello),
            "discover" => Some(Command::Discover),
            "discover/registration" => Some(Command::RegisterProduct),
            "authenticate" => Some(Command::Authenticate),
            "consume" => Some(Command::Consume),
            _ => None,
        }
    }
}

/// First frame of every connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Requested command
    pub command: Command,
    /// Advertised `host:port` of the caller, when it has one
    pub origin: Option<String>,
}

impl CommandLine {
    /// Command without an origin
    pub fn new(command: Command) -> Self {
        Self {
            command,
            origin: None,
        }
    }

    /// Command carrying the caller's advertised address
    pub fn with_origin(command: Command, origin: impl Into<String>) -> Self {
        Self {
            command,
            origin: Some(origin.into()),
        }
    }

    /// Parse a command frame
    pub fn parse(raw: &str) -> MeshResult<Self> {
        let mut parts = raw.split_whitespace();
        let token = parts
            .next()
            .ok_or_else(|| MeshError::MalformedMessage("empty command".to_string()))?;
        let command = Command::from_token(token)
            .ok_or_else(|| MeshError::MalformedMessage(format!("unknown command '{token}'")))?;
        let origin = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(MeshError::MalformedMessage(format!(
                "trailing fields in command {raw:?}"
            )));
        }
        if let Some(origin) = origin.as_deref() {
            validate_address(origin)?;
        }
        Ok(Self { command, origin })
    }

    /// Render as a command frame payload
    pub fn to_frame(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{} {}", self.command.token(), origin),
            None => self.command.token().to_string(),
        }
    }
}

/// `authenticate` payload: `<action>/<address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Action wire word; interpreted by the trust evaluator
    pub action: String,
    /// Address whose evidence is checked
    pub address: String,
}

impl AuthRequest {
    /// Build a request
    pub fn new(action: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            address: address.into(),
        }
    }

    /// Parse the payload; a missing `/` or empty address is malformed
    pub fn parse(raw: &str) -> MeshResult<Self> {
        let (action, address) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| MeshError::MalformedMessage(format!("expected action/address, got {raw:?}")))?;
        if address.is_empty() || address.contains(is_reserved_char) {
            return Err(MeshError::MalformedMessage(format!(
                "invalid authenticate address {address:?}"
            )));
        }
        Ok(Self::new(action, address))
    }

    /// Render the payload
    pub fn to_payload(&self) -> String {
        format!("{}/{}", self.action, self.address)
    }
}

/// Characters that would corrupt an audit line
fn is_reserved_char(c: char) -> bool {
    c == ';' || c.is_whitespace()
}

/// Check that `address` looks like `host:port`
pub fn validate_address(address: &str) -> MeshResult<()> {
    match address.rsplit_once(':') {
        Some((host, port))
            if !host.is_empty()
                && !host.contains(is_reserved_char)
                && port.parse::<u16>().is_ok() =>
        {
            Ok(())
        }
        _ => Err(MeshError::InvalidAddress(address.to_string())),
    }
}

/// Identity of the caller on an accepted connection.
///
/// A declared origin is only honoured when its host is the IP the connection
/// comes from; without one the caller is the bare peer IP.
pub fn resolve_caller(origin: Option<&str>, peer: SocketAddr) -> MeshResult<String> {
    let peer_ip = peer.ip().to_canonical();
    let Some(origin) = origin else {
        return Ok(peer_ip.to_string());
    };

    let host = origin
        .rsplit_once(':')
        .map(|(host, _)| host.trim_start_matches('[').trim_end_matches(']'))
        .ok_or_else(|| MeshError::InvalidAddress(origin.to_string()))?;
    match host.parse::<IpAddr>() {
        Ok(ip) if ip.to_canonical() == peer_ip => Ok(origin.to_string()),
        _ => Err(MeshError::OriginMismatch {
            origin: origin.to_string(),
            peer: peer_ip.to_string(),
        }),
    }
}

/// Length-prefixed frame reader/writer over any byte stream.
///
/// Each read and each write is bounded by the same deadline.
#[derive(Debug)]
pub struct Framed<S> {
    stream: S,
    timeout: Duration,
    max_len: usize,
}

impl<S> Framed<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream with the default frame limit
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream,
            timeout,
            max_len: MAX_FRAME_LEN,
        }
    }

    /// Override the frame size limit
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Read one frame and decode it as UTF-8.
    ///
    /// A payload split across several segments is reassembled; a length above
    /// the limit fails before any payload byte is read.
    pub async fn read_frame(&mut self) -> MeshResult<String> {
        let mut prefix = [0u8; LENGTH_PREFIX];
        with_deadline(self.timeout, "read frame length", self.stream.read_exact(&mut prefix))
            .await?;

        let len = u32::from_be_bytes(prefix) as usize;
        if len > self.max_len {
            return Err(MeshError::FrameTooLarge {
                len,
                max: self.max_len,
            });
        }

        let mut payload = vec![0u8; len];
        with_deadline(self.timeout, "read frame payload", self.stream.read_exact(&mut payload))
            .await?;

        let text = String::from_utf8(payload)
            .map_err(|e| MeshError::MalformedMessage(format!("frame is not UTF-8: {e}")))?;
        trace!(len, "Frame received");
        Ok(text)
    }

    /// Write one frame and flush it
    pub async fn write_frame(&mut self, payload: &str) -> MeshResult<()> {
        let bytes = payload.as_bytes();
        if bytes.len() > self.max_len {
            return Err(MeshError::FrameTooLarge {
                len: bytes.len(),
                max: self.max_len,
            });
        }

        let mut buffer = Vec::with_capacity(LENGTH_PREFIX + bytes.len());
        buffer.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buffer.extend_from_slice(bytes);

        with_deadline(self.timeout, "write frame", self.stream.write_all(&buffer)).await?;
        with_deadline(self.timeout, "flush frame", self.stream.flush()).await?;
        trace!(len = bytes.len(), "Frame sent");
        Ok(())
    }

    /// Send the opening command frame
    pub async fn send_command(&mut self, line: &CommandLine) -> MeshResult<()> {
        self.write_frame(&line.to_frame()).await
    }

    /// Read the opening command frame
    pub async fn read_command(&mut self) -> MeshResult<CommandLine> {
        let raw = self.read_frame().await?;
        CommandLine::parse(&raw)
    }

    /// Read a frame and require it to equal `expected`
    pub async fn expect(&mut self, expected: &str) -> MeshResult<()> {
        let got = self.read_frame().await?;
        if got == expected {
            Ok(())
        } else {
            Err(MeshError::UnexpectedReply {
                expected: expected.to_string(),
                got,
            })
        }
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

async fn with_deadline<T, F>(timeout: Duration, what: &str, op: F) -> MeshResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, op).await {
        Err(_) => Err(MeshError::Timeout(what.to_string())),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(MeshError::ConnectionClosed),
        Ok(result) => Ok(result?),
    }
}
