//! Byte-stream transport seam used by the demuxer.

use std::fmt;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use url::Url;

/// Where to request the camera stream from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl StreamTarget {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Parse an `http://host[:port]/path` URL. The port defaults to 80.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).with_context(|| format!("parse stream url '{}'", raw))?;
        if url.scheme() != "http" {
            return Err(anyhow!(
                "unsupported stream scheme '{}'; expected http",
                url.scheme()
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("stream url '{}' missing host", raw))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self { host, port, path })
    }
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Status line and headers relevant to stream-mode detection.
#[derive(Clone, Debug, Default)]
pub struct ResponseHead {
    pub status: u16,
    pub content_type: Option<String>,
}

impl ResponseHead {
    pub fn ok(content_type: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.into()),
        }
    }
}

/// Connection-level failures. All are recoverable by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("no stream target configured")]
    NoTarget,
    #[error("stream closed by peer")]
    Closed,
    #[error("stream stalled after {0} empty reads")]
    Stalled(u32),
    #[error("stream read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract byte-stream transport.
///
/// `read` returning `Ok(0)` means no bytes arrived within the read timeout.
/// Once the peer has finished sending, `available` reports `false`.
pub trait ConnectionSource: Send {
    /// Issue the request and read the response head.
    fn open(&mut self, host: &str, port: u16, path: &str) -> Result<ResponseHead, TransportError>;

    /// Read up to `buf.len()` body bytes.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Whether the connection is open and may still yield bytes.
    fn available(&self) -> bool;

    /// Tear down the connection. Safe to call when already closed.
    fn close(&mut self);
}

impl<C: ConnectionSource + ?Sized> ConnectionSource for Box<C> {
    fn open(&mut self, host: &str, port: u16, path: &str) -> Result<ResponseHead, TransportError> {
        (**self).open(host, port, path)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn available(&self) -> bool {
        (**self).available()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
