//! HTTP connection source for ESP32-CAM and IP camera streams.

use std::io::{ErrorKind, Read};
use std::time::Duration;

use super::connection::{ConnectionSource, ResponseHead, TransportError};

/// Timeouts for [`HttpConnection`].
#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Bound on a single blocking body read.
    pub read_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Blocking HTTP transport built on `ureq`.
///
/// A read that times out reports zero bytes; end of body marks the
/// connection exhausted.
pub struct HttpConnection {
    agent: ureq::Agent,
    reader: Option<Box<dyn Read + Send + Sync>>,
    exhausted: bool,
}

impl HttpConnection {
    pub fn new(config: HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Self {
            agent,
            reader: None,
            exhausted: false,
        }
    }
}

impl Default for HttpConnection {
    fn default() -> Self {
        Self::new(HttpConfig::default())
    }
}

impl ConnectionSource for HttpConnection {
    fn open(&mut self, host: &str, port: u16, path: &str) -> Result<ResponseHead, TransportError> {
        self.close();
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        let url = format!("http://{}:{}{}", host, port, path);
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Ok(ResponseHead {
                    status: code,
                    content_type: None,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(TransportError::Connect {
                    target: url,
                    reason: transport.to_string(),
                })
            }
        };
        let head = ResponseHead {
            status: response.status(),
            content_type: response.header("Content-Type").map(str::to_string),
        };
        self.reader = Some(response.into_reader());
        self.exhausted = false;
        Ok(head)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let reader = self.reader.as_mut().ok_or(TransportError::Closed)?;
        match reader.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.exhausted = true;
                Ok(0)
            }
            Ok(read) => Ok(read),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => {
                self.close();
                Err(TransportError::Io(err))
            }
        }
    }

    fn available(&self) -> bool {
        self.reader.is_some() && !self.exhausted
    }

    fn close(&mut self) {
        self.reader = None;
        self.exhausted = false;
    }
}
