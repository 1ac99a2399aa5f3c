//! Replay connection source.
//!
//! `ReplayConnection` serves pre-recorded responses instead of talking to a
//! camera. Each `open` consumes the next scripted response; a response body is
//! a sequence of data chunks, stalls (empty reads) and read failures. Used for
//! offline runs against a captured stream and throughout the tests.

use std::collections::VecDeque;
use std::io;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use super::connection::{ConnectionSource, ResponseHead, TransportError};

/// One step of a scripted response body.
#[derive(Clone, Debug)]
pub enum ReplayStep {
    Data(Vec<u8>),
    /// A read that returns no bytes while the connection stays open.
    Stall,
    /// A read that fails with a reset connection.
    Fail,
}

/// A scripted response: head plus body steps.
#[derive(Clone, Debug)]
pub struct ReplayResponse {
    head: ResponseHead,
    steps: VecDeque<ReplayStep>,
}

impl ReplayResponse {
    pub fn new(head: ResponseHead) -> Self {
        Self {
            head,
            steps: VecDeque::new(),
        }
    }

    pub fn data(mut self, bytes: Vec<u8>) -> Self {
        self.steps.push_back(ReplayStep::Data(bytes));
        self
    }

    /// Append `bytes` split into chunks of at most `chunk` bytes.
    pub fn chunked(mut self, bytes: &[u8], chunk: usize) -> Self {
        for piece in bytes.chunks(chunk.max(1)) {
            self.steps.push_back(ReplayStep::Data(piece.to_vec()));
        }
        self
    }

    pub fn stall(mut self) -> Self {
        self.steps.push_back(ReplayStep::Stall);
        self
    }

    pub fn fail(mut self) -> Self {
        self.steps.push_back(ReplayStep::Fail);
        self
    }
}

/// Connection source replaying scripted responses.
pub struct ReplayConnection {
    responses: VecDeque<ReplayResponse>,
    repeat: Option<ReplayResponse>,
    active: Option<VecDeque<ReplayStep>>,
    opens: u32,
    bytes_served: u64,
}

impl ReplayConnection {
    /// Serve `responses` in order, one per `open`.
    pub fn new(responses: Vec<ReplayResponse>) -> Self {
        Self {
            responses: responses.into(),
            repeat: None,
            active: None,
            opens: 0,
            bytes_served: 0,
        }
    }

    /// Serve the same response on every `open`.
    pub fn repeating(response: ReplayResponse) -> Self {
        Self {
            responses: VecDeque::new(),
            repeat: Some(response),
            active: None,
            opens: 0,
            bytes_served: 0,
        }
    }

    /// Replay a captured response body from disk, re-served on every connection.
    pub fn from_capture(path: &Path, content_type: &str, chunk: usize) -> Result<Self> {
        if content_type.trim().is_empty() {
            return Err(anyhow!("replay content type must not be empty"));
        }
        let body = std::fs::read(path)
            .with_context(|| format!("read stream capture {}", path.display()))?;
        if body.is_empty() {
            return Err(anyhow!("stream capture {} is empty", path.display()));
        }
        let response = ReplayResponse::new(ResponseHead::ok(content_type)).chunked(&body, chunk);
        Ok(Self::repeating(response))
    }

    /// Number of successful `open` calls.
    pub fn opens(&self) -> u32 {
        self.opens
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served
    }
}

impl ConnectionSource for ReplayConnection {
    fn open(&mut self, host: &str, port: u16, path: &str) -> Result<ResponseHead, TransportError> {
        let response = match self.responses.pop_front() {
            Some(response) => response,
            None => self.repeat.clone().ok_or_else(|| TransportError::Connect {
                target: format!("{}:{}{}", host, port, path),
                reason: "replay exhausted".to_string(),
            })?,
        };
        self.opens += 1;
        self.active = Some(response.steps);
        Ok(response.head)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let steps = self.active.as_mut().ok_or(TransportError::Closed)?;
        match steps.pop_front() {
            None | Some(ReplayStep::Stall) => Ok(0),
            Some(ReplayStep::Fail) => {
                self.active = None;
                Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "replayed connection reset",
                )))
            }
            Some(ReplayStep::Data(bytes)) => {
                let take = bytes.len().min(buf.len());
                buf[..take].copy_from_slice(&bytes[..take]);
                if take < bytes.len() {
                    steps.push_front(ReplayStep::Data(bytes[take..].to_vec()));
                }
                self.bytes_served += take as u64;
                Ok(take)
            }
        }
    }

    fn available(&self) -> bool {
        self.active.as_ref().is_some_and(|steps| !steps.is_empty())
    }

    fn close(&mut self) {
        self.active = None;
    }
}
