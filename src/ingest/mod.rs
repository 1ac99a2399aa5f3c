//! Frame ingestion.
//!
//! This module turns a camera's HTTP response into discrete encoded frames:
//! - `connection`: the `ConnectionSource` transport seam and stream targets
//! - `http`: blocking HTTP transport (feature: ingest-http)
//! - `replay`: scripted or captured responses (offline runs, tests)
//! - `multipart`: boundary parsing and part location
//! - `buffer`: the fixed-capacity reassembly buffer
//! - `demux`: the `StreamDemuxer` state machine
//!
//! The ingestion layer MUST NOT:
//! - Decode pixel data
//! - Grow its buffers past their configured capacity
//! - Carry partial frame data across a reconnect

pub mod buffer;
pub mod connection;
pub mod demux;
#[cfg(feature = "ingest-http")]
pub mod http;
pub mod multipart;
pub mod replay;

pub use buffer::ByteBuffer;
pub use connection::{ConnectionSource, ResponseHead, StreamTarget, TransportError};
pub use demux::{DemuxConfig, FetchError, FramingError, StreamDemuxer, StreamState, StreamStats};
#[cfg(feature = "ingest-http")]
pub use http::{HttpConfig, HttpConnection};
pub use multipart::StreamMode;
pub use replay::{ReplayConnection, ReplayResponse, ReplayStep};
