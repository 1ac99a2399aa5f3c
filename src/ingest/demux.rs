//! Stream demultiplexer.
//!
//! `StreamDemuxer` turns the body of an HTTP camera response into discrete
//! encoded frames. Two response shapes are supported:
//!
//! - `multipart/x-mixed-replace` streams, cut at the boundary token;
//! - single-shot responses carrying one bare JPEG, after which the
//!   connection is torn down and must be re-established.
//!
//! All buffering goes through one fixed-capacity [`ByteBuffer`]. When data
//! stops resolving into frames the oldest bytes are discarded; memory use
//! never grows past the configured capacity.

use std::time::{Duration, Instant};

use thiserror::Error;

use super::buffer::ByteBuffer;
use super::connection::{ConnectionSource, StreamTarget, TransportError};
use super::multipart::{detect_mode, find_jpeg_bounds, scan_part, PartScan, StreamMode};
use crate::frame::Frame;
use crate::watchdog::{sleep_with_heartbeat, Heartbeat, NoHeartbeat};

const DEFAULT_BUFFER_BYTES: usize = 100 * 1024;
const DEFAULT_READ_CHUNK: usize = 4096;
const HEALTH_GRACE: Duration = Duration::from_secs(5);

/// Tuning for a [`StreamDemuxer`].
#[derive(Clone, Debug)]
pub struct DemuxConfig {
    /// Fixed scratch buffer size in bytes.
    pub buffer_capacity: usize,
    /// Upper bound for a single read from the connection.
    pub read_chunk: usize,
    /// Consecutive empty reads tolerated before the stream is declared stalled.
    pub max_stalled_reads: u32,
    /// Empty reads tolerated while draining a single-shot response.
    pub single_shot_attempts: u32,
    /// Reads allowed in one `fetch_frame` call before giving up for this cycle.
    pub max_reads_per_fetch: u32,
    /// Pause after an empty read.
    pub stall_poll: Duration,
    /// Fixed backoff before a reconnect handshake.
    pub reconnect_delay: Duration,
    /// Longest sleep between heartbeats while backing off.
    pub heartbeat_slice: Duration,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_BYTES,
            read_chunk: DEFAULT_READ_CHUNK,
            max_stalled_reads: 50,
            single_shot_attempts: 50,
            max_reads_per_fetch: 512,
            stall_poll: Duration::from_millis(10),
            reconnect_delay: Duration::from_secs(1),
            heartbeat_slice: Duration::from_millis(100),
        }
    }
}

/// Why a fetch produced no frame.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("stream not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no complete frame: {0}")]
    Framing(#[from] FramingError),
    #[error("failed to allocate {requested} bytes")]
    Allocation { requested: usize },
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Transport loss requires a reconnect; other failures resolve on a later cycle.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, FetchError::NotConnected | FetchError::Transport(_))
    }
}

/// Framing failures. The cycle yields no frame and the stream stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("no complete part after {reads} reads ({buffered} bytes buffered)")]
    Incomplete { reads: u32, buffered: usize },
    #[error("no jpeg image in {buffered} byte response")]
    NoImage { buffered: usize },
}

/// Connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Multipart,
    SingleShot,
    /// The last handshake failed.
    Failed,
}

/// Point-in-time counters for rate reporting.
#[derive(Clone, Debug)]
pub struct StreamStats {
    pub state: StreamState,
    pub frames: u64,
    pub average_fps: f32,
    pub discarded_bytes: u64,
    pub reconnects: u64,
    pub target: Option<String>,
}

/// Reconstructs frames from a [`ConnectionSource`].
pub struct StreamDemuxer<C: ConnectionSource> {
    source: C,
    config: DemuxConfig,
    buffer: ByteBuffer,
    target: Option<StreamTarget>,
    state: StreamState,
    boundary: Vec<u8>,
    frame_count: u64,
    first_frame_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    discarded_bytes: u64,
    reconnects: u64,
}

impl<C: ConnectionSource> StreamDemuxer<C> {
    /// Build a demuxer. Fails only if the scratch buffer cannot be allocated.
    pub fn new(source: C, config: DemuxConfig) -> Result<Self, FetchError> {
        let buffer = ByteBuffer::with_capacity(config.buffer_capacity)?;
        Ok(Self {
            source,
            config,
            buffer,
            target: None,
            state: StreamState::Disconnected,
            boundary: Vec::new(),
            frame_count: 0,
            first_frame_at: None,
            last_frame_at: None,
            discarded_bytes: 0,
            reconnects: 0,
        })
    }

    /// Request the stream and decide between multipart and single-shot framing.
    pub fn connect(&mut self, target: StreamTarget) -> Result<StreamMode, TransportError> {
        self.teardown();
        log::info!("connecting to camera stream {}", target);
        let result = self.handshake(&target);
        self.target = Some(target);
        result
    }

    fn handshake(&mut self, target: &StreamTarget) -> Result<StreamMode, TransportError> {
        let head = match self.source.open(&target.host, target.port, &target.path) {
            Ok(head) => head,
            Err(err) => {
                log::warn!("stream handshake with {} failed: {}", target, err);
                self.state = StreamState::Failed;
                return Err(err);
            }
        };
        if head.status != 200 {
            log::warn!("stream {} answered http {}", target, head.status);
            self.source.close();
            self.state = StreamState::Failed;
            return Err(TransportError::Status(head.status));
        }

        let mode = detect_mode(head.content_type.as_deref());
        match &mode {
            StreamMode::Multipart { boundary } => {
                log::info!(
                    "multipart stream, boundary {}",
                    String::from_utf8_lossy(boundary)
                );
                self.boundary = boundary.clone();
                self.state = StreamState::Multipart;
            }
            StreamMode::SingleShot => {
                log::info!(
                    "content type {:?} is not multipart; using single-shot mode",
                    head.content_type.as_deref().unwrap_or("")
                );
                self.boundary.clear();
                self.state = StreamState::SingleShot;
            }
        }
        Ok(mode)
    }

    /// Extract the next frame.
    pub fn fetch_frame(&mut self) -> Result<Frame, FetchError> {
        self.fetch_frame_with(&mut NoHeartbeat)
    }

    /// Extract the next frame, beating `heartbeat` between reads.
    ///
    /// Cancellation through the heartbeat discards any partially buffered data.
    pub fn fetch_frame_with(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Frame, FetchError> {
        match self.state {
            StreamState::Multipart => self.fetch_multipart(heartbeat),
            StreamState::SingleShot => self.fetch_single_shot(heartbeat),
            StreamState::Disconnected | StreamState::Failed => Err(FetchError::NotConnected),
        }
    }

    fn fetch_multipart(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Frame, FetchError> {
        let boundary = self.boundary.clone();
        let mut reads = 0u32;
        let mut stalls = 0u32;
        loop {
            if !heartbeat.beat() {
                self.buffer.clear();
                return Err(FetchError::Cancelled);
            }

            match scan_part(self.buffer.as_slice(), &boundary) {
                PartScan::Frame { start, end } => {
                    let frame = self.copy_frame(start, end);
                    self.buffer.consume(end);
                    return frame;
                }
                PartScan::Empty { next } => {
                    log::debug!("skipping empty multipart part");
                    self.buffer.consume(next);
                    continue;
                }
                PartScan::NoBoundary | PartScan::Incomplete { .. } => {}
            }

            if self.buffer.len() > self.recovery_threshold() {
                self.discard_unresolved(&boundary);
            }

            if reads >= self.config.max_reads_per_fetch {
                return Err(FramingError::Incomplete {
                    reads,
                    buffered: self.buffer.len(),
                }
                .into());
            }
            reads += 1;

            if self.pull()? == 0 {
                if !self.source.available() {
                    log::warn!("camera stream closed by peer");
                    self.drop_connection();
                    return Err(TransportError::Closed.into());
                }
                stalls += 1;
                if stalls > self.config.max_stalled_reads {
                    log::warn!("camera stream stalled after {} empty reads", stalls);
                    self.drop_connection();
                    return Err(TransportError::Stalled(stalls).into());
                }
                self.pause();
            } else {
                stalls = 0;
            }
        }
    }

    fn fetch_single_shot(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Frame, FetchError> {
        let mut empty_reads = 0u32;
        let mut reads = 0u32;
        while empty_reads < self.config.single_shot_attempts
            && reads < self.config.max_reads_per_fetch
        {
            if !heartbeat.beat() {
                self.drop_connection();
                return Err(FetchError::Cancelled);
            }
            reads += 1;
            if self.pull()? == 0 {
                if !self.source.available() {
                    break;
                }
                empty_reads += 1;
                self.pause();
            }
        }

        let buffered = self.buffer.len();
        let result = match find_jpeg_bounds(self.buffer.as_slice()) {
            Some((start, end)) => self.copy_frame(start, end),
            None => Err(FramingError::NoImage { buffered }.into()),
        };
        if let Err(err) = &result {
            log::debug!("single-shot response yielded no frame: {}", err);
        }
        self.drop_connection();
        result
    }

    /// Read one chunk into the buffer, compacting first when it is full.
    fn pull(&mut self) -> Result<usize, FetchError> {
        if self.buffer.is_full() {
            let discarded = self.buffer.compact_half();
            self.discarded_bytes += discarded as u64;
            log::warn!("stream buffer full; discarded oldest {} bytes", discarded);
        }
        let chunk = self.config.read_chunk;
        let source = &mut self.source;
        match self.buffer.fill_with(chunk, |spare| source.read(spare)) {
            Ok(read) => Ok(read),
            Err(err) => {
                log::warn!("camera stream read failed: {}", err);
                self.drop_connection();
                Err(err.into())
            }
        }
    }

    /// Drop an unresolvable prefix once the buffer is nearly exhausted.
    fn discard_unresolved(&mut self, boundary: &[u8]) {
        // A boundary at the very front starts the unresolved part; look past it.
        let next = match self.buffer.find(boundary, 0) {
            Some(0) => self.buffer.find(boundary, 1),
            found => found,
        };
        let discarded = match next {
            Some(pos) => {
                self.buffer.consume(pos);
                pos
            }
            None => self
                .buffer
                .retain_tail(boundary.len().saturating_sub(1)),
        };
        self.discarded_bytes += discarded as u64;
        log::warn!(
            "oversized or corrupt frame; discarded {} unresolved bytes",
            discarded
        );
    }

    fn copy_frame(&mut self, start: usize, end: usize) -> Result<Frame, FetchError> {
        let len = end - start;
        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            log::error!("failed to allocate {} byte frame; dropping it", len);
            return Err(FetchError::Allocation { requested: len });
        }
        data.extend_from_slice(&self.buffer.as_slice()[start..end]);

        let now = Instant::now();
        self.frame_count += 1;
        self.first_frame_at.get_or_insert(now);
        self.last_frame_at = Some(now);
        Ok(Frame::new(data, self.frame_count))
    }

    fn recovery_threshold(&self) -> usize {
        self.buffer.capacity() / 8 * 7
    }

    fn pause(&self) {
        if !self.config.stall_poll.is_zero() {
            std::thread::sleep(self.config.stall_poll);
        }
    }

    /// Tear down and re-run the handshake against the last target after the backoff delay.
    pub fn reconnect(&mut self) -> Result<StreamMode, FetchError> {
        self.reconnect_with(&mut NoHeartbeat)
    }

    /// Reconnect, beating `heartbeat` while backing off.
    pub fn reconnect_with(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<StreamMode, FetchError> {
        let target = self.target.clone().ok_or(TransportError::NoTarget)?;
        self.disconnect();
        if !sleep_with_heartbeat(
            self.config.reconnect_delay,
            self.config.heartbeat_slice,
            heartbeat,
        ) {
            return Err(FetchError::Cancelled);
        }
        self.reconnects += 1;
        log::info!("reconnecting to camera stream {}", target);
        self.handshake(&target).map_err(FetchError::from)
    }

    /// Close the connection and drop any partially buffered frame.
    pub fn disconnect(&mut self) {
        if matches!(self.state, StreamState::Multipart | StreamState::SingleShot) {
            log::info!("disconnected from camera stream");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.source.close();
        self.buffer.clear();
        self.state = StreamState::Disconnected;
    }

    fn drop_connection(&mut self) {
        self.teardown();
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, StreamState::Multipart | StreamState::SingleShot)
            && self.source.available()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn target(&self) -> Option<&StreamTarget> {
        self.target.as_ref()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second since the first extracted frame.
    pub fn average_fps(&self) -> f32 {
        self.average_fps_at(Instant::now())
    }

    fn average_fps_at(&self, now: Instant) -> f32 {
        let Some(first) = self.first_frame_at else {
            return 0.0;
        };
        let elapsed = now.saturating_duration_since(first).as_secs_f32();
        if elapsed <= f32::EPSILON {
            return 0.0;
        }
        self.frame_count as f32 / elapsed
    }

    /// Connected and producing frames recently.
    pub fn is_healthy(&self) -> bool {
        if !matches!(self.state, StreamState::Multipart | StreamState::SingleShot) {
            return false;
        }
        match self.last_frame_at {
            Some(last) => last.elapsed() <= HEALTH_GRACE,
            None => true,
        }
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            state: self.state,
            frames: self.frame_count,
            average_fps: self.average_fps(),
            discarded_bytes: self.discarded_bytes,
            reconnects: self.reconnects,
            target: self.target.as_ref().map(|target| target.to_string()),
        }
    }

    /// Bytes currently held in the scratch buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn source(&self) -> &C {
        &self.source
    }
}

impl<C: ConnectionSource> Drop for StreamDemuxer<C> {
    fn drop(&mut self) {
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::connection::ResponseHead;
    use crate::ingest::replay::{ReplayConnection, ReplayResponse};

    fn config() -> DemuxConfig {
        DemuxConfig {
            buffer_capacity: 256,
            read_chunk: 32,
            stall_poll: Duration::ZERO,
            reconnect_delay: Duration::ZERO,
            ..DemuxConfig::default()
        }
    }

    fn target() -> StreamTarget {
        StreamTarget::new("camera.local", 81, "/stream")
    }

    fn part(payload: &[u8]) -> Vec<u8> {
        let mut bytes = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    #[test]
    fn multipart_frames_are_cut_at_boundaries() {
        let mut body = part(b"first");
        body.extend(part(b"second"));
        body.extend_from_slice(b"--frame\r\n");
        let response =
            ReplayResponse::new(ResponseHead::ok("multipart/x-mixed-replace; boundary=frame"))
                .chunked(&body, 7);
        let mut demux =
            StreamDemuxer::new(ReplayConnection::new(vec![response]), config()).unwrap();
        demux.connect(target()).unwrap();
        assert_eq!(demux.state(), StreamState::Multipart);

        let first = demux.fetch_frame().unwrap();
        assert_eq!(first.as_bytes(), b"first\r\n");
        assert_eq!(first.sequence(), 1);
        let second = demux.fetch_frame().unwrap();
        assert_eq!(second.as_bytes(), b"second\r\n");
        assert_eq!(demux.frame_count(), 2);
    }

    #[test]
    fn closed_stream_disconnects() {
        let response =
            ReplayResponse::new(ResponseHead::ok("multipart/x-mixed-replace; boundary=frame"))
                .data(b"--frame\r\n\r\nhalf".to_vec());
        let mut demux =
            StreamDemuxer::new(ReplayConnection::new(vec![response]), config()).unwrap();
        demux.connect(target()).unwrap();
        let err = demux.fetch_frame().unwrap_err();
        assert!(matches!(err, FetchError::Transport(TransportError::Closed)));
        assert!(err.needs_reconnect());
        assert_eq!(demux.state(), StreamState::Disconnected);
        assert_eq!(demux.buffered_len(), 0);
    }

    #[test]
    fn stalled_stream_disconnects_after_retry_bound() {
        let mut response =
            ReplayResponse::new(ResponseHead::ok("multipart/x-mixed-replace; boundary=frame"));
        for _ in 0..10 {
            response = response.stall();
        }
        response = response.data(part(b"late"));
        let mut demux = StreamDemuxer::new(
            ReplayConnection::new(vec![response]),
            DemuxConfig {
                max_stalled_reads: 3,
                ..config()
            },
        )
        .unwrap();
        demux.connect(target()).unwrap();
        let err = demux.fetch_frame().unwrap_err();
        assert!(matches!(err, FetchError::Transport(TransportError::Stalled(4))));
        assert!(!demux.is_connected());
    }

    #[test]
    fn http_error_status_fails_handshake() {
        let response = ReplayResponse::new(ResponseHead {
            status: 404,
            content_type: Some("text/html".to_string()),
        });
        let mut demux =
            StreamDemuxer::new(ReplayConnection::new(vec![response]), config()).unwrap();
        let err = demux.connect(target()).unwrap_err();
        assert!(matches!(err, TransportError::Status(404)));
        assert_eq!(demux.state(), StreamState::Failed);
        assert!(matches!(
            demux.fetch_frame().unwrap_err(),
            FetchError::NotConnected
        ));
    }

    #[test]
    fn cancellation_discards_partial_data() {
        let response =
            ReplayResponse::new(ResponseHead::ok("multipart/x-mixed-replace; boundary=frame"))
                .data(b"--frame\r\n\r\npartial".to_vec())
                .stall()
                .stall();
        let mut demux =
            StreamDemuxer::new(ReplayConnection::new(vec![response]), config()).unwrap();
        demux.connect(target()).unwrap();
        let mut beats = 0;
        let mut heartbeat = || {
            beats += 1;
            beats < 3
        };
        let err = demux.fetch_frame_with(&mut heartbeat).unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert_eq!(demux.buffered_len(), 0);
    }

    #[test]
    fn reconnect_without_target_is_rejected() {
        let mut demux = StreamDemuxer::new(ReplayConnection::new(vec![]), config()).unwrap();
        assert!(matches!(
            demux.reconnect().unwrap_err(),
            FetchError::Transport(TransportError::NoTarget)
        ));
    }

    #[test]
    fn average_fps_counts_from_first_frame() {
        let mut demux = StreamDemuxer::new(ReplayConnection::new(vec![]), config()).unwrap();
        assert_eq!(demux.average_fps(), 0.0);
        let start = Instant::now();
        demux.first_frame_at = Some(start);
        demux.frame_count = 20;
        let fps = demux.average_fps_at(start + Duration::from_secs(4));
        assert!((fps - 5.0).abs() < 1e-3);
    }
}
