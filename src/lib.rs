//! Presence Relay Kernel
//!
//! Turns a camera's MJPEG stream into relay switching: frames are pulled off
//! the wire, handed to a detection source, and the resulting rectangles are
//! mapped onto rectangular zones whose relay channels are driven on and off.
//!
//! # Guarantees
//!
//! 1. **Bounded ingest**: the stream buffer never grows past its configured capacity.
//! 2. **Single writer**: relay pins are written only by the [`zones::ZoneArbitrator`]
//!    that owns the output.
//! 3. **Shared channels**: a relay used by several zones stays on while any of them is active.
//! 4. **Fail off**: shutdown and emergency stop force every relay off.
//!
//! # Module Structure
//!
//! - `ingest`: connection sources, multipart framing and the `StreamDemuxer`
//! - `frame`: owned frame payloads
//! - `detect`: detection sources (frame differencing, block motion, ONNX)
//! - `zones`: zones, relay channels, outputs and the `ZoneArbitrator`
//! - `store`: zone persistence
//! - `config`: daemon configuration
//! - `control`: the control loop and its command channel
//! - `watchdog`: heartbeat, cancellation and liveness monitoring

pub mod config;
pub mod control;
#[cfg(feature = "decode-jpeg")]
pub mod decode;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod store;
pub mod watchdog;
pub mod zones;

pub use control::{Command, ControlLoop, ControlSettings};
pub use detect::{Detection, DetectionSource};
pub use frame::{Frame, FrameSize};
pub use ingest::{ConnectionSource, FetchError, StreamDemuxer, StreamTarget, TransportError};
pub use watchdog::{Heartbeat, Watchdog, WatchdogHandle};
pub use zones::{RelayOutput, ZoneArbitrator, ZoneConfig, ZoneError};
