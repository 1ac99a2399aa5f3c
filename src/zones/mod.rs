//! Zones, relay channels and the arbitrator that connects them.

mod arbitrator;
mod output;
mod zone;

pub use arbitrator::{ArbitratorStats, RelayStats, TickOutcome, ZoneArbitrator, ZoneError, ZoneStats};
pub use output::{LogOutput, OutputError, RecordingOutput, RelayOutput, SysfsGpioOutput};
pub use zone::{
    PinLevel, Polarity, Rect, RelayChannel, RelayPin, Zone, ZoneConfig, ZoneState,
    MAX_RELAYS_PER_ZONE, MAX_ZONES,
};
