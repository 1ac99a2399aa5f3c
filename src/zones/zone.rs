use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Upper bound on configured zones.
pub const MAX_ZONES: usize = 10;
/// Upper bound on relay channels assigned to one zone.
pub const MAX_RELAYS_PER_ZONE: usize = 4;

/// Physical output pin number.
pub type RelayPin = u32;

/// Axis-aligned rectangle in frame pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Strict intersection: rectangles that only share an edge do not overlap.
    pub fn overlaps(&self, x: i64, y: i64, width: i64, height: i64) -> bool {
        let (zx, zy) = (self.x as i64, self.y as i64);
        let (zw, zh) = (self.width as i64, self.height as i64);
        x < zx + zw && x + width > zx && y < zy + zh && y + height > zy
    }
}

/// Persisted description of one zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    pub id: u32,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Seconds without detection before the zone returns to idle.
    pub timeout: u64,
    pub relay_pins: Vec<RelayPin>,
}

impl ZoneConfig {
    pub fn new(id: u32, name: impl Into<String>, rect: Rect, timeout: u64) -> Self {
        Self {
            id,
            name: name.into(),
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            timeout,
            relay_pins: Vec::new(),
        }
    }

    pub fn with_relays(mut self, pins: impl IntoIterator<Item = RelayPin>) -> Self {
        self.relay_pins = pins.into_iter().collect();
        self
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Pin list with repeats removed, first occurrence kept.
    pub(crate) fn distinct_pins(&self) -> Vec<RelayPin> {
        let mut pins = Vec::with_capacity(self.relay_pins.len());
        for pin in &self.relay_pins {
            if !pins.contains(pin) {
                pins.push(*pin);
            }
        }
        pins
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneState {
    Idle,
    Active,
}

/// Runtime zone: configuration plus activation state and counters.
///
/// Only the arbitrator mutates zones; everything else sees `&Zone`.
#[derive(Clone, Debug)]
pub struct Zone {
    pub(super) config: ZoneConfig,
    pub(super) state: ZoneState,
    pub(super) last_detection: Option<Instant>,
    pub(super) detections: u64,
}

impl Zone {
    pub(super) fn new(config: ZoneConfig) -> Self {
        Self {
            config,
            state: ZoneState::Idle,
            last_detection: None,
            detections: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn rect(&self) -> Rect {
        self.config.rect()
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    pub fn relay_pins(&self) -> &[RelayPin] {
        &self.config.relay_pins
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn state(&self) -> ZoneState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ZoneState::Active
    }

    pub fn last_detection(&self) -> Option<Instant> {
        self.last_detection
    }

    pub fn detection_count(&self) -> u64 {
        self.detections
    }

    pub(super) fn uses(&self, pin: RelayPin) -> bool {
        self.config.relay_pins.contains(&pin)
    }

    pub(super) fn timed_out(&self, now: Instant) -> bool {
        match self.last_detection {
            Some(last) => now.saturating_duration_since(last) >= self.timeout(),
            None => true,
        }
    }
}

/// Electrical level written to a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    pub fn as_digit(self) -> u8 {
        match self {
            PinLevel::Low => 0,
            PinLevel::High => 1,
        }
    }
}

/// How logical ON maps to an electrical level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Polarity {
    #[default]
    ActiveHigh,
    ActiveLow,
}

impl Polarity {
    pub fn from_active_high(active_high: bool) -> Self {
        if active_high {
            Polarity::ActiveHigh
        } else {
            Polarity::ActiveLow
        }
    }

    pub fn level(self, on: bool) -> PinLevel {
        match (self, on) {
            (Polarity::ActiveHigh, true) | (Polarity::ActiveLow, false) => PinLevel::High,
            (Polarity::ActiveHigh, false) | (Polarity::ActiveLow, true) => PinLevel::Low,
        }
    }
}

/// One relay channel, possibly shared between zones.
#[derive(Clone, Debug)]
pub struct RelayChannel {
    pub(super) pin: RelayPin,
    pub(super) on: bool,
    pub(super) manual: bool,
    pub(super) activations: u64,
    pub(super) last_activation: Option<Instant>,
}

impl RelayChannel {
    pub(super) fn new(pin: RelayPin) -> Self {
        Self {
            pin,
            on: false,
            manual: false,
            activations: 0,
            last_activation: None,
        }
    }

    pub fn pin(&self) -> RelayPin {
        self.pin
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Whether the channel was switched on by hand rather than by a zone.
    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn activation_count(&self) -> u64 {
        self.activations
    }

    pub fn last_activation(&self) -> Option<Instant> {
        self.last_activation
    }
}
