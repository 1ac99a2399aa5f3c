use std::time::Instant;

use serde::Serialize;

use crate::detect::Detection;
use crate::zones::output::{OutputError, RelayOutput};
use crate::zones::zone::{
    Polarity, RelayChannel, RelayPin, Zone, ZoneConfig, ZoneState, MAX_RELAYS_PER_ZONE, MAX_ZONES,
};

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("zone {0} not found")]
    NotFound(u32),
    #[error("zone capacity of {limit} reached")]
    Capacity { limit: usize },
    #[error("zone {zone} assigns {count} relays, at most {limit} allowed")]
    RelayCapacity {
        zone: u32,
        count: usize,
        limit: usize,
    },
    #[error("zone id {0} already in use")]
    DuplicateId(u32),
    #[error("relay pin {0} is not configured")]
    UnknownRelay(RelayPin),
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// What one `tick` changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Zones overlapped by at least one detection this cycle.
    pub detected: Vec<u32>,
    /// Zones that went idle to active.
    pub activated: Vec<u32>,
    /// Zones that timed out back to idle.
    pub deactivated: Vec<u32>,
    /// Pin writes that failed; retried on later ticks.
    pub output_failures: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ZoneStats {
    pub id: u32,
    pub name: String,
    pub state: ZoneState,
    pub detections: u64,
    pub relay_pins: Vec<RelayPin>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RelayStats {
    pub pin: RelayPin,
    pub on: bool,
    pub manual: bool,
    pub activations: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ArbitratorStats {
    pub polarity: Polarity,
    pub total_detections: u64,
    pub active_zones: usize,
    pub zones: Vec<ZoneStats>,
    pub relays: Vec<RelayStats>,
}

/// Maps detections onto zones and zones onto relay channels.
///
/// The arbitrator owns the [`RelayOutput`], so every pin write goes through
/// `&mut self`. A channel shared by several zones is switched off only when
/// none of them is still active; a channel switched on by hand stays on until
/// it is switched off by hand, the emergency stop runs, or a zone using it is
/// released with no other active user.
///
/// Holding any borrow of the arbitrator blocks every mutation:
///
/// ```compile_fail
/// use presence_relay::zones::{LogOutput, Polarity, ZoneArbitrator};
///
/// let mut arbitrator = ZoneArbitrator::new(LogOutput::new(), Polarity::ActiveHigh);
/// let zones = arbitrator.zones();
/// arbitrator.tick(&[], 320, 240);
/// println!("{}", zones.len());
/// ```
pub struct ZoneArbitrator<O: RelayOutput> {
    zones: Vec<Zone>,
    channels: Vec<RelayChannel>,
    output: O,
    polarity: Polarity,
    total_detections: u64,
}

impl<O: RelayOutput> ZoneArbitrator<O> {
    pub fn new(output: O, polarity: Polarity) -> Self {
        Self {
            zones: Vec::new(),
            channels: Vec::new(),
            output,
            polarity,
            total_detections: 0,
        }
    }

    /// Build an arbitrator and register `zones` in order.
    pub fn with_zones<I>(output: O, polarity: Polarity, zones: I) -> Result<Self, ZoneError>
    where
        I: IntoIterator<Item = ZoneConfig>,
    {
        let mut arbitrator = Self::new(output, polarity);
        for zone in zones {
            arbitrator.add_zone(zone)?;
        }
        Ok(arbitrator)
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Run one arbitration cycle against the current time.
    pub fn tick(&mut self, detections: &[Detection], frame_width: u32, frame_height: u32) -> TickOutcome {
        self.tick_at(detections, frame_width, frame_height, Instant::now())
    }

    /// Run one arbitration cycle as of `now`.
    pub fn tick_at(
        &mut self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
        now: Instant,
    ) -> TickOutcome {
        let boxes: Vec<(i64, i64, i64, i64)> = detections
            .iter()
            .map(|detection| detection.to_pixels(frame_width, frame_height))
            .collect();

        let mut outcome = TickOutcome::default();
        let mut asserted = Vec::new();
        let mut released = Vec::new();
        for zone in &mut self.zones {
            let rect = zone.rect();
            let detected = boxes
                .iter()
                .any(|&(x, y, width, height)| rect.overlaps(x, y, width, height));
            if detected {
                zone.detections += 1;
                self.total_detections += 1;
                zone.last_detection = Some(now);
                outcome.detected.push(zone.id());
                if zone.state == ZoneState::Idle {
                    zone.state = ZoneState::Active;
                    outcome.activated.push(zone.id());
                    log::info!("zone {} ({}) active", zone.id(), zone.name());
                }
                asserted.extend_from_slice(zone.relay_pins());
            } else if zone.state == ZoneState::Active && zone.timed_out(now) {
                zone.state = ZoneState::Idle;
                outcome.deactivated.push(zone.id());
                log::info!(
                    "zone {} ({}) idle after {}s without detection",
                    zone.id(),
                    zone.name(),
                    zone.timeout().as_secs()
                );
                released.extend_from_slice(zone.relay_pins());
            }
        }

        // Assert before releasing so a pin handed from one zone to another never blinks off.
        for pin in asserted {
            if let Err(err) = self.switch_on(pin, false, now) {
                log::warn!("failed to activate relay pin {}: {}", pin, err);
                outcome.output_failures += 1;
            }
        }
        for pin in released {
            if let Err(err) = self.release(pin) {
                log::warn!("failed to release relay pin {}: {}", pin, err);
                outcome.output_failures += 1;
            }
        }
        outcome.output_failures += self.reconcile();
        self.prune_channels();
        outcome
    }

    /// Switch a configured relay on by hand. Returns whether a write happened.
    pub fn activate_relay(&mut self, pin: RelayPin) -> Result<bool, ZoneError> {
        self.switch_on(pin, true, Instant::now())
    }

    /// Switch a configured relay off by hand. Returns whether a write happened.
    pub fn deactivate_relay(&mut self, pin: RelayPin) -> Result<bool, ZoneError> {
        self.switch_off(pin)
    }

    /// Flip a configured relay and return its new logical state.
    pub fn toggle_relay(&mut self, pin: RelayPin) -> Result<bool, ZoneError> {
        if self.relay_state(pin).ok_or(ZoneError::UnknownRelay(pin))? {
            self.switch_off(pin)?;
            Ok(false)
        } else {
            self.switch_on(pin, true, Instant::now())?;
            Ok(true)
        }
    }

    /// Emergency stop: every channel is written off, every zone goes idle.
    ///
    /// All channels are attempted even when one write fails; the first
    /// failure is returned and the failed channels are retried on later ticks.
    pub fn disable_all_relays(&mut self) -> Result<(), ZoneError> {
        log::warn!(
            "emergency stop: forcing {} relay channels off",
            self.channels.len()
        );
        for zone in &mut self.zones {
            zone.state = ZoneState::Idle;
            zone.last_detection = None;
        }
        let off = self.polarity.level(false);
        let mut first_error = None;
        for channel in &mut self.channels {
            channel.manual = false;
            match self.output.set_level(channel.pin, off) {
                Ok(()) => channel.on = false,
                Err(err) => {
                    log::error!("emergency stop could not release pin {}: {}", channel.pin, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    pub fn add_zone(&mut self, mut config: ZoneConfig) -> Result<(), ZoneError> {
        if self.zones.len() >= MAX_ZONES {
            return Err(ZoneError::Capacity { limit: MAX_ZONES });
        }
        if self.zones.iter().any(|zone| zone.id() == config.id) {
            return Err(ZoneError::DuplicateId(config.id));
        }
        let pins = Self::checked_pins(&config)?;
        self.register_channels(&pins)?;
        config.relay_pins = pins;
        log::info!(
            "zone {} ({}) added with relays {:?}",
            config.id,
            config.name,
            config.relay_pins
        );
        self.zones.push(Zone::new(config));
        Ok(())
    }

    /// Register stored zones one by one, skipping records that are rejected.
    ///
    /// Returns the number of zones accepted.
    pub fn register_zones<I>(&mut self, zones: I) -> usize
    where
        I: IntoIterator<Item = ZoneConfig>,
    {
        let mut accepted = 0;
        for config in zones {
            let (id, name) = (config.id, config.name.clone());
            match self.add_zone(config) {
                Ok(()) => accepted += 1,
                Err(err) => log::warn!("skipping stored zone {} ({}): {}", id, name, err),
            }
        }
        accepted
    }

    /// Delete a zone. An active zone releases its relays first, unless
    /// another active zone uses them.
    pub fn remove_zone(&mut self, id: u32) -> Result<ZoneConfig, ZoneError> {
        let index = self.index_of(id)?;
        let zone = self.zones.remove(index);
        if zone.is_active() {
            for pin in zone.relay_pins() {
                if let Err(err) = self.release(*pin) {
                    log::warn!("failed to release relay pin {}: {}", pin, err);
                }
            }
        }
        self.prune_channels();
        log::info!("zone {} ({}) removed", id, zone.name());
        Ok(zone.config)
    }

    /// Replace a zone's mutable fields, keeping its activation state.
    ///
    /// On an active zone, dropped relays are released and added relays are
    /// switched on.
    pub fn update_zone(&mut self, mut config: ZoneConfig) -> Result<(), ZoneError> {
        let index = self.index_of(config.id)?;
        let pins = Self::checked_pins(&config)?;
        self.register_channels(&pins)?;
        config.relay_pins = pins;

        let zone = &mut self.zones[index];
        let previous = std::mem::replace(&mut zone.config, config);
        let active = zone.is_active();
        let current = zone.config.relay_pins.clone();
        log::info!("zone {} ({}) updated", zone.id(), zone.name());
        if !active {
            self.prune_channels();
            return Ok(());
        }

        let now = Instant::now();
        for pin in current.iter().filter(|pin| !previous.relay_pins.contains(pin)) {
            if let Err(err) = self.switch_on(*pin, false, now) {
                log::warn!("failed to activate relay pin {}: {}", pin, err);
            }
        }
        for pin in previous.relay_pins.iter().filter(|pin| !current.contains(pin)) {
            if let Err(err) = self.release(*pin) {
                log::warn!("failed to release relay pin {}: {}", pin, err);
            }
        }
        self.prune_channels();
        Ok(())
    }

    pub fn zone(&self, id: u32) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.id() == id)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Current zone definitions in registration order, for persistence.
    pub fn zone_configs(&self) -> Vec<ZoneConfig> {
        self.zones.iter().map(|zone| zone.config().clone()).collect()
    }

    pub fn channels(&self) -> &[RelayChannel] {
        &self.channels
    }

    /// Logical state of a configured relay.
    pub fn relay_state(&self, pin: RelayPin) -> Option<bool> {
        self.channel(pin).map(RelayChannel::is_on)
    }

    pub fn total_detections(&self) -> u64 {
        self.total_detections
    }

    pub fn zone_detection_count(&self, id: u32) -> Option<u64> {
        self.zone(id).map(Zone::detection_count)
    }

    pub fn relay_activation_count(&self, pin: RelayPin) -> Option<u64> {
        self.channel(pin).map(RelayChannel::activation_count)
    }

    pub fn active_zone_count(&self) -> usize {
        self.zones.iter().filter(|zone| zone.is_active()).count()
    }

    pub fn reset_statistics(&mut self) {
        self.total_detections = 0;
        for zone in &mut self.zones {
            zone.detections = 0;
        }
        for channel in &mut self.channels {
            channel.activations = 0;
        }
        log::info!("detection statistics reset");
    }

    pub fn stats(&self) -> ArbitratorStats {
        ArbitratorStats {
            polarity: self.polarity,
            total_detections: self.total_detections,
            active_zones: self.active_zone_count(),
            zones: self
                .zones
                .iter()
                .map(|zone| ZoneStats {
                    id: zone.id(),
                    name: zone.name().to_string(),
                    state: zone.state(),
                    detections: zone.detection_count(),
                    relay_pins: zone.relay_pins().to_vec(),
                })
                .collect(),
            relays: self
                .channels
                .iter()
                .map(|channel| RelayStats {
                    pin: channel.pin(),
                    on: channel.is_on(),
                    manual: channel.is_manual(),
                    activations: channel.activation_count(),
                })
                .collect(),
        }
    }

    fn checked_pins(config: &ZoneConfig) -> Result<Vec<RelayPin>, ZoneError> {
        let pins = config.distinct_pins();
        if pins.len() > MAX_RELAYS_PER_ZONE {
            return Err(ZoneError::RelayCapacity {
                zone: config.id,
                count: pins.len(),
                limit: MAX_RELAYS_PER_ZONE,
            });
        }
        Ok(pins)
    }

    fn index_of(&self, id: u32) -> Result<usize, ZoneError> {
        self.zones
            .iter()
            .position(|zone| zone.id() == id)
            .ok_or(ZoneError::NotFound(id))
    }

    fn channel(&self, pin: RelayPin) -> Option<&RelayChannel> {
        self.channels.iter().find(|channel| channel.pin == pin)
    }

    /// Register channels on first use, driving them to the off level.
    ///
    /// Nothing is registered unless every new pin accepted its off write.
    fn register_channels(&mut self, pins: &[RelayPin]) -> Result<(), ZoneError> {
        let fresh: Vec<RelayPin> = pins
            .iter()
            .copied()
            .filter(|pin| self.channel(*pin).is_none())
            .collect();
        let off = self.polarity.level(false);
        for pin in &fresh {
            self.output.set_level(*pin, off)?;
        }
        for pin in fresh {
            self.channels.push(RelayChannel::new(pin));
            log::debug!("relay pin {} registered ({:?})", pin, self.polarity);
        }
        Ok(())
    }

    /// Forget channels that are off and no longer assigned to any zone.
    fn prune_channels(&mut self) {
        let zones = &self.zones;
        self.channels.retain(|channel| {
            let keep = channel.on || zones.iter().any(|zone| zone.uses(channel.pin));
            if !keep {
                log::debug!("relay pin {} no longer assigned; dropped", channel.pin);
            }
            keep
        });
    }

    fn switch_on(&mut self, pin: RelayPin, manual: bool, now: Instant) -> Result<bool, ZoneError> {
        let channel = self
            .channels
            .iter_mut()
            .find(|channel| channel.pin == pin)
            .ok_or(ZoneError::UnknownRelay(pin))?;
        if channel.on {
            channel.manual |= manual;
            return Ok(false);
        }
        self.output.set_level(pin, self.polarity.level(true))?;
        channel.on = true;
        channel.manual = manual;
        channel.activations += 1;
        channel.last_activation = Some(now);
        log::info!("relay pin {} on{}", pin, if manual { " (manual)" } else { "" });
        Ok(true)
    }

    fn switch_off(&mut self, pin: RelayPin) -> Result<bool, ZoneError> {
        let channel = self
            .channels
            .iter_mut()
            .find(|channel| channel.pin == pin)
            .ok_or(ZoneError::UnknownRelay(pin))?;
        channel.manual = false;
        if !channel.on {
            return Ok(false);
        }
        self.output.set_level(pin, self.polarity.level(false))?;
        channel.on = false;
        log::info!("relay pin {} off", pin);
        Ok(true)
    }

    /// Switch `pin` off unless an active zone still uses it.
    fn release(&mut self, pin: RelayPin) -> Result<bool, ZoneError> {
        if self
            .zones
            .iter()
            .any(|zone| zone.is_active() && zone.uses(pin))
        {
            log::debug!("relay pin {} held by another active zone", pin);
            return Ok(false);
        }
        self.switch_off(pin)
    }

    /// Retry channels left on after a failed off-write. Returns failures.
    fn reconcile(&mut self) -> usize {
        let stale: Vec<RelayPin> = self
            .channels
            .iter()
            .filter(|channel| channel.on && !channel.manual)
            .map(|channel| channel.pin)
            .filter(|pin| {
                !self
                    .zones
                    .iter()
                    .any(|zone| zone.is_active() && zone.uses(*pin))
            })
            .collect();
        let mut failures = 0;
        for pin in stale {
            if let Err(err) = self.switch_off(pin) {
                log::warn!("relay pin {} still stuck on: {}", pin, err);
                failures += 1;
            }
        }
        failures
    }
}
