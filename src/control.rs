//! Single-threaded control loop: fetch, detect, arbitrate, report.
//!
//! Everything that mutates zones or relays runs on the loop thread. Other
//! threads talk to it through [`Command`]s, which are applied at the start of
//! the next cycle.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::DaemonConfig;
use crate::detect::{retain_confident, Detection, DetectionSource};
use crate::frame::{Frame, FrameSize};
use crate::ingest::{ConnectionSource, FetchError, StreamDemuxer, StreamState};
use crate::store::ZoneStore;
use crate::watchdog::Heartbeat;
use crate::zones::{ArbitratorStats, RelayOutput, RelayPin, TickOutcome, ZoneArbitrator, ZoneConfig, ZoneError};

/// Requests applied by the loop thread.
#[derive(Debug)]
pub enum Command {
    ActivateRelay(RelayPin),
    DeactivateRelay(RelayPin),
    ToggleRelay(RelayPin),
    EmergencyStop,
    AddZone(ZoneConfig),
    UpdateZone(ZoneConfig),
    RemoveZone(u32),
    ResetStatistics,
    SetAutoControl(bool),
    /// Disconnect and stop fetching until `StartStream`.
    StopStream,
    StartStream,
    /// Reply with a status snapshot.
    Status(Sender<StatusReport>),
}

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub frame: FrameSize,
    pub detection_threshold: f32,
    pub auto_control: bool,
    pub report_interval: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            frame: FrameSize::default(),
            detection_threshold: 0.5,
            auto_control: true,
            report_interval: Duration::from_secs(10),
        }
    }
}

impl From<&DaemonConfig> for ControlSettings {
    fn from(cfg: &DaemonConfig) -> Self {
        Self {
            frame: cfg.detection.frame,
            detection_threshold: cfg.detection.threshold,
            auto_control: cfg.relays.auto_control,
            report_interval: cfg.report_interval,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub commands: usize,
    pub frame: Option<u64>,
    /// Detections passed on to the arbitrator's input this cycle.
    pub detections: usize,
    pub tick: TickOutcome,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub stream_state: String,
    pub stream_target: Option<String>,
    pub frames: u64,
    pub average_fps: f32,
    pub reconnects: u64,
    pub discarded_bytes: u64,
    pub detector: &'static str,
    pub auto_control: bool,
    pub suppressed_detections: u64,
    pub zones: ArbitratorStats,
}

pub struct ControlLoop<C: ConnectionSource, O: RelayOutput> {
    demuxer: StreamDemuxer<C>,
    detector: Box<dyn DetectionSource>,
    arbitrator: ZoneArbitrator<O>,
    store: Option<Box<dyn ZoneStore>>,
    commands: Receiver<Command>,
    settings: ControlSettings,
    streaming: bool,
    suppressed_detections: u64,
    last_report: Instant,
}

impl<C: ConnectionSource, O: RelayOutput> ControlLoop<C, O> {
    /// Build a loop and the sender used to reach it.
    pub fn new(
        demuxer: StreamDemuxer<C>,
        detector: Box<dyn DetectionSource>,
        arbitrator: ZoneArbitrator<O>,
        settings: ControlSettings,
    ) -> (Self, Sender<Command>) {
        let (tx, rx) = mpsc::channel();
        let control = Self {
            demuxer,
            detector,
            arbitrator,
            store: None,
            commands: rx,
            settings,
            streaming: true,
            suppressed_detections: 0,
            last_report: Instant::now(),
        };
        (control, tx)
    }

    /// Persist zones after every successful zone change.
    pub fn with_store(mut self, store: Box<dyn ZoneStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn arbitrator(&self) -> &ZoneArbitrator<O> {
        &self.arbitrator
    }

    pub fn demuxer(&self) -> &StreamDemuxer<C> {
        &self.demuxer
    }

    pub fn settings(&self) -> &ControlSettings {
        &self.settings
    }

    /// Run cycles until the heartbeat asks to stop.
    pub fn run(&mut self, heartbeat: &mut dyn Heartbeat) {
        log::info!(
            "control loop running: detector={}, auto relay control={}",
            self.detector.name(),
            self.settings.auto_control
        );
        loop {
            let report = self.run_cycle(heartbeat);
            if report.cancelled {
                break;
            }
        }
        log::info!("control loop stopped");
    }

    /// One pass: commands, fetch, detect, tick, report.
    pub fn run_cycle(&mut self, heartbeat: &mut dyn Heartbeat) -> CycleReport {
        let mut report = CycleReport::default();
        if !heartbeat.beat() {
            report.cancelled = true;
            return report;
        }
        report.commands = self.drain_commands();

        let mut detections = Vec::new();
        match self.next_frame(heartbeat) {
            Ok(Some(frame)) => {
                report.frame = Some(frame.sequence());
                detections = self.detect(&frame);
                report.detections = detections.len();
            }
            Ok(None) => {}
            Err(FetchError::Cancelled) => {
                report.cancelled = true;
                return report;
            }
            Err(err) => log::debug!("no frame this cycle: {}", err),
        }

        if !self.settings.auto_control {
            self.suppressed_detections += detections.len() as u64;
            detections.clear();
        }
        report.tick = self.arbitrator.tick(
            &detections,
            self.settings.frame.width,
            self.settings.frame.height,
        );

        if self.last_report.elapsed() >= self.settings.report_interval {
            self.log_health();
            self.last_report = Instant::now();
        }
        report
    }

    /// Force all relays off and close the stream.
    pub fn shutdown(&mut self) -> Result<(), ZoneError> {
        self.demuxer.disconnect();
        self.arbitrator.disable_all_relays()
    }

    pub fn status(&self) -> StatusReport {
        let stream = self.demuxer.stats();
        StatusReport {
            stream_state: format!("{:?}", stream.state).to_lowercase(),
            stream_target: stream.target,
            frames: stream.frames,
            average_fps: stream.average_fps,
            reconnects: stream.reconnects,
            discarded_bytes: stream.discarded_bytes,
            detector: self.detector.name(),
            auto_control: self.settings.auto_control,
            suppressed_detections: self.suppressed_detections,
            zones: self.arbitrator.stats(),
        }
    }

    fn next_frame(&mut self, heartbeat: &mut dyn Heartbeat) -> Result<Option<Frame>, FetchError> {
        if !self.streaming {
            return Ok(None);
        }
        if matches!(
            self.demuxer.state(),
            StreamState::Disconnected | StreamState::Failed
        ) {
            if self.demuxer.target().is_none() {
                return Ok(None);
            }
            if let Err(err) = self.demuxer.reconnect_with(heartbeat) {
                if matches!(err, FetchError::Cancelled) {
                    return Err(err);
                }
                log::warn!("stream reconnect failed: {}", err);
                return Ok(None);
            }
            self.detector.reset();
        }
        match self.demuxer.fetch_frame_with(heartbeat) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) if err.needs_reconnect() => {
                log::warn!("stream lost: {}", err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn detect(&mut self, frame: &Frame) -> Vec<Detection> {
        match self.detector.detect(frame, self.settings.frame) {
            Ok(mut detections) => {
                // Motion sources already applied their own sensitivity.
                if self.detector.scores_confidence() {
                    retain_confident(&mut detections, self.settings.detection_threshold);
                }
                detections
            }
            Err(err) => {
                log::warn!(
                    "{} detection failed on frame {}: {:#}",
                    self.detector.name(),
                    frame.sequence(),
                    err
                );
                Vec::new()
            }
        }
    }

    fn drain_commands(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    applied += 1;
                    if let Err(err) = self.apply(command) {
                        log::warn!("command rejected: {}", err);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    fn apply(&mut self, command: Command) -> Result<(), ZoneError> {
        match command {
            Command::ActivateRelay(pin) => {
                self.arbitrator.activate_relay(pin)?;
            }
            Command::DeactivateRelay(pin) => {
                self.arbitrator.deactivate_relay(pin)?;
            }
            Command::ToggleRelay(pin) => {
                self.arbitrator.toggle_relay(pin)?;
            }
            Command::EmergencyStop => self.arbitrator.disable_all_relays()?,
            Command::AddZone(zone) => {
                self.arbitrator.add_zone(zone)?;
                self.persist_zones();
            }
            Command::UpdateZone(zone) => {
                self.arbitrator.update_zone(zone)?;
                self.persist_zones();
            }
            Command::RemoveZone(id) => {
                self.arbitrator.remove_zone(id)?;
                self.persist_zones();
            }
            Command::ResetStatistics => {
                self.arbitrator.reset_statistics();
                self.suppressed_detections = 0;
            }
            Command::SetAutoControl(enabled) => {
                log::info!("automatic relay control {}", if enabled { "enabled" } else { "disabled" });
                self.settings.auto_control = enabled;
            }
            Command::StopStream => {
                log::info!("stream stopped on request");
                self.streaming = false;
                self.demuxer.disconnect();
            }
            Command::StartStream => {
                log::info!("stream started on request");
                self.streaming = true;
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
        Ok(())
    }

    fn persist_zones(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(err) = store.save(&self.arbitrator.zone_configs()) {
            log::error!("failed to persist zones: {:#}", err);
        }
    }

    fn log_health(&self) {
        let stream = self.demuxer.stats();
        let relays: Vec<String> = self
            .arbitrator
            .channels()
            .iter()
            .map(|channel| format!("{}={}", channel.pin(), if channel.is_on() { "on" } else { "off" }))
            .collect();
        log::info!(
            "stream {:?} healthy={} frames={} fps={:.1} reconnects={} | zones active={} detections={} | relays {}",
            stream.state,
            self.demuxer.is_healthy(),
            stream.frames,
            stream.average_fps,
            stream.reconnects,
            self.arbitrator.active_zone_count(),
            self.arbitrator.total_detections(),
            relays.join(" ")
        );
    }
}
