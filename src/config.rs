use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorKind;
use crate::frame::FrameSize;
use crate::ingest::{DemuxConfig, StreamTarget};

const DEFAULT_STREAM_URL: &str = "http://192.168.4.100:81/stream";
const DEFAULT_BUFFER_KIB: usize = 100;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;
const DEFAULT_MOTION_SENSITIVITY: f32 = 0.3;
const DEFAULT_GLOBAL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_ZONES_PATH: &str = "zones.json";
const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";
const DEFAULT_WATCHDOG_TIMEOUT_SECS: u64 = 60;
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;
const MIN_BUFFER_KIB: usize = 4;

#[derive(Debug, Deserialize, Default)]
struct DaemonConfigFile {
    stream: Option<StreamConfigFile>,
    detection: Option<DetectionConfigFile>,
    relays: Option<RelayConfigFile>,
    zones: Option<ZonesConfigFile>,
    system: Option<SystemConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    buffer_kib: Option<usize>,
    reconnect_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    kind: Option<DetectorKind>,
    threshold: Option<f32>,
    global_timeout: Option<u64>,
    motion_sensitivity: Option<f32>,
    model_path: Option<PathBuf>,
    allow_motion_fallback: Option<bool>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    active_high: Option<bool>,
    auto_control: Option<bool>,
    output: Option<OutputKind>,
    gpio_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ZonesConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SystemConfigFile {
    watchdog_enabled: Option<bool>,
    watchdog_timeout_secs: Option<u64>,
    report_interval_secs: Option<u64>,
}

/// Where relay levels are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Linux sysfs GPIO.
    #[default]
    Sysfs,
    /// Log only; nothing is switched.
    Log,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub stream: StreamSettings,
    pub detection: DetectionSettings,
    pub relays: RelaySettings,
    pub zones_path: PathBuf,
    /// Timeout in seconds for zones that do not set their own.
    pub global_timeout: u64,
    pub watchdog: WatchdogSettings,
    pub report_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub buffer_kib: usize,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub kind: DetectorKind,
    /// Detections under this confidence never reach the arbitrator.
    pub threshold: f32,
    pub motion_sensitivity: f32,
    pub model_path: Option<PathBuf>,
    pub allow_motion_fallback: bool,
    pub frame: FrameSize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            kind: DetectorKind::default(),
            threshold: DEFAULT_DETECTION_THRESHOLD,
            motion_sensitivity: DEFAULT_MOTION_SENSITIVITY,
            model_path: None,
            allow_motion_fallback: true,
            frame: FrameSize::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub active_high: bool,
    /// When off, detections are counted but never switch relays.
    pub auto_control: bool,
    pub output: OutputKind,
    pub gpio_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub enabled: bool,
    pub timeout: Duration,
}

impl DaemonConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DaemonConfigFile) -> Self {
        let stream = file.stream.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let relays = file.relays.unwrap_or_default();
        let system = file.system.unwrap_or_default();
        let frame_defaults = FrameSize::default();

        Self {
            stream: StreamSettings {
                url: stream
                    .url
                    .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
                buffer_kib: stream.buffer_kib.unwrap_or(DEFAULT_BUFFER_KIB),
                reconnect_delay: Duration::from_millis(
                    stream
                        .reconnect_delay_ms
                        .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
                ),
            },
            detection: DetectionSettings {
                kind: detection.kind.unwrap_or_default(),
                threshold: detection.threshold.unwrap_or(DEFAULT_DETECTION_THRESHOLD),
                motion_sensitivity: detection
                    .motion_sensitivity
                    .unwrap_or(DEFAULT_MOTION_SENSITIVITY),
                model_path: detection.model_path,
                allow_motion_fallback: detection.allow_motion_fallback.unwrap_or(true),
                frame: FrameSize {
                    width: detection.frame_width.unwrap_or(frame_defaults.width),
                    height: detection.frame_height.unwrap_or(frame_defaults.height),
                },
            },
            relays: RelaySettings {
                active_high: relays.active_high.unwrap_or(true),
                auto_control: relays.auto_control.unwrap_or(true),
                output: relays.output.unwrap_or_default(),
                gpio_root: relays
                    .gpio_root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_GPIO_ROOT)),
            },
            zones_path: file
                .zones
                .and_then(|zones| zones.path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ZONES_PATH)),
            global_timeout: detection
                .global_timeout
                .unwrap_or(DEFAULT_GLOBAL_TIMEOUT_SECS),
            watchdog: WatchdogSettings {
                enabled: system.watchdog_enabled.unwrap_or(true),
                timeout: Duration::from_secs(
                    system
                        .watchdog_timeout_secs
                        .unwrap_or(DEFAULT_WATCHDOG_TIMEOUT_SECS),
                ),
            },
            report_interval: Duration::from_secs(
                system
                    .report_interval_secs
                    .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("RELAY_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("RELAY_ZONES_PATH") {
            if !path.trim().is_empty() {
                self.zones_path = PathBuf::from(path);
            }
        }
        if let Ok(value) = std::env::var("RELAY_ACTIVE_HIGH") {
            self.relays.active_high = parse_bool(&value)
                .ok_or_else(|| anyhow!("RELAY_ACTIVE_HIGH must be true or false"))?;
        }
        if let Ok(value) = std::env::var("RELAY_DETECTION_THRESHOLD") {
            self.detection.threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("RELAY_DETECTION_THRESHOLD must be a number"))?;
        }
        if let Ok(value) = std::env::var("RELAY_GLOBAL_TIMEOUT_SECS") {
            self.global_timeout = value.trim().parse().map_err(|_| {
                anyhow!("RELAY_GLOBAL_TIMEOUT_SECS must be an integer number of seconds")
            })?;
        }
        if let Ok(value) = std::env::var("RELAY_DETECTOR") {
            if !value.trim().is_empty() {
                self.detection.kind = DetectorKind::parse(&value)?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        StreamTarget::parse(&self.stream.url)?;
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(anyhow!("detection threshold must be between 0 and 1"));
        }
        if !(0.0..=1.0).contains(&self.detection.motion_sensitivity) {
            return Err(anyhow!("motion sensitivity must be between 0 and 1"));
        }
        if self.global_timeout == 0 {
            return Err(anyhow!("global timeout must be greater than zero"));
        }
        if self.detection.frame.width == 0 || self.detection.frame.height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if self.stream.buffer_kib < MIN_BUFFER_KIB {
            return Err(anyhow!(
                "stream buffer must be at least {} KiB",
                MIN_BUFFER_KIB
            ));
        }
        if self.watchdog.enabled && self.watchdog.timeout.is_zero() {
            return Err(anyhow!("watchdog timeout must be greater than zero"));
        }
        if self.report_interval.is_zero() {
            self.report_interval = Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS);
        }
        Ok(())
    }

    pub fn stream_target(&self) -> Result<StreamTarget> {
        StreamTarget::parse(&self.stream.url)
    }

    pub fn demux_config(&self) -> DemuxConfig {
        DemuxConfig {
            buffer_capacity: self.stream.buffer_kib * 1024,
            reconnect_delay: self.stream.reconnect_delay,
            ..DemuxConfig::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<DaemonConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
