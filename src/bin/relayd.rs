//! relayd - presence relay daemon
//!
//! This daemon:
//! 1. Pulls frames from an MJPEG camera stream (or a recorded capture)
//! 2. Runs the configured detection source on each frame
//! 3. Maps detections onto zones and switches the zones' relays
//! 4. Forces every relay off on shutdown

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use presence_relay::{
    config::{DaemonConfig, OutputKind},
    control::{ControlLoop, ControlSettings},
    detect,
    ingest::{ConnectionSource, HttpConfig, HttpConnection, ReplayConnection, StreamDemuxer},
    store::{self, JsonZoneStore},
    watchdog::Watchdog,
    zones::{LogOutput, Polarity, RelayOutput, SysfsGpioOutput, ZoneArbitrator},
};

const WATCHDOG_EXIT_CODE: i32 = 70;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,
    /// Camera stream URL; overrides the config file.
    #[arg(long)]
    stream_url: Option<String>,
    /// Log relay writes instead of driving GPIO.
    #[arg(long)]
    dry_run: bool,
    /// Replay a captured response body instead of connecting to the camera.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
    /// Content type announced for the replayed capture.
    #[arg(
        long,
        default_value = "multipart/x-mixed-replace; boundary=myboundary"
    )]
    replay_content_type: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("RELAY_CONFIG", path);
    }
    let mut cfg = DaemonConfig::load()?;
    if let Some(url) = args.stream_url {
        cfg.stream.url = url;
    }
    if args.dry_run {
        cfg.relays.output = OutputKind::Log;
    }
    let target = cfg.stream_target()?;

    let zone_store = JsonZoneStore::new(&cfg.zones_path);
    let zones = store::load_or_default(&zone_store, cfg.global_timeout)?;
    let output: Box<dyn RelayOutput> = match cfg.relays.output {
        OutputKind::Sysfs => Box::new(SysfsGpioOutput::with_root(&cfg.relays.gpio_root)),
        OutputKind::Log => Box::new(LogOutput::new()),
    };
    let polarity = Polarity::from_active_high(cfg.relays.active_high);
    let stored = zones.len();
    let mut arbitrator = ZoneArbitrator::new(output, polarity);
    let accepted = arbitrator.register_zones(zones);
    log::info!(
        "{} of {} zones loaded, relays {:?}",
        accepted,
        stored,
        polarity
    );

    let source: Box<dyn ConnectionSource> = match &args.replay {
        Some(path) => Box::new(ReplayConnection::from_capture(
            path,
            &args.replay_content_type,
            4096,
        )?),
        None => Box::new(HttpConnection::new(HttpConfig::default())),
    };
    let mut demuxer = StreamDemuxer::new(source, cfg.demux_config())?;
    if let Err(err) = demuxer.connect(target) {
        log::warn!("initial stream connect failed: {}; retrying in the loop", err);
    }

    let detector = detect::build_source(&cfg.detection, cfg.detection.frame)?;
    let (control, _commands) = ControlLoop::new(
        demuxer,
        detector,
        arbitrator,
        ControlSettings::from(&cfg),
    );
    let mut control = control.with_store(Box::new(zone_store));

    let watchdog = if cfg.watchdog.enabled {
        Watchdog::spawn(cfg.watchdog.timeout, |stalled| {
            log::error!(
                "control loop stalled for {} s; exiting",
                stalled.as_secs()
            );
            std::process::exit(WATCHDOG_EXIT_CODE);
        })?
    } else {
        log::warn!("watchdog disabled");
        Watchdog::disabled()
    };
    let shutdown = watchdog.handle();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        shutdown.request_shutdown();
    })
    .map_err(|e| anyhow!("failed to install signal handler: {}", e))?;

    let mut heartbeat = watchdog.handle();
    control.run(&mut heartbeat);

    let result = control.shutdown();
    watchdog.stop()?;
    result.map_err(|e| anyhow!("relays not fully released on shutdown: {}", e))?;
    log::info!("all relays off; relayd exiting");
    Ok(())
}
