use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use presence_relay::config::{DaemonConfig, OutputKind};
use presence_relay::detect::DetectorKind;
use presence_relay::StreamTarget;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "RELAY_STREAM_URL",
        "RELAY_ZONES_PATH",
        "RELAY_ACTIVE_HIGH",
        "RELAY_DETECTION_THRESHOLD",
        "RELAY_GLOBAL_TIMEOUT_SECS",
        "RELAY_DETECTOR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = DaemonConfig::load().expect("load defaults");
    assert_eq!(
        cfg.stream_target().unwrap(),
        StreamTarget::new("192.168.4.100", 81, "/stream")
    );
    assert_eq!(cfg.detection.threshold, 0.5);
    assert_eq!(cfg.detection.kind, DetectorKind::FrameDiff);
    assert_eq!(cfg.global_timeout, 5);
    assert!(cfg.relays.active_high);
    assert_eq!(cfg.relays.output, OutputKind::Sysfs);
    assert_eq!(cfg.watchdog.timeout, Duration::from_secs(60));
    assert_eq!(cfg.zones_path.to_str(), Some("zones.json"));

    clear_env();
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "stream": {
            "url": "http://10.0.0.5:8080/video",
            "buffer_kib": 64,
            "reconnect_delay_ms": 250
        },
        "detection": {
            "kind": "frame-diff",
            "threshold": 0.6,
            "global_timeout": 7,
            "frame_width": 640,
            "frame_height": 480
        },
        "relays": {
            "active_high": true,
            "auto_control": false,
            "output": "log"
        },
        "zones": { "path": "/var/lib/relayd/zones.json" },
        "system": { "watchdog_enabled": false, "report_interval_secs": 30 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("RELAY_ACTIVE_HIGH", "false");
    std::env::set_var("RELAY_GLOBAL_TIMEOUT_SECS", "12");
    std::env::set_var("RELAY_ZONES_PATH", "/tmp/zones-override.json");

    let cfg = DaemonConfig::load().expect("load config");

    assert_eq!(
        cfg.stream_target().unwrap(),
        StreamTarget::new("10.0.0.5", 8080, "/video")
    );
    assert_eq!(cfg.demux_config().buffer_capacity, 64 * 1024);
    assert_eq!(cfg.demux_config().reconnect_delay, Duration::from_millis(250));
    assert_eq!(cfg.detection.threshold, 0.6);
    assert_eq!(cfg.detection.frame.width, 640);
    assert_eq!(cfg.global_timeout, 12);
    assert!(!cfg.relays.active_high);
    assert!(!cfg.relays.auto_control);
    assert_eq!(cfg.relays.output, OutputKind::Log);
    assert_eq!(cfg.zones_path.to_str(), Some("/tmp/zones-override.json"));
    assert!(!cfg.watchdog.enabled);
    assert_eq!(cfg.report_interval, Duration::from_secs(30));

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [stream]
        url = "http://camera.local/mjpeg"

        [detection]
        threshold = 0.4
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("RELAY_STREAM_URL", "http://override.local:81/stream");
    std::env::set_var("RELAY_DETECTOR", "block-motion");

    let cfg = DaemonConfig::load().expect("load config");
    assert_eq!(cfg.stream.url, "http://override.local:81/stream");
    assert_eq!(cfg.detection.threshold, 0.4);
    assert_eq!(cfg.detection.kind, DetectorKind::BlockMotion);

    clear_env();
}

#[test]
fn invalid_overrides_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_DETECTION_THRESHOLD", "1.5");
    assert!(DaemonConfig::load().is_err());
    std::env::set_var("RELAY_DETECTION_THRESHOLD", "high");
    assert!(DaemonConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_GLOBAL_TIMEOUT_SECS", "0");
    assert!(DaemonConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_ACTIVE_HIGH", "sometimes");
    assert!(DaemonConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_STREAM_URL", "rtsp://camera/stream");
    assert!(DaemonConfig::load().is_err());

    clear_env();
}
