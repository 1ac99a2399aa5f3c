use std::time::{Duration, Instant};

use presence_relay::detect::Detection;
use presence_relay::store::{default_zones, load_or_default, JsonZoneStore};
use presence_relay::zones::{
    PinLevel, Polarity, Rect, RecordingOutput, ZoneArbitrator, ZoneConfig, ZoneError, ZoneState,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn setup(zones: Vec<ZoneConfig>) -> (ZoneArbitrator<RecordingOutput>, RecordingOutput) {
    let recorder = RecordingOutput::new();
    let arbitrator = ZoneArbitrator::with_zones(recorder.clone(), Polarity::ActiveHigh, zones)
        .expect("zones register");
    recorder.clear();
    (arbitrator, recorder)
}

/// Detection given in pixels of a 320x240 frame.
fn pixels(x: u32, y: u32, w: u32, h: u32) -> Detection {
    Detection::new(
        x as f32 / WIDTH as f32,
        y as f32 / HEIGHT as f32,
        w as f32 / WIDTH as f32,
        h as f32 / HEIGHT as f32,
        0.9,
    )
}

#[test]
fn zone_stays_active_until_timeout_elapses() {
    let (mut arbitrator, recorder) = setup(default_zones(5));
    let start = Instant::now();

    arbitrator.tick_at(&[pixels(40, 40, 40, 40)], WIDTH, HEIGHT, start);
    assert_eq!(arbitrator.zone(1).unwrap().state(), ZoneState::Active);
    assert_eq!(arbitrator.relay_state(12), Some(true));

    arbitrator.tick_at(&[], WIDTH, HEIGHT, start + Duration::from_millis(4900));
    assert_eq!(arbitrator.zone(1).unwrap().state(), ZoneState::Active);
    assert_eq!(arbitrator.relay_state(12), Some(true));

    arbitrator.tick_at(&[], WIDTH, HEIGHT, start + Duration::from_millis(5100));
    assert_eq!(arbitrator.zone(1).unwrap().state(), ZoneState::Idle);
    assert_eq!(arbitrator.relay_state(12), Some(false));
    assert_eq!(
        recorder.writes(),
        vec![(12, PinLevel::High), (12, PinLevel::Low)]
    );
    // The other default zone never saw anything.
    assert_eq!(arbitrator.relay_state(13), Some(false));
}

#[test]
fn shared_pin_stays_on_while_any_user_is_active() {
    let (mut arbitrator, recorder) = setup(vec![
        ZoneConfig::new(1, "Left", Rect::new(0, 0, 100, 240), 2).with_relays([12, 14]),
        ZoneConfig::new(2, "Right", Rect::new(200, 0, 120, 240), 5).with_relays([13, 14]),
    ]);
    let start = Instant::now();

    arbitrator.tick_at(
        &[pixels(10, 10, 20, 20), pixels(250, 10, 20, 20)],
        WIDTH,
        HEIGHT,
        start,
    );
    assert_eq!(arbitrator.relay_state(14), Some(true));
    // The shared pin is written once although two zones assert it.
    assert_eq!(recorder.writes_for(14), vec![PinLevel::High]);

    // Left times out; right still holds the shared pin.
    arbitrator.tick_at(&[], WIDTH, HEIGHT, start + Duration::from_secs(3));
    assert!(!arbitrator.zone(1).unwrap().is_active());
    assert!(arbitrator.zone(2).unwrap().is_active());
    assert_eq!(arbitrator.relay_state(12), Some(false));
    assert_eq!(arbitrator.relay_state(14), Some(true));
    assert_eq!(recorder.writes_for(14), vec![PinLevel::High]);

    arbitrator.tick_at(&[], WIDTH, HEIGHT, start + Duration::from_secs(6));
    assert_eq!(arbitrator.relay_state(14), Some(false));
    assert_eq!(arbitrator.relay_state(13), Some(false));
    assert_eq!(recorder.writes_for(14), vec![PinLevel::High, PinLevel::Low]);
}

#[test]
fn handover_between_zones_never_blinks_shared_pin() {
    let (mut arbitrator, recorder) = setup(vec![
        ZoneConfig::new(1, "A", Rect::new(0, 0, 100, 240), 1).with_relays([14]),
        ZoneConfig::new(2, "B", Rect::new(200, 0, 120, 240), 1).with_relays([14]),
    ]);
    let start = Instant::now();
    arbitrator.tick_at(&[pixels(10, 10, 10, 10)], WIDTH, HEIGHT, start);
    // A times out in the same cycle B starts seeing someone.
    arbitrator.tick_at(
        &[pixels(250, 10, 10, 10)],
        WIDTH,
        HEIGHT,
        start + Duration::from_secs(2),
    );
    assert!(!arbitrator.zone(1).unwrap().is_active());
    assert!(arbitrator.zone(2).unwrap().is_active());
    assert_eq!(recorder.writes_for(14), vec![PinLevel::High]);
}

#[test]
fn zero_area_overlap_never_triggers() {
    let (mut arbitrator, recorder) = setup(vec![
        ZoneConfig::new(1, "Box", Rect::new(100, 100, 50, 50), 5).with_relays([12]),
    ]);

    let touching = [
        pixels(150, 110, 20, 20), // right edge
        pixels(80, 110, 20, 20),  // left edge
        pixels(110, 150, 20, 20), // bottom edge
        pixels(110, 80, 20, 20),  // top edge
        pixels(120, 120, 0, 10),  // zero width inside
    ];
    let outcome = arbitrator.tick(&touching, WIDTH, HEIGHT);
    assert!(outcome.detected.is_empty());
    assert_eq!(arbitrator.total_detections(), 0);
    assert!(recorder.writes().is_empty());

    // One unit of overlap on both axes is enough.
    let outcome = arbitrator.tick(&[pixels(149, 149, 10, 10)], WIDTH, HEIGHT);
    assert_eq!(outcome.detected, vec![1]);
    assert_eq!(arbitrator.relay_state(12), Some(true));
}

#[test]
fn double_activate_produces_one_write() {
    let (mut arbitrator, recorder) = setup(default_zones(5));
    arbitrator.activate_relay(13).unwrap();
    arbitrator.activate_relay(13).unwrap();
    assert_eq!(recorder.writes(), vec![(13, PinLevel::High)]);
    assert_eq!(arbitrator.relay_activation_count(13), Some(1));
}

#[test]
fn emergency_stop_then_detection_resumes_normally() {
    let (mut arbitrator, recorder) = setup(default_zones(5));
    let start = Instant::now();
    arbitrator.tick_at(&[pixels(40, 40, 40, 40)], WIDTH, HEIGHT, start);
    arbitrator.disable_all_relays().unwrap();
    assert_eq!(arbitrator.relay_state(12), Some(false));
    assert!(arbitrator.zones().iter().all(|zone| !zone.is_active()));

    recorder.clear();
    arbitrator.tick_at(
        &[pixels(40, 40, 40, 40)],
        WIDTH,
        HEIGHT,
        start + Duration::from_secs(1),
    );
    assert_eq!(recorder.writes(), vec![(12, PinLevel::High)]);
    assert_eq!(arbitrator.relay_activation_count(12), Some(2));
}

#[test]
fn crud_errors_leave_state_untouched() {
    let (mut arbitrator, recorder) = setup(default_zones(5));
    let before = arbitrator.zone_configs();

    assert!(matches!(
        arbitrator.remove_zone(42),
        Err(ZoneError::NotFound(42))
    ));
    assert!(matches!(
        arbitrator.add_zone(ZoneConfig::new(2, "dup", Rect::new(0, 0, 1, 1), 5)),
        Err(ZoneError::DuplicateId(2))
    ));
    assert!(matches!(
        arbitrator.add_zone(
            ZoneConfig::new(3, "wide", Rect::new(0, 0, 1, 1), 5).with_relays([1, 2, 3, 4, 5])
        ),
        Err(ZoneError::RelayCapacity { .. })
    ));
    assert_eq!(arbitrator.zone_configs(), before);
    assert!(recorder.writes().is_empty());
}

#[test]
fn stored_zones_without_ids_or_past_capacity_still_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zones.json");
    let mut records = vec![
        r#"{"name":"A","relayPins":[12]}"#.to_string(),
        r#"{"name":"B","relayPins":[13]}"#.to_string(),
    ];
    records.extend((1..=11).map(|id| format!(r#"{{"id":{},"name":"Z{}"}}"#, id, id)));
    std::fs::write(&path, format!(r#"{{"zones":[{}]}}"#, records.join(","))).unwrap();

    let zones = load_or_default(&JsonZoneStore::new(&path), 5).unwrap();
    assert_eq!(zones.len(), 13);

    let recorder = RecordingOutput::new();
    let mut arbitrator = ZoneArbitrator::new(recorder.clone(), Polarity::ActiveHigh);
    assert_eq!(arbitrator.register_zones(zones), 10);

    let ids: Vec<u32> = arbitrator.zones().iter().map(|zone| zone.id()).collect();
    assert_eq!(ids, (0..10).collect::<Vec<u32>>());
    assert_eq!(arbitrator.zone(0).unwrap().name(), "A");
    // The duplicate record never registered its relay.
    assert_eq!(arbitrator.relay_state(13), None);
    assert_eq!(recorder.writes(), vec![(12, PinLevel::Low)]);

    arbitrator.tick(&[pixels(5, 5, 20, 20)], WIDTH, HEIGHT);
    assert_eq!(arbitrator.relay_state(12), Some(true));
}
