use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::zones::{Rect, RelayPin, ZoneConfig, MAX_RELAYS_PER_ZONE};

const DEFAULT_ZONE_NAME: &str = "Unnamed";
const DEFAULT_ZONE_SIZE: i32 = 100;
const MAX_NAME_CHARS: usize = 31;

/// Persistence for zone definitions.
pub trait ZoneStore: Send {
    /// Stored zones, or `None` when nothing has been saved yet.
    ///
    /// `default_timeout` fills records that carry no timeout of their own.
    fn load(&self, default_timeout: u64) -> Result<Option<Vec<ZoneConfig>>>;

    fn save(&self, zones: &[ZoneConfig]) -> Result<()>;
}

#[derive(Debug, Deserialize, Default)]
struct ZoneFile {
    #[serde(default)]
    zones: Vec<ZoneRecord>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ZoneRecord {
    id: Option<u32>,
    name: Option<String>,
    x: Option<i32>,
    y: Option<i32>,
    width: Option<i32>,
    height: Option<i32>,
    timeout: Option<u64>,
    relay_pins: Option<Vec<RelayPin>>,
}

impl ZoneRecord {
    fn into_config(self, default_timeout: u64) -> ZoneConfig {
        let name: String = self
            .name
            .unwrap_or_else(|| DEFAULT_ZONE_NAME.to_string())
            .chars()
            .take(MAX_NAME_CHARS)
            .collect();
        let mut pins = self.relay_pins.unwrap_or_default();
        pins.truncate(MAX_RELAYS_PER_ZONE);
        ZoneConfig::new(
            self.id.unwrap_or(0),
            name,
            Rect::new(
                self.x.unwrap_or(0),
                self.y.unwrap_or(0),
                self.width.unwrap_or(DEFAULT_ZONE_SIZE),
                self.height.unwrap_or(DEFAULT_ZONE_SIZE),
            ),
            self.timeout.unwrap_or(default_timeout),
        )
        .with_relays(pins)
    }
}

#[derive(Serialize)]
struct ZoneFileOut<'a> {
    zones: &'a [ZoneConfig],
}

/// `{"zones": [...]}` JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonZoneStore {
    path: PathBuf,
}

impl JsonZoneStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ZoneStore for JsonZoneStore {
    fn load(&self, default_timeout: u64) -> Result<Option<Vec<ZoneConfig>>> {
        if !self.path.exists() {
            log::info!("zones file {} not found", self.path.display());
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| anyhow!("failed to read zones file {}: {}", self.path.display(), e))?;
        let file: ZoneFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid zones file {}: {}", self.path.display(), e))?;
        let zones: Vec<ZoneConfig> = file
            .zones
            .into_iter()
            .map(|record| record.into_config(default_timeout))
            .collect();
        log::info!("loaded {} zones from {}", zones.len(), self.path.display());
        Ok(Some(zones))
    }

    fn save(&self, zones: &[ZoneConfig]) -> Result<()> {
        let json = serde_json::to_string_pretty(&ZoneFileOut { zones })
            .map_err(|e| anyhow!("failed to encode zones: {}", e))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow!("failed to create zones directory {}: {}", parent.display(), e)
                })?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| anyhow!("failed to write zones file {}: {}", tmp.display(), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| anyhow!("failed to replace zones file {}: {}", self.path.display(), e))?;
        log::info!("saved {} zones to {}", zones.len(), self.path.display());
        Ok(())
    }
}

/// Zones used when nothing is stored: left and right halves of a 320x240 frame.
pub fn default_zones(timeout: u64) -> Vec<ZoneConfig> {
    vec![
        ZoneConfig::new(1, "Zone 1", Rect::new(10, 10, 140, 220), timeout).with_relays([12]),
        ZoneConfig::new(2, "Zone 2", Rect::new(170, 10, 140, 220), timeout).with_relays([13]),
    ]
}

/// Stored zones when present, otherwise [`default_zones`].
pub fn load_or_default(store: &dyn ZoneStore, default_timeout: u64) -> Result<Vec<ZoneConfig>> {
    Ok(store
        .load(default_timeout)?
        .unwrap_or_else(|| default_zones(default_timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonZoneStore::new(dir.path().join("zones.json"));
        assert!(store.load(5).unwrap().is_none());
        let zones = load_or_default(&store, 5).unwrap();
        assert_eq!(zones, default_zones(5));
        assert_eq!(zones[1].relay_pins, vec![13]);
    }

    #[test]
    fn sparse_records_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(
            &path,
            r#"{"zones": [
                {"id": 4, "x": 3, "relayPins": [1, 2, 3, 4, 5, 6]},
                {"name": "A very long zone name that goes past the limit"}
            ]}"#,
        )
        .unwrap();

        let zones = JsonZoneStore::new(&path).load(8).unwrap().unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].id, 4);
        assert_eq!(zones[0].name, "Unnamed");
        assert_eq!(zones[0].rect(), Rect::new(3, 0, 100, 100));
        assert_eq!(zones[0].timeout, 8);
        assert_eq!(zones[0].relay_pins, vec![1, 2, 3, 4]);
        assert_eq!(zones[1].id, 0);
        assert_eq!(zones[1].name.chars().count(), 31);
        assert!(zones[1].relay_pins.is_empty());
    }

    #[test]
    fn save_then_load_preserves_zones() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonZoneStore::new(dir.path().join("nested").join("zones.json"));
        let zones = vec![
            ZoneConfig::new(9, "Gate", Rect::new(1, 2, 30, 40), 12).with_relays([21, 22]),
        ];
        store.save(&zones).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["zones"][0]["relayPins"], serde_json::json!([21, 22]));
        assert_eq!(store.load(5).unwrap().unwrap(), zones);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonZoneStore::new(&path).load(5).unwrap_err();
        assert!(err.to_string().contains("invalid zones file"));
    }
}
