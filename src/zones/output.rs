use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::zones::zone::{PinLevel, RelayPin};

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("relay pin {pin}: {source}")]
    Io {
        pin: RelayPin,
        #[source]
        source: io::Error,
    },
    #[error("relay pin {pin} rejected write: {reason}")]
    Rejected { pin: RelayPin, reason: String },
}

/// Digital output sink driven by the zone arbitrator.
///
/// Implementations write electrical levels only; polarity is applied
/// before `set_level` is called.
pub trait RelayOutput: Send {
    fn set_level(&mut self, pin: RelayPin, level: PinLevel) -> Result<(), OutputError>;
}

impl<O: RelayOutput + ?Sized> RelayOutput for Box<O> {
    fn set_level(&mut self, pin: RelayPin, level: PinLevel) -> Result<(), OutputError> {
        (**self).set_level(pin, level)
    }
}

/// Linux sysfs GPIO output (`/sys/class/gpio/gpioN/value`).
///
/// Pins are exported and configured as outputs on first write.
pub struct SysfsGpioOutput {
    root: PathBuf,
    prepared: HashSet<RelayPin>,
}

impl SysfsGpioOutput {
    pub fn new() -> Self {
        Self::with_root(SYSFS_GPIO_ROOT)
    }

    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            prepared: HashSet::new(),
        }
    }

    fn pin_dir(&self, pin: RelayPin) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn prepare(&mut self, pin: RelayPin) -> Result<(), OutputError> {
        if self.prepared.contains(&pin) {
            return Ok(());
        }
        let io_err = |source| OutputError::Io { pin, source };
        let dir = self.pin_dir(pin);
        if !dir.exists() {
            std::fs::write(self.root.join("export"), pin.to_string()).map_err(io_err)?;
        }
        std::fs::write(dir.join("direction"), "out").map_err(io_err)?;
        log::debug!("gpio{} exported as output", pin);
        self.prepared.insert(pin);
        Ok(())
    }
}

impl Default for SysfsGpioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayOutput for SysfsGpioOutput {
    fn set_level(&mut self, pin: RelayPin, level: PinLevel) -> Result<(), OutputError> {
        self.prepare(pin)?;
        std::fs::write(self.pin_dir(pin).join("value"), level.as_digit().to_string())
            .map_err(|source| OutputError::Io { pin, source })
    }
}

/// Dry-run output: logs every write.
#[derive(Debug, Default)]
pub struct LogOutput;

impl LogOutput {
    pub fn new() -> Self {
        Self
    }
}

impl RelayOutput for LogOutput {
    fn set_level(&mut self, pin: RelayPin, level: PinLevel) -> Result<(), OutputError> {
        log::info!("relay pin {} set {:?}", pin, level);
        Ok(())
    }
}

/// In-memory output that records every write.
///
/// Clones share the same log, so a test can keep one handle while the
/// arbitrator owns the other.
#[derive(Clone, Debug, Default)]
pub struct RecordingOutput {
    writes: Arc<Mutex<Vec<(RelayPin, PinLevel)>>>,
    failing: Arc<Mutex<HashSet<RelayPin>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(RelayPin, PinLevel)> {
        match self.writes.lock() {
            Ok(writes) => writes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn writes_for(&self, pin: RelayPin) -> Vec<PinLevel> {
        self.writes()
            .into_iter()
            .filter(|(written, _)| *written == pin)
            .map(|(_, level)| level)
            .collect()
    }

    /// Most recent level written to `pin`.
    pub fn level(&self, pin: RelayPin) -> Option<PinLevel> {
        self.writes_for(pin).last().copied()
    }

    pub fn clear(&self) {
        if let Ok(mut writes) = self.writes.lock() {
            writes.clear();
        }
    }

    /// Make writes to `pin` fail until `restore` is called.
    pub fn fail_pin(&self, pin: RelayPin) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(pin);
        }
    }

    pub fn restore(&self, pin: RelayPin) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&pin);
        }
    }
}

impl RelayOutput for RecordingOutput {
    fn set_level(&mut self, pin: RelayPin, level: PinLevel) -> Result<(), OutputError> {
        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(&pin))
            .unwrap_or(false);
        if failing {
            return Err(OutputError::Rejected {
                pin,
                reason: "injected failure".to_string(),
            });
        }
        match self.writes.lock() {
            Ok(mut writes) => writes.push((pin, level)),
            Err(poisoned) => poisoned.into_inner().push((pin, level)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysfs_writes_direction_and_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("gpio12")).unwrap();
        let mut output = SysfsGpioOutput::with_root(dir.path());

        output.set_level(12, PinLevel::High).unwrap();
        let gpio = dir.path().join("gpio12");
        assert_eq!(std::fs::read_to_string(gpio.join("direction")).unwrap(), "out");
        assert_eq!(std::fs::read_to_string(gpio.join("value")).unwrap(), "1");

        output.set_level(12, PinLevel::Low).unwrap();
        assert_eq!(std::fs::read_to_string(gpio.join("value")).unwrap(), "0");
    }

    #[test]
    fn sysfs_exports_missing_pin() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = SysfsGpioOutput::with_root(dir.path());
        // The fake root has no kernel behind it, so the pin directory never appears.
        let err = output.set_level(7, PinLevel::High).unwrap_err();
        assert!(matches!(err, OutputError::Io { pin: 7, .. }));
        assert_eq!(std::fs::read_to_string(dir.path().join("export")).unwrap(), "7");
    }

    #[test]
    fn recording_output_shares_log_between_clones() {
        let recorder = RecordingOutput::new();
        let mut owned = recorder.clone();
        owned.set_level(4, PinLevel::High).unwrap();
        owned.set_level(5, PinLevel::Low).unwrap();
        assert_eq!(recorder.writes(), vec![(4, PinLevel::High), (5, PinLevel::Low)]);
        assert_eq!(recorder.level(4), Some(PinLevel::High));

        recorder.fail_pin(4);
        assert!(owned.set_level(4, PinLevel::Low).is_err());
        recorder.restore(4);
        owned.set_level(4, PinLevel::Low).unwrap();
        assert_eq!(recorder.writes_for(4), vec![PinLevel::High, PinLevel::Low]);
    }
}
