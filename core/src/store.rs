//! Configuration/statistics store
//!
//! Sole owner and writer of [`PersistedConfig`]. Configuration is saved on
//! every applied change; statistics ride along and are otherwise flushed
//! every [`STATS_FLUSH_INTERVAL_MS`] to bound flash wear.

use heapless::Vec;
use hal_abstractions::{ConfigStorage, StorageError};
use rand_core::RngCore;

use crate::config::{
    DriverSettings, NetworkSettings, PersistedConfig, Statistics, BLOB_CAPACITY, MAC_PREFIX,
    MAX_PINS,
};
use crate::error::{ConfigError, StoreError};
use crate::hysteresis::ReportPolicy;
use crate::sensor::BusKind;

pub const STATS_FLUSH_INTERVAL_MS: u64 = 6 * 60 * 60 * 1000;

const MIN_CYCLE_MS: u32 = 100;
const MIN_SCAN_INTERVAL_MS: u32 = 1_000;

/// What was found in storage at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootOutcome {
    Loaded,
    /// Stored layout differs from this firmware; defaults and new identity
    VersionMismatch { stored: u8 },
    /// Nothing stored yet; defaults and new identity
    Blank,
    /// Unreadable or failing CRC; defaults and new identity
    Corrupt,
}

/// Runtime configuration mutation
///
/// Requests are validated immediately and applied at the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigChange {
    Pins { bus: BusKind, pins: Vec<u8, MAX_PINS> },
    CycleMs { bus: BusKind, ms: u32 },
    Policy { bus: BusKind, policy: ReportPolicy },
    Retries { bus: BusKind, max_retries: u8, max_errors: u8 },
    MaxSensors { bus: BusKind, max_sensors: u8 },
    Driver(DriverSettings),
    Network(NetworkSettings),
    BoardId(u8),
    ScanInterval(u32),
    /// Restore defaults, keep the MAC address
    FactoryReset,
}

/// MAC address from the fixed prefix and three random bytes
pub fn derive_mac<R: RngCore>(rng: &mut R) -> [u8; 6] {
    let mut tail = [0u8; 3];
    rng.fill_bytes(&mut tail);
    [MAC_PREFIX[0], MAC_PREFIX[1], MAC_PREFIX[2], tail[0], tail[1], tail[2]]
}

pub struct ConfigStore<S: ConfigStorage> {
    storage: S,
    config: PersistedConfig,
    last_flush_ms: u64,
}

impl<S: ConfigStorage> ConfigStore<S> {
    /// Load the stored configuration, falling back to defaults with a new
    /// identity when it is missing, unreadable or of another version
    pub fn boot<R: RngCore>(mut storage: S, rng: &mut R) -> (Self, BootOutcome) {
        let mut buf = [0u8; BLOB_CAPACITY];
        let loaded = match storage.load(&mut buf) {
            Ok(len) => match PersistedConfig::decode(&buf[..len.min(BLOB_CAPACITY)]) {
                Ok(config) => Ok(config),
                Err(StoreError::VersionMismatch { stored }) => {
                    Err(BootOutcome::VersionMismatch { stored })
                }
                Err(_) => Err(BootOutcome::Corrupt),
            },
            Err(StorageError::Empty) => Err(BootOutcome::Blank),
            Err(_) => Err(BootOutcome::Corrupt),
        };

        let (config, outcome) = match loaded {
            Ok(config) => (config, BootOutcome::Loaded),
            Err(outcome) => {
                warn!("Config reset to defaults: {}", outcome);
                (PersistedConfig::with_mac(derive_mac(rng)), outcome)
            }
        };

        let mut store = Self {
            storage,
            config,
            last_flush_ms: 0,
        };
        store.config.stats.boots = store.config.stats.boots.saturating_add(1);
        if let Err(e) = store.save() {
            error!("Failed to save config at boot: {}", e);
        }
        (store, outcome)
    }

    pub fn config(&self) -> &PersistedConfig {
        &self.config
    }

    pub fn stats(&self) -> &Statistics {
        &self.config.stats
    }

    pub fn stats_mut(&mut self) -> &mut Statistics {
        &mut self.config.stats
    }

    /// Check a change against the current configuration
    pub fn validate(&self, change: &ConfigChange) -> Result<(), ConfigError> {
        let ok = match change {
            ConfigChange::Pins { bus, pins } => return self.validate_pins(*bus, pins),
            ConfigChange::CycleMs { ms, .. } => *ms >= MIN_CYCLE_MS,
            ConfigChange::Policy { policy, .. } => policy.is_valid(),
            ConfigChange::Retries {
                max_retries,
                max_errors,
                ..
            } => *max_retries >= 1 && *max_errors >= 1,
            ConfigChange::MaxSensors { max_sensors, .. } => *max_sensors >= 1,
            ConfigChange::Driver(d) => {
                (9..=12).contains(&d.ds18_resolution)
                    && (2..=4).contains(&d.rtd.wires)
                    && d.rtd.nominal_ohms > 0
                    && d.rtd.reference_ohms > 0
            }
            ConfigChange::Network(n) => n.udp_port != 0,
            ConfigChange::ScanInterval(ms) => *ms >= MIN_SCAN_INTERVAL_MS,
            ConfigChange::BoardId(_) | ConfigChange::FactoryReset => true,
        };
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue)
        }
    }

    fn validate_pins(&self, bus: BusKind, pins: &[u8]) -> Result<(), ConfigError> {
        for (i, pin) in pins.iter().enumerate() {
            if pins[..i].contains(pin) {
                return Err(ConfigError::PinConflict);
            }
            let taken = BusKind::ALL
                .iter()
                .filter(|&&other| other != bus)
                .any(|&other| self.config.bus(other).pins.contains(pin));
            if taken {
                return Err(ConfigError::PinConflict);
            }
        }
        Ok(())
    }

    /// Validate and apply a change
    ///
    /// Only a factory reset is written immediately; everything else is
    /// persisted by the next statistics flush or explicit [`Self::save`].
    pub fn apply(&mut self, change: &ConfigChange) -> Result<(), ConfigError> {
        self.validate(change)?;
        let cfg = &mut self.config;
        match change {
            ConfigChange::Pins { bus, pins } => cfg.bus_mut(*bus).pins = pins.clone(),
            ConfigChange::CycleMs { bus, ms } => cfg.bus_mut(*bus).cycle_ms = *ms,
            ConfigChange::Policy { bus, policy } => cfg.bus_mut(*bus).policy = *policy,
            ConfigChange::Retries {
                bus,
                max_retries,
                max_errors,
            } => {
                let b = cfg.bus_mut(*bus);
                b.max_retries = *max_retries;
                b.max_errors = *max_errors;
            }
            ConfigChange::MaxSensors { bus, max_sensors } => {
                cfg.bus_mut(*bus).max_sensors = *max_sensors
            }
            ConfigChange::Driver(d) => cfg.drivers = *d,
            ConfigChange::Network(n) => cfg.network = *n,
            ConfigChange::BoardId(id) => cfg.board_id = *id,
            ConfigChange::ScanInterval(ms) => cfg.scan_interval_ms = *ms,
            ConfigChange::FactoryReset => self.factory_reset(),
        }
        Ok(())
    }

    /// Restore defaults and counters, keeping the MAC address
    pub fn factory_reset(&mut self) {
        info!("Factory reset");
        let boots = self.config.stats.boots;
        self.config = PersistedConfig::with_mac(self.config.mac);
        self.config.stats.boots = boots;
        if let Err(e) = self.save() {
            error!("Failed to save config after reset: {}", e);
        }
    }

    /// Persist the statistics once the flush interval elapsed
    pub fn flush_if_due(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_flush_ms) < STATS_FLUSH_INTERVAL_MS {
            return false;
        }
        self.last_flush_ms = now_ms;
        match self.save() {
            Ok(()) => {
                debug!("Statistics flushed");
                true
            }
            Err(e) => {
                error!("Failed to flush statistics: {}", e);
                false
            }
        }
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        let mut buf = [0u8; BLOB_CAPACITY];
        let len = self.config.encode(&mut buf)?;
        self.storage.save(&buf[..len])?;
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SCHEMA_VERSION;
    use crate::mock::{FixedRng, MemoryStorage};

    fn boot(storage: MemoryStorage, seed: u8) -> (ConfigStore<MemoryStorage>, BootOutcome) {
        ConfigStore::boot(storage, &mut FixedRng::new(seed))
    }

    #[test]
    fn test_blank_storage_gets_defaults_and_identity() {
        let (store, outcome) = boot(MemoryStorage::new(), 0x11);
        assert_eq!(outcome, BootOutcome::Blank);
        assert_eq!(&store.config().mac[..3], &MAC_PREFIX);
        assert_eq!(&store.config().mac[3..], &[0x11, 0x12, 0x13]);
        assert_eq!(store.stats().boots, 1);
        assert!(store.storage().saves() >= 1);
    }

    #[test]
    fn test_reboot_loads_saved_config() {
        let (mut store, _) = boot(MemoryStorage::new(), 0x11);
        store.apply(&ConfigChange::BoardId(9)).unwrap();
        store.save().unwrap();
        let mac = store.config().mac;

        let (store, outcome) = boot(store.storage().clone(), 0x55);
        assert_eq!(outcome, BootOutcome::Loaded);
        assert_eq!(store.config().board_id, 9);
        assert_eq!(store.config().mac, mac);
        assert_eq!(store.stats().boots, 2);
    }

    #[test]
    fn test_changes_are_not_written_until_saved() {
        let (mut store, _) = boot(MemoryStorage::new(), 0x11);
        let saves = store.storage().saves();
        store.apply(&ConfigChange::BoardId(9)).unwrap();
        store.apply(&ConfigChange::ScanInterval(10_000)).unwrap();
        assert_eq!(store.storage().saves(), saves);

        let (rebooted, _) = boot(store.storage().clone(), 0x11);
        assert_eq!(rebooted.config().board_id, 1);

        store.apply(&ConfigChange::FactoryReset).unwrap();
        assert_eq!(store.storage().saves(), saves + 1);
    }

    #[test]
    fn test_version_mismatch_resets_with_new_identity() {
        let (mut store, _) = boot(MemoryStorage::new(), 0x11);
        store.apply(&ConfigChange::BoardId(9)).unwrap();
        store.save().unwrap();
        let old_mac = store.config().mac;

        let mut storage = store.storage().clone();
        storage.corrupt_byte(0, SCHEMA_VERSION + 1);
        let (store, outcome) = boot(storage, 0x55);
        assert_eq!(
            outcome,
            BootOutcome::VersionMismatch {
                stored: SCHEMA_VERSION + 1
            }
        );
        assert_eq!(store.config().board_id, 1);
        assert_ne!(store.config().mac, old_mac);
        assert_eq!(store.config().version, SCHEMA_VERSION);
    }

    #[test]
    fn test_corrupt_blob_resets() {
        let (store, _) = boot(MemoryStorage::new(), 0x11);
        let mut storage = store.storage().clone();
        storage.corrupt_byte(20, 0xEE);
        let (_, outcome) = boot(storage, 0x11);
        assert_eq!(outcome, BootOutcome::Corrupt);
    }

    #[test]
    fn test_factory_reset_keeps_identity() {
        let (mut store, _) = boot(MemoryStorage::new(), 0x11);
        store.apply(&ConfigChange::BoardId(9)).unwrap();
        let mac = store.config().mac;
        store.apply(&ConfigChange::FactoryReset).unwrap();
        assert_eq!(store.config().board_id, 1);
        assert_eq!(store.config().mac, mac);

        let (store, outcome) = boot(store.storage().clone(), 0x77);
        assert_eq!(outcome, BootOutcome::Loaded);
        assert_eq!(store.config().mac, mac);
    }

    #[test]
    fn test_pin_conflicts_are_rejected() {
        let (store, _) = boot(MemoryStorage::new(), 0x11);
        let dup = ConfigChange::Pins {
            bus: BusKind::Dht,
            pins: Vec::from_slice(&[3, 3]).unwrap(),
        };
        assert_eq!(store.validate(&dup), Err(ConfigError::PinConflict));
        // pin 5 belongs to the 1-Wire bus
        let taken = ConfigChange::Pins {
            bus: BusKind::Dht,
            pins: Vec::from_slice(&[5]).unwrap(),
        };
        assert_eq!(store.validate(&taken), Err(ConfigError::PinConflict));
        let fine = ConfigChange::Pins {
            bus: BusKind::Dht,
            pins: Vec::from_slice(&[9, 3]).unwrap(),
        };
        assert_eq!(store.validate(&fine), Ok(()));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let (mut store, _) = boot(MemoryStorage::new(), 0x11);
        let bad = [
            ConfigChange::CycleMs {
                bus: BusKind::Light,
                ms: 10,
            },
            ConfigChange::Policy {
                bus: BusKind::Rtd,
                policy: ReportPolicy::new([1, 0, 0], 10_000, 5_000),
            },
            ConfigChange::Retries {
                bus: BusKind::OneWire,
                max_retries: 0,
                max_errors: 5,
            },
            ConfigChange::ScanInterval(10),
        ];
        for change in &bad {
            assert_eq!(store.apply(change), Err(ConfigError::InvalidValue));
        }
        assert_eq!(store.config().bus(BusKind::Light).cycle_ms, 1_000);
    }

    #[test]
    fn test_statistics_flush_interval() {
        let (mut store, _) = boot(MemoryStorage::new(), 0x11);
        let saves = store.storage().saves();
        store.stats_mut().datagrams_sent = 5;
        assert!(!store.flush_if_due(STATS_FLUSH_INTERVAL_MS - 1));
        assert_eq!(store.storage().saves(), saves);
        assert!(store.flush_if_due(STATS_FLUSH_INTERVAL_MS));
        assert_eq!(store.storage().saves(), saves + 1);
        assert!(!store.flush_if_due(STATS_FLUSH_INTERVAL_MS + 1));

        let (store, _) = boot(store.storage().clone(), 0x11);
        assert_eq!(store.stats().datagrams_sent, 5);
    }
}
