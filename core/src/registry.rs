//! Active-sensor arena
//!
//! Records live in a fixed array of slots. A [`SensorHandle`] is the slot
//! index and stays valid until the record is removed; the slot may then be
//! reused by a later registration.

use crate::drivers::SensorDriver;
use crate::sensor::{BusKind, Reading, Rom, SensorKind};
use crate::tracker::RetryTracker;

/// Index of a record in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorHandle(pub(crate) u8);

impl SensorHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle of a registered sensor
///
/// ```text
/// Discovered ──probe ok──▶ Active ◀──success── ErrorReported
///     │                      │   ──retries exhausted──▶ │
///     └──probe fails──▶ (dropped)        max_errors ──▶ Evicted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleState {
    /// Found by the scanner, type probe still outstanding
    Discovered,
    /// Polled normally
    Active,
    /// Polled, but the last cycle ended with an `error` line
    ErrorReported,
    /// Removed; may be rediscovered by a later scan
    Evicted,
}

impl LifecycleState {
    /// Whether the scheduler reads this record
    pub const fn is_polled(self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::ErrorReported)
    }
}

#[derive(Debug)]
pub struct SensorRecord {
    /// ROM code for 1-Wire devices, `None` for pin-addressed sensors
    pub identity: Option<Rom>,
    pub pin: u8,
    pub kind: SensorKind,
    pub state: LifecycleState,
    pub last_read: Option<Reading>,
    pub last_reported: Option<Reading>,
    pub last_report_ms: u64,
    pub last_attempt_ms: u64,
    pub tracker: RetryTracker,
    pub driver: SensorDriver,
    /// Set at cycle start, cleared once the cycle's read concluded
    pub cycle_pending: bool,
}

impl SensorRecord {
    pub fn new(kind: SensorKind, pin: u8, identity: Option<Rom>, driver: SensorDriver) -> Self {
        Self {
            identity,
            pin,
            kind,
            state: LifecycleState::Discovered,
            last_read: None,
            last_reported: None,
            last_report_ms: 0,
            last_attempt_ms: 0,
            tracker: RetryTracker::new(),
            driver,
            cycle_pending: false,
        }
    }

    pub fn bus(&self) -> BusKind {
        self.kind.bus()
    }
}

/// No free slot left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegistryFull;

/// Fixed-capacity record store, `N` must not exceed 256
#[derive(Debug)]
pub struct Registry<const N: usize> {
    slots: [Option<SensorRecord>; N],
}

impl<const N: usize> Default for Registry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Registry<N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn insert(&mut self, record: SensorRecord) -> Result<SensorHandle, RegistryFull> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())
            .ok_or(RegistryFull)?;
        *slot = Some(record);
        Ok(SensorHandle(index as u8))
    }

    pub fn remove(&mut self, handle: SensorHandle) -> Option<SensorRecord> {
        self.slots.get_mut(handle.index()).and_then(Option::take)
    }

    pub fn get(&self, handle: SensorHandle) -> Option<&SensorRecord> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: SensorHandle) -> Option<&mut SensorRecord> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SensorHandle, &SensorRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|r| (SensorHandle(i as u8), r)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SensorHandle, &mut SensorRecord)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|r| (SensorHandle(i as u8), r)))
    }

    /// Handles of all records in slot order
    pub fn handles(&self) -> heapless::Vec<SensorHandle, N> {
        self.iter().map(|(h, _)| h).collect()
    }

    pub fn count_on_bus(&self, bus: BusKind) -> usize {
        self.iter().filter(|(_, r)| r.bus() == bus).count()
    }

    pub fn count_on_pin(&self, bus: BusKind, pin: u8) -> usize {
        self.iter()
            .filter(|(_, r)| r.bus() == bus && r.pin == pin)
            .count()
    }

    pub fn find_rom(&self, rom: &Rom) -> Option<SensorHandle> {
        self.iter()
            .find(|(_, r)| r.identity.as_ref() == Some(rom))
            .map(|(h, _)| h)
    }

    pub fn pin_occupied(&self, bus: BusKind, pin: u8) -> bool {
        self.count_on_pin(bus, pin) > 0
    }

    /// First record still waiting for its type probe
    pub fn first_discovered(&self) -> Option<SensorHandle> {
        self.iter()
            .find(|(_, r)| r.state == LifecycleState::Discovered)
            .map(|(h, _)| h)
    }

    /// Drop every record for which `keep` returns `false`
    pub fn retain(&mut self, mut keep: impl FnMut(&SensorRecord) -> bool) {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|r| !keep(r)) {
                *slot = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.retain(|_| false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dht_record(pin: u8) -> SensorRecord {
        let kind = SensorKind::Dht;
        SensorRecord::new(kind, pin, None, SensorDriver::new(kind, pin, None).unwrap())
    }

    fn ds18_record(pin: u8, serial: u8) -> SensorRecord {
        let rom = Rom::from_parts(0x28, [serial, 0, 0, 0, 0, 1]);
        let kind = SensorKind::OneWireTemp;
        SensorRecord::new(kind, pin, Some(rom), SensorDriver::new(kind, pin, Some(rom)).unwrap())
    }

    #[test]
    fn test_insert_until_full() {
        let mut reg: Registry<2> = Registry::new();
        assert!(reg.insert(dht_record(9)).is_ok());
        assert!(reg.insert(dht_record(10)).is_ok());
        assert!(reg.is_full());
        assert_eq!(reg.insert(dht_record(11)), Err(RegistryFull));
    }

    #[test]
    fn test_removed_slot_is_reused() {
        let mut reg: Registry<2> = Registry::new();
        let a = reg.insert(dht_record(9)).unwrap();
        let _b = reg.insert(dht_record(10)).unwrap();
        assert_eq!(reg.remove(a).map(|r| r.pin), Some(9));
        assert!(reg.get(a).is_none());
        let c = reg.insert(dht_record(11)).unwrap();
        assert_eq!(c, a);
        assert_eq!(reg.get(c).map(|r| r.pin), Some(11));
    }

    #[test]
    fn test_lookup_by_rom_and_pin() {
        let mut reg: Registry<4> = Registry::new();
        let rec = ds18_record(5, 7);
        let rom = rec.identity.unwrap();
        let h = reg.insert(rec).unwrap();
        reg.insert(ds18_record(5, 8)).unwrap();
        reg.insert(dht_record(9)).unwrap();

        assert_eq!(reg.find_rom(&rom), Some(h));
        assert_eq!(reg.count_on_bus(BusKind::OneWire), 2);
        assert_eq!(reg.count_on_pin(BusKind::OneWire, 5), 2);
        assert!(reg.pin_occupied(BusKind::Dht, 9));
        assert!(!reg.pin_occupied(BusKind::Dht, 5));
    }

    #[test]
    fn test_retain_and_first_discovered() {
        let mut reg: Registry<4> = Registry::new();
        let a = reg.insert(dht_record(9)).unwrap();
        let b = reg.insert(dht_record(10)).unwrap();
        reg.get_mut(a).unwrap().state = LifecycleState::Active;
        assert_eq!(reg.first_discovered(), Some(b));

        reg.retain(|r| r.pin != 10);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.first_discovered(), None);

        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_polled_states() {
        assert!(LifecycleState::Active.is_polled());
        assert!(LifecycleState::ErrorReported.is_polled());
        assert!(!LifecycleState::Discovered.is_polled());
        assert!(!LifecycleState::Evicted.is_polled());
    }
}
