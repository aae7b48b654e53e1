//! Bus scanner
//!
//! Discovers sensors on the configured pins and keeps the registry in
//! sync. A pass starts every `scan_interval_ms` and walks the 1-Wire
//! buses, then the DHT, light and RTD pins. Each call to
//! [`Scanner::step`] does a single unit of work:
//!
//! - one type probe of a record still in `Discovered`, otherwise
//! - one ROM-search round on one 1-Wire bus, or
//! - one fixed-pin registration.

use hal_abstractions::SensorBuses;
use heapless::Vec;

use crate::config::PersistedConfig;
use crate::drivers::onewire::{classify, RomSearch};
use crate::drivers::{Probe, SensorDriver, StepContext};
use crate::registry::{LifecycleState, Registry, SensorHandle, SensorRecord};
use crate::sensor::{BusKind, Rom, SensorKind};

/// Unsupported ROMs remembered so each is reported once
pub const IGNORE_CAPACITY: usize = 8;

/// Something the scheduler has to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanEvent {
    /// Probe succeeded, record is now `Active`
    Detected(SensorHandle),
    /// Device with an unsupported family code
    Unknown { pin: u8, rom: Rom },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    OneWire { bus_index: usize, search: RomSearch },
    Fixed { bus: BusKind, pin_index: usize },
}

impl Cursor {
    const fn start() -> Self {
        Cursor::OneWire {
            bus_index: 0,
            search: RomSearch::new(),
        }
    }

    /// Position after the current 1-Wire bus or fixed pin family
    fn next_bus(&self) -> Option<Self> {
        match self {
            Cursor::OneWire { bus_index, .. } => Some(Cursor::OneWire {
                bus_index: bus_index + 1,
                search: RomSearch::new(),
            }),
            Cursor::Fixed { bus, .. } => {
                let next = match bus {
                    BusKind::OneWire => BusKind::Dht,
                    BusKind::Dht => BusKind::Light,
                    BusKind::Light => BusKind::Rtd,
                    BusKind::Rtd => return None,
                };
                Some(Cursor::Fixed {
                    bus: next,
                    pin_index: 0,
                })
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Scanner {
    last_pass_ms: Option<u64>,
    cursor: Option<Cursor>,
    ignored: Vec<Rom, IGNORE_CAPACITY>,
    full_logged: bool,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pass is in progress
    pub fn is_scanning(&self) -> bool {
        self.cursor.is_some()
    }

    /// Force a pass on the next step
    pub fn restart(&mut self) {
        self.last_pass_ms = None;
        self.cursor = None;
    }

    pub fn step<B: SensorBuses, const N: usize>(
        &mut self,
        now_ms: u64,
        config: &PersistedConfig,
        registry: &mut Registry<N>,
        buses: &mut B,
    ) -> Option<ScanEvent> {
        if let Some(handle) = registry.first_discovered() {
            return Self::probe(handle, now_ms, config, registry, buses);
        }

        if self.cursor.is_none() {
            let due = self.last_pass_ms.map_or(true, |last| {
                now_ms.saturating_sub(last) >= u64::from(config.scan_interval_ms)
            });
            if !due {
                return None;
            }
            self.last_pass_ms = Some(now_ms);
            self.cursor = Some(Cursor::start());
            self.full_logged = false;
        }

        // skip empty positions so every step does real work
        while let Some(cursor) = self.cursor.take() {
            match self.unit(cursor, config, registry, buses) {
                Unit::Worked { next, event } => {
                    self.cursor = next;
                    return event;
                }
                Unit::Skipped { next } => self.cursor = next,
            }
        }
        None
    }

    fn probe<B: SensorBuses, const N: usize>(
        handle: SensorHandle,
        now_ms: u64,
        config: &PersistedConfig,
        registry: &mut Registry<N>,
        buses: &mut B,
    ) -> Option<ScanEvent> {
        let record = registry.get_mut(handle)?;
        let ctx = StepContext {
            now_ms,
            settings: &config.drivers,
            light_pins: &config.bus(BusKind::Light).pins,
        };
        match record.driver.probe(buses, &ctx) {
            Probe::Pending => None,
            Probe::Present => {
                record.driver.reset();
                record.state = LifecycleState::Active;
                record.cycle_pending = true;
                info!("Sensor detected on pin {}", record.pin);
                Some(ScanEvent::Detected(handle))
            }
            Probe::Absent => {
                debug!("Nothing answered on pin {}", record.pin);
                registry.remove(handle);
                None
            }
        }
    }

    fn unit<B: SensorBuses, const N: usize>(
        &mut self,
        cursor: Cursor,
        config: &PersistedConfig,
        registry: &mut Registry<N>,
        buses: &mut B,
    ) -> Unit {
        match cursor {
            Cursor::OneWire {
                bus_index,
                mut search,
            } => {
                let settings = config.bus(BusKind::OneWire);
                let Some(&pin) = settings.pins.get(bus_index) else {
                    return Unit::Skipped {
                        next: Some(Cursor::Fixed {
                            bus: BusKind::Dht,
                            pin_index: 0,
                        }),
                    };
                };
                let here = Cursor::OneWire {
                    bus_index,
                    search: RomSearch::new(),
                };
                if !self.has_room(registry, BusKind::OneWire, usize::from(settings.max_sensors)) {
                    return Unit::Skipped {
                        next: here.next_bus(),
                    };
                }

                let found = search.next(buses.one_wire(), pin);
                let next = if search.is_done() {
                    here.next_bus()
                } else {
                    Some(Cursor::OneWire { bus_index, search })
                };
                let event = match found {
                    Ok(Some(rom)) => self.register_rom(pin, rom, registry),
                    Ok(None) => None,
                    Err(e) => {
                        debug!("ROM search on pin {} failed: {}", pin, e);
                        None
                    }
                };
                Unit::Worked { next, event }
            }
            Cursor::Fixed { bus, pin_index } => {
                let settings = config.bus(bus);
                let here = Cursor::Fixed { bus, pin_index };
                let Some(&pin) = settings.pins.get(pin_index) else {
                    return Unit::Skipped {
                        next: here.next_bus(),
                    };
                };
                let next = Some(Cursor::Fixed {
                    bus,
                    pin_index: pin_index + 1,
                });
                if registry.pin_occupied(bus, pin)
                    || !self.has_room(registry, bus, usize::from(settings.max_sensors))
                {
                    return Unit::Skipped { next };
                }
                if let Some(kind) = SensorKind::for_fixed_bus(bus) {
                    self.insert(kind, pin, None, registry);
                }
                Unit::Worked { next, event: None }
            }
        }
    }

    fn has_room<const N: usize>(&mut self, registry: &Registry<N>, bus: BusKind, max_sensors: usize) -> bool {
        if registry.is_full() {
            if !self.full_logged {
                warn!("Sensor registry full, discovery paused");
                self.full_logged = true;
            }
            return false;
        }
        registry.count_on_bus(bus) < max_sensors
    }

    fn register_rom<const N: usize>(
        &mut self,
        pin: u8,
        rom: Rom,
        registry: &mut Registry<N>,
    ) -> Option<ScanEvent> {
        if registry.find_rom(&rom).is_some() {
            return None;
        }
        match classify(rom.family()) {
            Some(kind) => {
                self.insert(kind, pin, Some(rom), registry);
                None
            }
            None => {
                if self.ignored.contains(&rom) {
                    return None;
                }
                if self.ignored.is_full() {
                    self.ignored.remove(0);
                }
                let _ = self.ignored.push(rom);
                info!("Unsupported 1-Wire family {=u8:#x} on pin {}", rom.family(), pin);
                Some(ScanEvent::Unknown { pin, rom })
            }
        }
    }

    fn insert<const N: usize>(
        &mut self,
        kind: SensorKind,
        pin: u8,
        rom: Option<Rom>,
        registry: &mut Registry<N>,
    ) {
        let Some(driver) = SensorDriver::new(kind, pin, rom) else {
            return;
        };
        if registry
            .insert(SensorRecord::new(kind, pin, rom, driver))
            .is_err()
            && !self.full_logged
        {
            warn!("Sensor registry full, discovery paused");
            self.full_logged = true;
        }
    }
}

enum Unit {
    Worked {
        next: Option<Cursor>,
        event: Option<ScanEvent>,
    },
    Skipped {
        next: Option<Cursor>,
    },
}
