//! Poll scheduler
//!
//! [`Gateway::tick`] is called repeatedly by the board's poll task and
//! never blocks. One tick:
//!
//! 1. applies queued [`ConfigChange`]s,
//! 2. runs one bus scanner step,
//! 3. services the buses in the order 1-Wire, DHT, light, RTD: a bus
//!    whose period elapsed starts a new cycle, then every sensor with an
//!    unfinished read in the current cycle gets exactly one driver step,
//! 4. flushes the statistics when due.

use hal_abstractions::{ConfigStorage, DatagramSink, SensorBuses};
use heapless::{Deque, Vec};

use crate::config::{PersistedConfig, Statistics};
use crate::drivers::{Step, StepContext};
use crate::error::{ConfigError, StoreError};
use crate::hysteresis::{decide, Decision};
use crate::packet::Payload;
use crate::registry::{LifecycleState, Registry, SensorHandle};
use crate::scanner::{ScanEvent, Scanner};
use crate::schedule::BusSchedule;
use crate::sensor::{BusKind, Reading, Rom, SensorKind};
use crate::store::{ConfigChange, ConfigStore};
use crate::tracker::Outcome;
use crate::transport::Transport;

/// Default registry capacity
pub const MAX_SENSORS: usize = 32;

/// Changes accepted between two ticks
const CHANGE_QUEUE_DEPTH: usize = 4;

/// Read-only view of one registered sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorSnapshot {
    pub handle: SensorHandle,
    pub kind: SensorKind,
    pub pin: u8,
    /// Telemetry index (1-based pin position)
    pub index: usize,
    pub rom: Option<Rom>,
    pub state: LifecycleState,
    pub last_read: Option<Reading>,
    pub last_reported: Option<Reading>,
    /// Time of the latest driver step
    pub last_attempt_ms: u64,
    pub consecutive_failures: u8,
}

pub struct Gateway<S: ConfigStorage, T: DatagramSink, const N: usize = MAX_SENSORS> {
    store: ConfigStore<S>,
    transport: Transport<T>,
    registry: Registry<N>,
    scanner: Scanner,
    schedules: [BusSchedule; BusKind::COUNT],
    pending: Deque<ConfigChange, CHANGE_QUEUE_DEPTH>,
}

impl<S: ConfigStorage, T: DatagramSink, const N: usize> Gateway<S, T, N> {
    pub fn new(store: ConfigStore<S>, sink: T) -> Self {
        let schedules = schedules_for(store.config());
        Self {
            store,
            transport: Transport::new(sink),
            registry: Registry::new(),
            scanner: Scanner::new(),
            schedules,
            pending: Deque::new(),
        }
    }

    pub fn config(&self) -> &PersistedConfig {
        self.store.config()
    }

    pub fn statistics(&self) -> &Statistics {
        self.store.stats()
    }

    pub fn registry(&self) -> &Registry<N> {
        &self.registry
    }

    pub fn store(&self) -> &ConfigStore<S> {
        &self.store
    }

    pub fn sink(&self) -> &T {
        self.transport.sink()
    }

    pub fn sink_mut(&mut self) -> &mut T {
        self.transport.sink_mut()
    }

    /// Validate a configuration change and queue it for the next tick
    pub fn request(&mut self, change: ConfigChange) -> Result<(), ConfigError> {
        self.store.validate(&change)?;
        self.pending
            .push_back(change)
            .map_err(|_| ConfigError::QueueFull)
    }

    /// Persist configuration and statistics now
    pub fn save(&mut self) -> Result<(), StoreError> {
        self.store.save()
    }

    /// Current state of every registered sensor
    pub fn snapshot(&self) -> Vec<SensorSnapshot, N> {
        let cfg = self.store.config();
        self.registry
            .iter()
            .map(|(handle, r)| SensorSnapshot {
                handle,
                kind: r.kind,
                pin: r.pin,
                index: cfg.bus(r.bus()).pin_index(r.pin).unwrap_or(0),
                rom: r.identity,
                state: r.state,
                last_read: r.last_read,
                last_reported: r.last_reported,
                last_attempt_ms: r.last_attempt_ms,
                consecutive_failures: r.tracker.consecutive_failures(),
            })
            .collect()
    }

    pub fn tick<B: SensorBuses>(&mut self, now_ms: u64, buses: &mut B) {
        // a reset tick ends with an empty registry; discovery resumes next tick
        if !self.apply_pending() {
            self.scan(now_ms, buses);
        }
        for bus in BusKind::ALL {
            self.service_bus(bus, now_ms, buses);
        }
        self.store.flush_if_due(now_ms);
    }

    /// Returns whether a factory reset was applied
    fn apply_pending(&mut self) -> bool {
        let mut reset = false;
        while let Some(change) = self.pending.pop_front() {
            if let Err(e) = self.store.apply(&change) {
                warn!("Config change rejected: {}", e);
                continue;
            }
            let cfg = self.store.config();
            match &change {
                ConfigChange::Pins { bus, pins } => {
                    let bus = *bus;
                    self.registry.retain(|r| r.bus() != bus || pins.contains(&r.pin));
                    self.scanner.restart();
                }
                ConfigChange::CycleMs { bus, ms } => {
                    self.schedules[bus.index()].set_period(*ms);
                }
                ConfigChange::Driver(_) => {
                    for (_, r) in self.registry.iter_mut() {
                        r.driver.reset();
                    }
                }
                ConfigChange::ScanInterval(_) => self.scanner.restart(),
                ConfigChange::FactoryReset => {
                    self.registry.clear();
                    self.schedules = schedules_for(cfg);
                    self.scanner = Scanner::new();
                    reset = true;
                }
                ConfigChange::Policy { .. }
                | ConfigChange::Retries { .. }
                | ConfigChange::MaxSensors { .. }
                | ConfigChange::Network(_)
                | ConfigChange::BoardId(_) => {}
            }
        }
        reset
    }

    fn scan<B: SensorBuses>(&mut self, now_ms: u64, buses: &mut B) {
        let event = self
            .scanner
            .step(now_ms, self.store.config(), &mut self.registry, buses);
        match event {
            Some(ScanEvent::Detected(handle)) => {
                let Some(record) = self.registry.get(handle) else {
                    return;
                };
                let (bus, pin, rom) = (record.bus(), record.pin, record.identity);
                bump(&mut self.store.stats_mut().bus_mut(bus).detections);
                emit(&mut self.store, &mut self.transport, bus, pin, rom, Payload::Detected);
            }
            Some(ScanEvent::Unknown { pin, rom }) => {
                emit(
                    &mut self.store,
                    &mut self.transport,
                    BusKind::OneWire,
                    pin,
                    Some(rom),
                    Payload::Unknown,
                );
            }
            None => {}
        }
    }

    fn service_bus<B: SensorBuses>(&mut self, bus: BusKind, now_ms: u64, buses: &mut B) {
        let cfg = self.store.config();
        let settings = cfg.bus(bus);
        let limits = settings.limits();
        let policy = settings.policy;
        let drivers = cfg.drivers;
        let light_pins = cfg.bus(BusKind::Light).pins.clone();

        if self.schedules[bus.index()].start_cycle_if_due(now_ms) {
            for (_, r) in self.registry.iter_mut() {
                if r.bus() == bus && r.state.is_polled() {
                    r.cycle_pending = true;
                    r.tracker.begin_cycle();
                }
            }
        }

        let ctx = StepContext {
            now_ms,
            settings: &drivers,
            light_pins: &light_pins,
        };

        for handle in self.registry.handles() {
            let Some(record) = self.registry.get_mut(handle) else {
                continue;
            };
            if record.bus() != bus || !record.state.is_polled() || !record.cycle_pending {
                continue;
            }

            let step = record.driver.step(buses, &ctx);
            record.last_attempt_ms = now_ms;
            let (pin, rom, kind) = (record.pin, record.identity, record.kind);

            match step {
                Step::Pending => {}
                Step::Success(reading) => {
                    bump(&mut self.store.stats_mut().bus_mut(bus).reads_ok);
                    let outcome = record.tracker.record(&mut record.state, Ok(()), limits);
                    record.cycle_pending = false;
                    record.last_read = Some(reading);

                    let recovered = matches!(outcome, Outcome::Accepted { recovered: true });
                    let elapsed = now_ms.saturating_sub(record.last_report_ms);
                    let decision = if recovered {
                        Decision::Report
                    } else {
                        decide(record.last_reported.as_ref(), &reading, &policy, elapsed)
                    };
                    if decision == Decision::Report {
                        record.last_reported = Some(reading);
                        record.last_report_ms = now_ms;
                        let payload = Payload::Reading {
                            fields: kind.fields(),
                            values: reading,
                        };
                        emit(&mut self.store, &mut self.transport, bus, pin, rom, payload);
                    }
                }
                Step::Failure(reason) => {
                    bump(&mut self.store.stats_mut().bus_mut(bus).read_failures);
                    let outcome = record.tracker.record(&mut record.state, Err(reason), limits);
                    match outcome {
                        Outcome::Retry => {
                            debug!("Read on pin {} failed ({}), retrying", pin, reason);
                        }
                        Outcome::ReportError => {
                            record.cycle_pending = false;
                            warn!("Sensor on pin {} failed: {}", pin, reason);
                            bump(&mut self.store.stats_mut().bus_mut(bus).errors_reported);
                            emit(&mut self.store, &mut self.transport, bus, pin, rom, Payload::Error);
                        }
                        Outcome::Evict => {
                            warn!("Sensor on pin {} evicted after repeated failures", pin);
                            self.registry.remove(handle);
                            bump(&mut self.store.stats_mut().bus_mut(bus).evictions);
                            emit(&mut self.store, &mut self.transport, bus, pin, rom, Payload::Error);
                        }
                        Outcome::Accepted { .. } => {}
                    }
                }
            }
        }
    }
}

fn schedules_for(cfg: &PersistedConfig) -> [BusSchedule; BusKind::COUNT] {
    BusKind::ALL.map(|bus| BusSchedule::new(cfg.bus(bus).cycle_ms))
}

fn bump(counter: &mut u32) {
    *counter = counter.saturating_add(1);
}

/// Render and send one event; telemetry index and destination come from
/// the current configuration
fn emit<S: ConfigStorage, T: DatagramSink>(
    store: &mut ConfigStore<S>,
    transport: &mut Transport<T>,
    bus: BusKind,
    pin: u8,
    rom: Option<Rom>,
    payload: Payload,
) {
    let cfg = store.config();
    let to = cfg.network.destination();
    let board_id = cfg.board_id;
    let event = crate::packet::Event {
        bus,
        index: cfg.bus(bus).pin_index(pin).unwrap_or(0),
        rom,
        payload,
    };
    transport.emit(to, board_id, &event, store.stats_mut());
}
