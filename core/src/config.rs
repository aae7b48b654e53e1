//! Gateway configuration, statistics and their persisted encoding
//!
//! Defaults mirror a stock installation: static addressing on
//! 192.168.1.0/24, telemetry broadcast to UDP port 10000, one 1-Wire bus,
//! one DHT, two BH1750 and one MAX31865.
//!
//! The blob layout is a flat little-endian record: schema version first,
//! CRC-8 of everything before it last. Bump [`SCHEMA_VERSION`] whenever
//! the layout or the meaning of a field changes.

use heapless::Vec;
use hal_abstractions::Endpoint;

use crate::crc::crc8;
use crate::drivers::{DhtModel, LightMode, MainsFilter, RtdSettings};
use crate::error::StoreError;
use crate::hysteresis::ReportPolicy;
use crate::sensor::{BusKind, MAX_FIELDS};
use crate::tracker::RetryLimits;

pub const SCHEMA_VERSION: u8 = 1;

/// Maximum configured pins per bus family
pub const MAX_PINS: usize = 4;

/// Locally administered OUI used for derived MAC addresses
pub const MAC_PREFIX: [u8; 3] = [0x90, 0xA2, 0xDA];

/// Upper bound of an encoded [`PersistedConfig`]
pub const BLOB_CAPACITY: usize = 256;

/// Static IPv4 setup and telemetry destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkSettings {
    pub ip: [u8; 4],
    pub mask: [u8; 4],
    pub gateway: [u8; 4],
    pub remote_ip: [u8; 4],
    pub udp_port: u16,
    /// Send to the subnet broadcast address instead of `remote_ip`
    pub broadcast: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ip: [192, 168, 1, 254],
            mask: [255, 255, 255, 0],
            gateway: [192, 168, 1, 1],
            remote_ip: [192, 168, 1, 22],
            udp_port: 10000,
            broadcast: true,
        }
    }
}

impl NetworkSettings {
    /// Telemetry destination
    pub fn destination(&self) -> Endpoint {
        let addr = if self.broadcast {
            core::array::from_fn(|i| self.ip[i] | !self.mask[i])
        } else {
            self.remote_ip
        };
        Endpoint::new(addr, self.udp_port)
    }

    /// Prefix length of `mask`
    pub fn prefix_len(&self) -> u8 {
        u32::from_be_bytes(self.mask).leading_ones() as u8
    }
}

/// Per-bus acquisition and reporting tunables
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusSettings {
    /// Data pins (1-Wire, DHT), ADDR pins (BH1750) or CS pins (MAX31865)
    pub pins: Vec<u8, MAX_PINS>,
    pub cycle_ms: u32,
    /// Read attempts per cycle before an `error` line
    pub max_retries: u8,
    /// Consecutive failures before a sensor is evicted
    pub max_errors: u8,
    /// Sensor limit across all pins of this bus
    pub max_sensors: u8,
    pub policy: ReportPolicy,
}

impl BusSettings {
    pub fn defaults_for(bus: BusKind) -> Self {
        let (pins, cycle_ms, max_sensors, policy): (&[u8], u32, u8, ReportPolicy) = match bus {
            BusKind::OneWire => (&[5], 10_000, 30, ReportPolicy::new([1, 1, 1], 30_000, 600_000)),
            BusKind::Dht => (&[9], 20_000, 1, ReportPolicy::new([1, 5, 0], 20_000, 600_000)),
            BusKind::Light => (&[10, 14], 1_000, 2, ReportPolicy::new([10, 0, 0], 1_000, 60_000)),
            BusKind::Rtd => (&[18], 2_000, 1, ReportPolicy::new([10, 0, 0], 5_000, 60_000)),
        };
        let mut v = Vec::new();
        for &p in pins {
            let _ = v.push(p);
        }
        Self {
            pins: v,
            cycle_ms,
            max_retries: 5,
            max_errors: 10,
            max_sensors,
            policy,
        }
    }

    pub fn limits(&self) -> RetryLimits {
        RetryLimits {
            max_retries: self.max_retries,
            max_errors: self.max_errors,
        }
    }

    /// 1-based position of `pin`, used as the telemetry index
    pub fn pin_index(&self, pin: u8) -> Option<usize> {
        self.pins.iter().position(|&p| p == pin).map(|i| i + 1)
    }
}

/// Driver tunables shared by all sensors of a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverSettings {
    /// DS18x20 resolution in bits (9..=12)
    pub ds18_resolution: u8,
    pub dht_model: DhtModel,
    pub light_mode: LightMode,
    pub rtd: RtdSettings,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            ds18_resolution: 12,
            dht_model: DhtModel::Dht22,
            light_mode: LightMode::High2,
            rtd: RtdSettings::default(),
        }
    }
}

/// Counters of one bus family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusCounters {
    pub reads_ok: u32,
    pub read_failures: u32,
    pub errors_reported: u32,
    pub evictions: u32,
    pub detections: u32,
}

/// Running counters, persisted on a coarse interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Statistics {
    pub per_bus: [BusCounters; BusKind::COUNT],
    pub datagrams_sent: u32,
    pub datagrams_dropped: u32,
    pub boots: u32,
}

impl Statistics {
    pub fn bus(&self, bus: BusKind) -> &BusCounters {
        &self.per_bus[bus.index()]
    }

    pub fn bus_mut(&mut self, bus: BusKind) -> &mut BusCounters {
        &mut self.per_bus[bus.index()]
    }
}

/// Everything kept across power cycles
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PersistedConfig {
    pub version: u8,
    pub mac: [u8; 6],
    /// Number in the `gw<id>` telemetry prefix
    pub board_id: u8,
    pub network: NetworkSettings,
    pub buses: [BusSettings; BusKind::COUNT],
    pub drivers: DriverSettings,
    pub scan_interval_ms: u32,
    pub stats: Statistics,
}

impl PersistedConfig {
    /// Compiled-in defaults with the given identity
    pub fn with_mac(mac: [u8; 6]) -> Self {
        Self {
            version: SCHEMA_VERSION,
            mac,
            board_id: 1,
            network: NetworkSettings::default(),
            buses: BusKind::ALL.map(BusSettings::defaults_for),
            drivers: DriverSettings::default(),
            scan_interval_ms: 5_000,
            stats: Statistics::default(),
        }
    }

    pub fn bus(&self, bus: BusKind) -> &BusSettings {
        &self.buses[bus.index()]
    }

    pub fn bus_mut(&mut self, bus: BusKind) -> &mut BusSettings {
        &mut self.buses[bus.index()]
    }

    /// Serialize into `buf`, returning the encoded length
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let mut w = Writer::new(buf);
        w.u8(self.version)?;
        w.bytes(&self.mac)?;
        w.u8(self.board_id)?;

        let n = &self.network;
        w.bytes(&n.ip)?;
        w.bytes(&n.mask)?;
        w.bytes(&n.gateway)?;
        w.bytes(&n.remote_ip)?;
        w.u16(n.udp_port)?;
        w.u8(u8::from(n.broadcast))?;

        for bus in &self.buses {
            w.u8(bus.pins.len() as u8)?;
            for i in 0..MAX_PINS {
                w.u8(bus.pins.get(i).copied().unwrap_or(0))?;
            }
            w.u32(bus.cycle_ms)?;
            w.u8(bus.max_retries)?;
            w.u8(bus.max_errors)?;
            w.u8(bus.max_sensors)?;
            for t in bus.policy.thresholds {
                w.u16(t)?;
            }
            w.u32(bus.policy.min_interval_ms)?;
            w.u32(bus.policy.max_interval_ms)?;
        }

        let d = &self.drivers;
        w.u8(d.ds18_resolution)?;
        w.u8(d.dht_model.to_u8())?;
        w.u8(d.light_mode.to_u8())?;
        w.u8(d.rtd.wires)?;
        w.u16(d.rtd.nominal_ohms)?;
        w.u16(d.rtd.reference_ohms)?;
        w.u8(u8::from(d.rtd.filter == MainsFilter::Hz60))?;

        w.u32(self.scan_interval_ms)?;

        for c in &self.stats.per_bus {
            w.u32(c.reads_ok)?;
            w.u32(c.read_failures)?;
            w.u32(c.errors_reported)?;
            w.u32(c.evictions)?;
            w.u32(c.detections)?;
        }
        w.u32(self.stats.datagrams_sent)?;
        w.u32(self.stats.datagrams_dropped)?;
        w.u32(self.stats.boots)?;

        let crc = crc8(w.written());
        w.u8(crc)?;
        Ok(w.pos)
    }

    /// Parse a blob produced by [`PersistedConfig::encode`]
    ///
    /// The version byte is checked before the CRC so a layout change is
    /// reported as such and not as corruption.
    pub fn decode(data: &[u8]) -> Result<Self, StoreError> {
        let (&version, _) = data.split_first().ok_or(StoreError::Corrupt)?;
        if version != SCHEMA_VERSION {
            return Err(StoreError::VersionMismatch { stored: version });
        }
        let (&crc, body) = data.split_last().ok_or(StoreError::Corrupt)?;
        if crc8(body) != crc {
            return Err(StoreError::Corrupt);
        }

        let mut r = Reader::new(body);
        let version = r.u8()?;
        let mac = r.array::<6>()?;
        let board_id = r.u8()?;

        let network = NetworkSettings {
            ip: r.array()?,
            mask: r.array()?,
            gateway: r.array()?,
            remote_ip: r.array()?,
            udp_port: r.u16()?,
            broadcast: r.bool()?,
        };

        let mut buses = BusKind::ALL.map(BusSettings::defaults_for);
        for bus in buses.iter_mut() {
            let count = usize::from(r.u8()?);
            let raw = r.array::<MAX_PINS>()?;
            if count > MAX_PINS {
                return Err(StoreError::Corrupt);
            }
            bus.pins = Vec::from_slice(&raw[..count]).map_err(|_| StoreError::Corrupt)?;
            bus.cycle_ms = r.u32()?;
            bus.max_retries = r.u8()?;
            bus.max_errors = r.u8()?;
            bus.max_sensors = r.u8()?;
            let mut thresholds = [0u16; MAX_FIELDS];
            for t in thresholds.iter_mut() {
                *t = r.u16()?;
            }
            bus.policy = ReportPolicy::new(thresholds, r.u32()?, r.u32()?);
        }

        let drivers = DriverSettings {
            ds18_resolution: r.u8()?,
            dht_model: DhtModel::from_u8(r.u8()?).ok_or(StoreError::Corrupt)?,
            light_mode: LightMode::from_u8(r.u8()?).ok_or(StoreError::Corrupt)?,
            rtd: RtdSettings {
                wires: r.u8()?,
                nominal_ohms: r.u16()?,
                reference_ohms: r.u16()?,
                filter: if r.bool()? { MainsFilter::Hz60 } else { MainsFilter::Hz50 },
            },
        };

        let scan_interval_ms = r.u32()?;

        let mut stats = Statistics::default();
        for c in stats.per_bus.iter_mut() {
            c.reads_ok = r.u32()?;
            c.read_failures = r.u32()?;
            c.errors_reported = r.u32()?;
            c.evictions = r.u32()?;
            c.detections = r.u32()?;
        }
        stats.datagrams_sent = r.u32()?;
        stats.datagrams_dropped = r.u32()?;
        stats.boots = r.u32()?;

        if !r.is_empty() {
            return Err(StoreError::Corrupt);
        }

        Ok(Self {
            version,
            mac,
            board_id,
            network,
            buses,
            drivers,
            scan_interval_ms,
            stats,
        })
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    fn bytes(&mut self, data: &[u8]) -> Result<(), StoreError> {
        let end = self.pos + data.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(StoreError::BufferTooSmall)?
            .copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    fn u8(&mut self, v: u8) -> Result<(), StoreError> {
        self.bytes(&[v])
    }

    fn u16(&mut self, v: u16) -> Result<(), StoreError> {
        self.bytes(&v.to_le_bytes())
    }

    fn u32(&mut self, v: u32) -> Result<(), StoreError> {
        self.bytes(&v.to_le_bytes())
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StoreError> {
        if self.data.len() < N {
            return Err(StoreError::Corrupt);
        }
        let (head, rest) = self.data.split_at(N);
        self.data = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, StoreError> {
        Ok(self.array::<1>()?[0])
    }

    fn bool(&mut self) -> Result<bool, StoreError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(StoreError::Corrupt),
        }
    }

    fn u16(&mut self) -> Result<u16, StoreError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, StoreError> {
        Ok(u32::from_le_bytes(self.array()?))
    }
}
