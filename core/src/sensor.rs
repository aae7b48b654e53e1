//! Sensor identities, kinds and fixed-point readings

use crate::crc::crc8;

/// Maximum number of values one sensor reports together
pub const MAX_FIELDS: usize = 3;

/// One reported quantity of a sensor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    /// Name used in telemetry lines
    pub name: &'static str,
    /// Number of decimal places of the fixed-point value
    pub decimals: u8,
}

const TEMP: Field = Field {
    name: "temp",
    decimals: 1,
};
const HUMID: Field = Field {
    name: "humid",
    decimals: 1,
};
const VOLT: Field = Field {
    name: "volt",
    decimals: 2,
};
const CURR: Field = Field {
    name: "curr",
    decimals: 2,
};
const LUX: Field = Field {
    name: "lux",
    decimals: 1,
};

/// Physical bus family; each has its own read cycle and settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusKind {
    OneWire,
    Dht,
    Light,
    Rtd,
}

impl BusKind {
    pub const COUNT: usize = 4;

    /// Service order within one tick
    pub const ALL: [BusKind; Self::COUNT] =
        [BusKind::OneWire, BusKind::Dht, BusKind::Light, BusKind::Rtd];

    pub const fn index(self) -> usize {
        match self {
            BusKind::OneWire => 0,
            BusKind::Dht => 1,
            BusKind::Light => 2,
            BusKind::Rtd => 3,
        }
    }

    /// Telemetry tag prefix (`1w2`, `dht3`, ...)
    pub const fn tag(self) -> &'static str {
        match self {
            BusKind::OneWire => "1w",
            BusKind::Dht => "dht",
            BusKind::Light => "light",
            BusKind::Rtd => "rtd",
        }
    }
}

/// Sensor variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    /// DS18S20 / DS1822 / DS18B20 / DS1825 / DS28EA00
    OneWireTemp,
    /// DS2438 battery monitor (temperature, voltage, current)
    OneWireMulti,
    /// DHT11 / DHT22 family
    Dht,
    /// BH1750 ambient light
    Light,
    /// MAX31865 with Pt100/Pt1000
    Rtd,
}

impl SensorKind {
    pub const fn bus(self) -> BusKind {
        match self {
            SensorKind::OneWireTemp | SensorKind::OneWireMulti => BusKind::OneWire,
            SensorKind::Dht => BusKind::Dht,
            SensorKind::Light => BusKind::Light,
            SensorKind::Rtd => BusKind::Rtd,
        }
    }

    /// Fields reported by this kind, in telemetry order
    pub const fn fields(self) -> &'static [Field] {
        match self {
            SensorKind::OneWireTemp | SensorKind::Rtd => &[TEMP],
            SensorKind::OneWireMulti => &[TEMP, VOLT, CURR],
            SensorKind::Dht => &[TEMP, HUMID],
            SensorKind::Light => &[LUX],
        }
    }

    /// The pin-addressed kind hosted by a fixed-pin bus
    pub const fn for_fixed_bus(bus: BusKind) -> Option<SensorKind> {
        match bus {
            BusKind::OneWire => None,
            BusKind::Dht => Some(SensorKind::Dht),
            BusKind::Light => Some(SensorKind::Light),
            BusKind::Rtd => Some(SensorKind::Rtd),
        }
    }
}

/// 64-bit 1-Wire ROM code (family, 48-bit serial, CRC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rom(pub [u8; 8]);

impl Rom {
    /// Build a ROM from family code and serial, appending the CRC
    pub fn from_parts(family: u8, serial: [u8; 6]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[0] = family;
        bytes[1..7].copy_from_slice(&serial);
        bytes[7] = crc8(&bytes[..7]);
        Self(bytes)
    }

    pub const fn family(&self) -> u8 {
        self.0[0]
    }

    pub fn crc_valid(&self) -> bool {
        crc8(&self.0[..7]) == self.0[7]
    }
}

impl core::fmt::Display for Rom {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Decoded sensor values in fixed point (see [`Field::decimals`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    values: [i32; MAX_FIELDS],
    len: u8,
}

impl Reading {
    /// Build from up to [`MAX_FIELDS`] values; extra values are ignored
    pub fn new(values: &[i32]) -> Self {
        let len = values.len().min(MAX_FIELDS);
        let mut v = [0i32; MAX_FIELDS];
        v[..len].copy_from_slice(&values[..len]);
        Self {
            values: v,
            len: len as u8,
        }
    }

    pub fn single(value: i32) -> Self {
        Self::new(&[value])
    }

    pub fn values(&self) -> &[i32] {
        &self.values[..self.len as usize]
    }

    pub fn get(&self, field: usize) -> Option<i32> {
        self.values().get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Integer division rounding half away from zero
pub(crate) fn div_round(n: i64, d: i64) -> i64 {
    if (n < 0) == (d < 0) {
        (n + d / 2) / d
    } else {
        (n - d / 2) / d
    }
}
