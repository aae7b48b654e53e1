//! DHT11 / DHT22 humidity and temperature sensors

use hal_abstractions::DhtLine;

use super::Step;
use crate::error::ReadFailure;
use crate::sensor::Reading;

/// Host start signal length; covers the 18 ms DHT11 minimum
const START_MS: u64 = 20;

const HUMIDITY_MAX: i32 = 1000;
const TEMP_MIN: i32 = -400;
const TEMP_MAX: i32 = 800;

/// Frame encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DhtModel {
    /// Integer + decimal byte pairs (DHT11, DHT12)
    Dht11,
    /// 16-bit tenths with sign bit (DHT22/AM2302, DHT33, DHT44)
    #[default]
    Dht22,
}

impl DhtModel {
    pub fn to_u8(self) -> u8 {
        match self {
            DhtModel::Dht11 => 11,
            DhtModel::Dht22 => 22,
        }
    }

    /// Shortest spacing between two start signals the sensor honours
    pub fn min_interval_ms(self) -> u64 {
        match self {
            DhtModel::Dht11 => 1_000,
            DhtModel::Dht22 => 2_000,
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            11 => Some(DhtModel::Dht11),
            22 => Some(DhtModel::Dht22),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting { since_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dht {
    pin: u8,
    phase: Phase,
    last_start_ms: Option<u64>,
}

impl Dht {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            phase: Phase::Idle,
            last_start_ms: None,
        }
    }

    /// Drop an unfinished read; the start-signal spacing still applies
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    pub fn step<L: DhtLine + ?Sized>(&mut self, line: &mut L, now_ms: u64, model: DhtModel) -> Step {
        match self.phase {
            Phase::Idle => {
                let rested = self
                    .last_start_ms
                    .map_or(true, |last| now_ms.saturating_sub(last) >= model.min_interval_ms());
                if !rested {
                    return Step::Pending;
                }
                self.start(line, now_ms)
            }
            Phase::Starting { since_ms } => {
                if now_ms.saturating_sub(since_ms) < START_MS {
                    return Step::Pending;
                }
                self.phase = Phase::Idle;
                match line
                    .read_frame(self.pin)
                    .map_err(ReadFailure::from)
                    .and_then(|frame| decode_frame(&frame, model))
                {
                    Ok(reading) => Step::Success(reading),
                    Err(e) => Step::Failure(e),
                }
            }
        }
    }

    fn start<L: DhtLine + ?Sized>(&mut self, line: &mut L, now_ms: u64) -> Step {
        self.last_start_ms = Some(now_ms);
        match line.start_signal(self.pin) {
            Ok(()) => {
                self.phase = Phase::Starting { since_ms: now_ms };
                Step::Pending
            }
            Err(e) => Step::Failure(e.into()),
        }
    }
}

/// Decode a frame into `[temp tenths degC, humidity tenths %RH]`
pub fn decode_frame(frame: &[u8; 5], model: DhtModel) -> Result<Reading, ReadFailure> {
    if frame.iter().all(|&b| b == 0) {
        return Err(ReadFailure::BusFault);
    }
    let sum = frame[..4].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    if sum != frame[4] {
        return Err(ReadFailure::Crc);
    }

    let (humidity, temp) = match model {
        DhtModel::Dht11 => {
            let humidity = i32::from(frame[0]) * 10 + i32::from(frame[1] % 10);
            let magnitude = i32::from(frame[2]) * 10 + i32::from((frame[3] & 0x7F) % 10);
            let temp = if frame[3] & 0x80 != 0 { -magnitude } else { magnitude };
            (humidity, temp)
        }
        DhtModel::Dht22 => {
            let humidity = i32::from(u16::from_be_bytes([frame[0], frame[1]]));
            let magnitude = i32::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]]));
            let temp = if frame[2] & 0x80 != 0 { -magnitude } else { magnitude };
            (humidity, temp)
        }
    };

    if !(0..=HUMIDITY_MAX).contains(&humidity) || !(TEMP_MIN..=TEMP_MAX).contains(&temp) {
        return Err(ReadFailure::OutOfRange);
    }
    Ok(Reading::new(&[temp, humidity]))
}
