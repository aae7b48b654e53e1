//! Simulated peripherals for host tests

use std::collections::HashMap;
use std::string::String;
use std::vec::Vec;

use embedded_hal::i2c::{self, I2c};
use embedded_hal::spi::{self, SpiDevice};
use hal_abstractions::{
    BusError, ConfigStorage, DatagramSink, DhtLine, Endpoint, OneWireBus, SensorBuses, SinkError,
    StorageError, Triplet,
};
use rand_core::RngCore;

use crate::crc::crc8;
use crate::drivers::bh1750::ADDRESS as BH1750_ADDRESS;
use crate::sensor::Rom;

/// Append the CRC-8 to 8 payload bytes
pub fn scratchpad(bytes: [u8; 8]) -> [u8; 9] {
    let mut sp = [0u8; 9];
    sp[..8].copy_from_slice(&bytes);
    sp[8] = crc8(&bytes);
    sp
}

/// DS18B20 scratchpad holding `raw` sixteenths of a degree
pub fn ds18b20_scratchpad(raw: i16) -> [u8; 9] {
    let [lo, hi] = raw.to_le_bytes();
    scratchpad([lo, hi, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10])
}

/// DS2438 page 0 with raw temperature, voltage and current registers
pub fn ds2438_page(temp: i16, volt: u16, current: i16) -> [u8; 9] {
    let [t0, t1] = temp.to_le_bytes();
    let [v0, v1] = volt.to_le_bytes();
    let [c0, c1] = current.to_le_bytes();
    scratchpad([0x0F, t0, t1, v0, v1, c0, c1, 0x00])
}

/// DHT22 frame from tenths of %RH and tenths of degC
pub fn dht22_frame(humidity: u16, temp: i16) -> [u8; 5] {
    let [h0, h1] = humidity.to_be_bytes();
    let [t0, t1] = temp.unsigned_abs().to_be_bytes();
    let t0 = if temp < 0 { t0 | 0x80 } else { t0 };
    let sum = h0.wrapping_add(h1).wrapping_add(t0).wrapping_add(t1);
    [h0, h1, t0, t1, sum]
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub rom: Rom,
    pub scratchpad: [u8; 9],
    pub present: bool,
    /// Number of upcoming scratchpad reads returned with a flipped bit
    pub corrupt_reads: u8,
    pub conversions: u32,
}

impl MockDevice {
    pub fn new(rom: Rom) -> Self {
        let scratchpad = if rom.family() == 0x26 {
            ds2438_page(813 << 3, 123, 25)
        } else {
            ds18b20_scratchpad(0x0191)
        };
        Self {
            rom,
            scratchpad,
            present: true,
            corrupt_reads: 0,
            conversions: 0,
        }
    }

    pub fn with_scratchpad(mut self, scratchpad: [u8; 9]) -> Self {
        self.scratchpad = scratchpad;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OwState {
    Idle,
    Search { bit: u8, participants: Vec<usize> },
    Matching { rom: Vec<u8> },
    Function,
    AwaitPage { then_read: bool },
    WriteScratchpad { pos: usize },
    ReadData { pos: usize, corrupt: bool },
}

/// Byte-level 1-Wire bus with ROM search support on a single pin
pub struct MockOneWire {
    pin: u8,
    devices: Vec<MockDevice>,
    state: OwState,
    selected: Option<usize>,
}

impl MockOneWire {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            devices: Vec::new(),
            state: OwState::Idle,
            selected: None,
        }
    }

    pub fn attach(&mut self, device: MockDevice) {
        self.devices.push(device);
    }

    pub fn device(&self, rom: &Rom) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.rom == *rom)
    }

    pub fn device_mut(&mut self, rom: &Rom) -> Option<&mut MockDevice> {
        self.devices.iter_mut().find(|d| d.rom == *rom)
    }

    fn check_pin(&self, pin: u8) -> Result<(), BusError> {
        if pin == self.pin {
            Ok(())
        } else {
            Err(BusError::UnknownPin)
        }
    }

    fn rom_bit(&self, device: usize, bit: u8) -> bool {
        let rom = &self.devices[device].rom.0;
        rom[usize::from(bit / 8)] & (1 << (bit % 8)) != 0
    }
}

impl OneWireBus for MockOneWire {
    fn reset(&mut self, pin: u8) -> Result<bool, BusError> {
        self.check_pin(pin)?;
        self.state = OwState::Idle;
        self.selected = None;
        Ok(self.devices.iter().any(|d| d.present))
    }

    fn write_bit(&mut self, pin: u8, _bit: bool) -> Result<(), BusError> {
        self.check_pin(pin)
    }

    fn read_bit(&mut self, pin: u8) -> Result<bool, BusError> {
        self.check_pin(pin)?;
        Ok(true)
    }

    fn write_byte(&mut self, pin: u8, byte: u8) -> Result<(), BusError> {
        self.check_pin(pin)?;
        let state = core::mem::replace(&mut self.state, OwState::Idle);
        self.state = match state {
            OwState::Idle => match byte {
                0xF0 => OwState::Search {
                    bit: 0,
                    participants: (0..self.devices.len())
                        .filter(|&i| self.devices[i].present)
                        .collect(),
                },
                0x55 => OwState::Matching { rom: Vec::new() },
                0xCC => {
                    self.selected = self.devices.iter().position(|d| d.present);
                    OwState::Function
                }
                _ => OwState::Idle,
            },
            OwState::Matching { mut rom } => {
                rom.push(byte);
                if rom.len() == 8 {
                    self.selected = self
                        .devices
                        .iter()
                        .position(|d| d.present && d.rom.0[..] == rom[..]);
                    OwState::Function
                } else {
                    OwState::Matching { rom }
                }
            }
            OwState::Function => {
                let Some(i) = self.selected else {
                    return Ok(());
                };
                let is_multi = self.devices[i].rom.family() == 0x26;
                match byte {
                    0x44 | 0xB4 => {
                        self.devices[i].conversions += 1;
                        OwState::Function
                    }
                    0xB8 => OwState::AwaitPage { then_read: false },
                    0xBE if is_multi => OwState::AwaitPage { then_read: true },
                    0xBE => self.start_read(i),
                    0x4E => OwState::WriteScratchpad { pos: 2 },
                    _ => OwState::Function,
                }
            }
            OwState::AwaitPage { then_read } => match (then_read, self.selected) {
                (true, Some(i)) => self.start_read(i),
                _ => OwState::Function,
            },
            OwState::WriteScratchpad { pos } => {
                if let Some(i) = self.selected {
                    let dev = &mut self.devices[i];
                    dev.scratchpad[pos] = byte;
                    dev.scratchpad[8] = crc8(&dev.scratchpad[..8]);
                }
                if pos + 1 < 5 {
                    OwState::WriteScratchpad { pos: pos + 1 }
                } else {
                    OwState::Function
                }
            }
            other => other,
        };
        Ok(())
    }

    fn read_byte(&mut self, pin: u8) -> Result<u8, BusError> {
        self.check_pin(pin)?;
        match (&mut self.state, self.selected) {
            (OwState::ReadData { pos, corrupt }, Some(i)) if *pos < 9 => {
                let mut byte = self.devices[i].scratchpad[*pos];
                if *corrupt && *pos == 0 {
                    byte ^= 0x01;
                }
                *pos += 1;
                Ok(byte)
            }
            _ => Ok(0xFF),
        }
    }

    fn triplet(&mut self, pin: u8, direction: bool) -> Result<Triplet, BusError> {
        self.check_pin(pin)?;
        let OwState::Search { bit, participants } = &self.state else {
            return Ok(Triplet {
                id_bit: true,
                complement: true,
                direction: true,
            });
        };
        let (bit, participants) = (*bit, participants.clone());
        if participants.is_empty() {
            return Ok(Triplet {
                id_bit: true,
                complement: true,
                direction: true,
            });
        }
        let id_bit = participants.iter().all(|&d| self.rom_bit(d, bit));
        let complement = participants.iter().all(|&d| !self.rom_bit(d, bit));
        let direction = if id_bit != complement { id_bit } else { direction };
        let remaining = participants
            .into_iter()
            .filter(|&d| self.rom_bit(d, bit) == direction)
            .collect();
        self.state = OwState::Search {
            bit: bit + 1,
            participants: remaining,
        };
        Ok(Triplet {
            id_bit,
            complement,
            direction,
        })
    }
}

impl MockOneWire {
    fn start_read(&mut self, device: usize) -> OwState {
        let dev = &mut self.devices[device];
        let corrupt = dev.corrupt_reads > 0;
        if corrupt {
            dev.corrupt_reads -= 1;
        }
        OwState::ReadData { pos: 0, corrupt }
    }
}

/// DHT lines; a pin without a frame times out
#[derive(Default)]
pub struct MockDht {
    frames: HashMap<u8, [u8; 5]>,
    starts: HashMap<u8, u32>,
}

impl MockDht {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_frame(&mut self, pin: u8, frame: [u8; 5]) {
        self.frames.insert(pin, frame);
    }

    pub fn clear_frame(&mut self, pin: u8) {
        self.frames.remove(&pin);
    }

    pub fn starts(&self, pin: u8) -> u32 {
        self.starts.get(&pin).copied().unwrap_or(0)
    }
}

impl DhtLine for MockDht {
    fn start_signal(&mut self, pin: u8) -> Result<(), BusError> {
        *self.starts.entry(pin).or_insert(0) += 1;
        Ok(())
    }

    fn read_frame(&mut self, pin: u8) -> Result<[u8; 5], BusError> {
        self.frames.get(&pin).copied().ok_or(BusError::Timeout)
    }
}

/// Shared I2C bus with BH1750s behind ADDR select pins
#[derive(Default)]
pub struct MockI2c {
    sensors: HashMap<u8, u16>,
    commands: HashMap<u8, u8>,
    selected: Option<u8>,
}

impl MockI2c {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensor on ADDR pin `pin` returning `raw`
    pub fn attach(&mut self, pin: u8, raw: u16) {
        self.sensors.insert(pin, raw);
    }

    pub fn detach(&mut self, pin: u8) {
        self.sensors.remove(&pin);
    }

    pub fn select(&mut self, pin: Option<u8>) {
        self.selected = pin;
    }

    pub fn last_command(&self, pin: u8) -> Option<u8> {
        self.commands.get(&pin).copied()
    }
}

impl i2c::ErrorType for MockI2c {
    type Error = i2c::ErrorKind;
}

impl I2c for MockI2c {
    fn transaction(&mut self, address: u8, operations: &mut [i2c::Operation<'_>]) -> Result<(), Self::Error> {
        let pin = match self.selected {
            Some(pin) if address == BH1750_ADDRESS && self.sensors.contains_key(&pin) => pin,
            _ => {
                return Err(i2c::ErrorKind::NoAcknowledge(
                    i2c::NoAcknowledgeSource::Address,
                ))
            }
        };
        for op in operations.iter_mut() {
            match op {
                i2c::Operation::Write(bytes) => {
                    if let Some(&b) = bytes.last() {
                        self.commands.insert(pin, b);
                    }
                }
                i2c::Operation::Read(buf) => {
                    let raw = self.sensors[&pin].to_be_bytes();
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = raw.get(i).copied().unwrap_or(0);
                    }
                }
            }
        }
        Ok(())
    }
}

/// MAX31865 register model; an absent chip ignores writes and reads zeros
pub struct MockMax31865 {
    present: bool,
    config: u8,
    rtd: u16,
    fault: bool,
    one_shots: u32,
}

impl MockMax31865 {
    pub fn new() -> Self {
        Self {
            present: true,
            config: 0,
            rtd: 10555,
            fault: false,
            one_shots: 0,
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new()
        }
    }

    pub fn set_rtd(&mut self, raw: u16) {
        self.rtd = raw;
    }

    pub fn set_fault(&mut self, fault: bool) {
        self.fault = fault;
    }

    pub fn fault(&self) -> bool {
        self.fault
    }

    pub fn config(&self) -> u8 {
        self.config
    }

    pub fn one_shots(&self) -> u32 {
        self.one_shots
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        if reg == 0 {
            if value & 0x20 != 0 {
                self.one_shots += 1;
            }
            if value & 0x02 != 0 {
                self.fault = false;
            }
            self.config = value & !(0x20 | 0x02);
        }
    }

    fn read_register(&self, reg: u8) -> u8 {
        let rtd = (self.rtd << 1) | u16::from(self.fault);
        match reg {
            0 => self.config,
            1 => rtd.to_be_bytes()[0],
            2 => rtd.to_be_bytes()[1],
            _ => 0,
        }
    }
}

impl spi::ErrorType for MockMax31865 {
    type Error = spi::ErrorKind;
}

impl SpiDevice for MockMax31865 {
    fn transaction(&mut self, operations: &mut [spi::Operation<'_, u8>]) -> Result<(), Self::Error> {
        let mut addr: Option<u8> = None;
        for op in operations.iter_mut() {
            match op {
                spi::Operation::Write(bytes) => {
                    for &b in bytes.iter() {
                        match addr {
                            None => addr = Some(b),
                            Some(a) if a & 0x80 != 0 => {
                                if self.present {
                                    self.write_register(a & 0x7F, b);
                                }
                                addr = Some(a + 1);
                            }
                            Some(_) => {}
                        }
                    }
                }
                spi::Operation::Read(buf) => {
                    let start = addr.unwrap_or(0) & 0x7F;
                    for (i, b) in buf.iter_mut().enumerate() {
                        *b = if self.present {
                            self.read_register(start + i as u8)
                        } else {
                            0
                        };
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Bus bundle with a 1-Wire bus on pin 5
pub struct MockBuses {
    pub one_wire: MockOneWire,
    pub dht: MockDht,
    pub i2c: MockI2c,
    pub rtds: Vec<(u8, MockMax31865)>,
}

impl MockBuses {
    pub fn new() -> Self {
        Self {
            one_wire: MockOneWire::new(5),
            dht: MockDht::new(),
            i2c: MockI2c::new(),
            rtds: Vec::new(),
        }
    }

    pub fn add_rtd(&mut self, cs_pin: u8) -> &mut MockMax31865 {
        self.rtds.push((cs_pin, MockMax31865::new()));
        let last = self.rtds.len() - 1;
        &mut self.rtds[last].1
    }

    pub fn rtd_mut(&mut self, cs_pin: u8) -> Option<&mut MockMax31865> {
        self.rtds.iter_mut().find(|(p, _)| *p == cs_pin).map(|(_, d)| d)
    }
}

impl SensorBuses for MockBuses {
    type OneWire = MockOneWire;
    type Dht = MockDht;
    type I2c = MockI2c;
    type Spi<'a> = &'a mut MockMax31865;

    fn one_wire(&mut self) -> &mut MockOneWire {
        &mut self.one_wire
    }

    fn dht(&mut self) -> &mut MockDht {
        &mut self.dht
    }

    fn select_light(&mut self, pin: u8, light_pins: &[u8]) -> Result<&mut MockI2c, BusError> {
        if !light_pins.contains(&pin) {
            return Err(BusError::UnknownPin);
        }
        self.i2c.select(Some(pin));
        Ok(&mut self.i2c)
    }

    fn rtd(&mut self, cs_pin: u8) -> Result<&mut MockMax31865, BusError> {
        self.rtd_mut(cs_pin).ok_or(BusError::UnknownPin)
    }
}

/// Records every datagram as a UTF-8 line
#[derive(Default)]
pub struct MockSink {
    lines: Vec<String>,
    endpoints: Vec<Endpoint>,
    fail_next: u32,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `n` datagrams
    pub fn fail_next(&mut self, n: u32) {
        self.fail_next = n;
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.clone()
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        core::mem::take(&mut self.lines)
    }

    pub fn last_endpoint(&self) -> Option<Endpoint> {
        self.endpoints.last().copied()
    }
}

impl DatagramSink for MockSink {
    fn send(&mut self, to: Endpoint, payload: &[u8]) -> Result<(), SinkError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SinkError::SendFailed);
        }
        let line = core::str::from_utf8(payload).map_err(|_| SinkError::SendFailed)?;
        self.lines.push(line.into());
        self.endpoints.push(to);
        Ok(())
    }
}

/// Config blob kept in RAM
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Option<Vec<u8>>,
    saves: u32,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saves(&self) -> u32 {
        self.saves
    }

    pub fn corrupt_byte(&mut self, index: usize, value: u8) {
        if let Some(b) = self.data.as_mut().and_then(|d| d.get_mut(index)) {
            *b = value;
        }
    }
}

impl ConfigStorage for MemoryStorage {
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self.data.as_ref().ok_or(StorageError::Empty)?;
        let dst = buf.get_mut(..data.len()).ok_or(StorageError::TooLarge)?;
        dst.copy_from_slice(data);
        Ok(data.len())
    }

    fn save(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.data = Some(data.to_vec());
        self.saves += 1;
        Ok(())
    }
}

/// Counts up from a seed byte
pub struct FixedRng {
    next: u8,
}

impl FixedRng {
    pub fn new(seed: u8) -> Self {
        Self { next: seed }
    }
}

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for b in dest.iter_mut() {
            *b = self.next;
            self.next = self.next.wrapping_add(1);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
