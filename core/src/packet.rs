//! Telemetry line rendering
//!
//! ```text
//! gw<id> <tag><index> [<rom>] <field> <value> [<field> <value> ...]
//! gw<id> <tag><index> [<rom>] detected | unknown | error
//! ```
//!
//! `<index>` is the 1-based position of the pin in the bus' pin list and
//! `<rom>` is present for 1-Wire devices only.

use core::fmt::Write;

use heapless::String;

use crate::sensor::{BusKind, Field, Reading, Rom};

pub const LINE_CAPACITY: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Payload {
    Reading {
        fields: &'static [Field],
        values: Reading,
    },
    Detected,
    Unknown,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Event {
    pub bus: BusKind,
    pub index: usize,
    pub rom: Option<Rom>,
    pub payload: Payload,
}

/// Line did not fit into [`LINE_CAPACITY`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Overflow;

impl From<core::fmt::Error> for Overflow {
    fn from(_: core::fmt::Error) -> Self {
        Overflow
    }
}

pub fn render(board_id: u8, event: &Event) -> Result<String<LINE_CAPACITY>, Overflow> {
    let mut line = String::new();
    write!(line, "gw{} {}{}", board_id, event.bus.tag(), event.index)?;
    if let Some(rom) = &event.rom {
        write!(line, " {}", rom)?;
    }
    match &event.payload {
        Payload::Reading { fields, values } => {
            for (field, &value) in fields.iter().zip(values.values()) {
                write!(line, " {} ", field.name)?;
                write_fixed(&mut line, value, field.decimals)?;
            }
        }
        Payload::Detected => line.push_str(" detected").map_err(|_| Overflow)?,
        Payload::Unknown => line.push_str(" unknown").map_err(|_| Overflow)?,
        Payload::Error => line.push_str(" error").map_err(|_| Overflow)?,
    }
    Ok(line)
}

/// Write a fixed-point value with `decimals` fractional digits
pub fn write_fixed<W: Write>(w: &mut W, value: i32, decimals: u8) -> core::fmt::Result {
    let scale = 10u32.pow(u32::from(decimals));
    let magnitude = value.unsigned_abs();
    let sign = if value < 0 { "-" } else { "" };
    if decimals == 0 {
        return write!(w, "{}{}", sign, magnitude);
    }
    write!(
        w,
        "{}{}.{:0width$}",
        sign,
        magnitude / scale,
        magnitude % scale,
        width = usize::from(decimals)
    )
}
