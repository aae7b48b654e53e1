//! Datagram sink
//!
//! The engine renders telemetry lines and hands them over here. Delivery
//! is best effort: implementations must not block the caller.

/// IPv4 destination of a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Endpoint {
    pub addr: [u8; 4],
    pub port: u16,
}

impl Endpoint {
    pub const fn new(addr: [u8; 4], port: u16) -> Self {
        Self { addr, port }
    }
}

/// Datagram hand-off errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SinkError {
    /// Outgoing queue is full
    QueueFull,
    /// Network stack not configured yet
    NotReady,
    /// Payload exceeds the sink's datagram size
    TooLarge,
    /// Lower layer refused the datagram
    SendFailed,
}

impl core::fmt::Display for SinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "Queue full"),
            Self::NotReady => write!(f, "Network not ready"),
            Self::TooLarge => write!(f, "Datagram too large"),
            Self::SendFailed => write!(f, "Send failed"),
        }
    }
}

impl core::error::Error for SinkError {}

/// Fire-and-forget datagram transmission
pub trait DatagramSink {
    fn send(&mut self, to: Endpoint, payload: &[u8]) -> Result<(), SinkError>;
}

impl<T: DatagramSink + ?Sized> DatagramSink for &mut T {
    fn send(&mut self, to: Endpoint, payload: &[u8]) -> Result<(), SinkError> {
        T::send(self, to, payload)
    }
}
