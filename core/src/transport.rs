//! Fire-and-forget delivery of telemetry lines

use hal_abstractions::{DatagramSink, Endpoint};

use crate::config::Statistics;
use crate::packet::{render, Event};

/// Renders events and hands them to the network
///
/// A failed send is logged and counted; there is no retry and no buffering.
pub struct Transport<T: DatagramSink> {
    sink: T,
}

impl<T: DatagramSink> Transport<T> {
    pub fn new(sink: T) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &T {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut T {
        &mut self.sink
    }

    /// Returns whether the datagram was accepted by the sink
    pub fn emit(&mut self, to: Endpoint, board_id: u8, event: &Event, stats: &mut Statistics) -> bool {
        let line = match render(board_id, event) {
            Ok(line) => line,
            Err(_) => {
                warn!("Telemetry line too long, dropped");
                stats.datagrams_dropped = stats.datagrams_dropped.saturating_add(1);
                return false;
            }
        };
        debug!("TX {}", line.as_str());
        match self.sink.send(to, line.as_bytes()) {
            Ok(()) => {
                stats.datagrams_sent = stats.datagrams_sent.saturating_add(1);
                true
            }
            Err(e) => {
                warn!("Datagram dropped: {}", e);
                stats.datagrams_dropped = stats.datagrams_dropped.saturating_add(1);
                false
            }
        }
    }
}
