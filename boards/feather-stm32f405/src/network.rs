//! Telemetry hand-off between the poll task and the network task
//!
//! The engine must never wait on the network, so [`ChannelSink`] only
//! `try_send`s into a bounded channel. The network task owns the
//! embassy-net stack and drains the channel into one UDP socket.

use core::sync::atomic::{AtomicBool, Ordering};

use defmt::{info, warn};
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Ipv4Address, Ipv4Cidr, Stack, StaticConfigV4};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use gateway_core::packet::LINE_CAPACITY;
use gateway_core::NetworkSettings;
use hal_abstractions::{DatagramSink, Endpoint, SinkError};
use heapless::Vec;

const QUEUE_DEPTH: usize = 8;

/// One rendered telemetry line and its destination
pub struct Datagram {
    pub to: Endpoint,
    pub payload: Vec<u8, LINE_CAPACITY>,
}

/// Using CriticalSectionRawMutex makes it safe across all RTIC priorities
static DATAGRAMS: Channel<CriticalSectionRawMutex, Datagram, QUEUE_DEPTH> = Channel::new();

/// Set once the static address is applied
static LINK_UP: AtomicBool = AtomicBool::new(false);

/// Non-blocking [`DatagramSink`] feeding the network task
pub struct ChannelSink;

impl ChannelSink {
    pub const fn new() -> Self {
        Self
    }
}

impl DatagramSink for ChannelSink {
    fn send(&mut self, to: Endpoint, payload: &[u8]) -> Result<(), SinkError> {
        if !LINK_UP.load(Ordering::Acquire) {
            return Err(SinkError::NotReady);
        }
        let payload = Vec::from_slice(payload).map_err(|_| SinkError::TooLarge)?;
        DATAGRAMS
            .try_send(Datagram { to, payload })
            .map_err(|_| SinkError::QueueFull)
    }
}

pub fn static_config(settings: &NetworkSettings) -> embassy_net::Config {
    let [a, b, c, d] = settings.ip;
    let [ga, gb, gc, gd] = settings.gateway;
    embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(Ipv4Address::new(a, b, c, d), settings.prefix_len()),
        gateway: Some(Ipv4Address::new(ga, gb, gc, gd)),
        dns_servers: Default::default(),
    })
}

/// Wait for the link, then send every queued datagram
pub async fn forward_datagrams(stack: Stack<'static>) -> ! {
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        let octets = config.address.address().octets();
        info!(
            "Network is UP, IP: {}.{}.{}.{}",
            octets[0], octets[1], octets[2], octets[3]
        );
    }

    let mut rx_meta = [PacketMetadata::EMPTY; 1];
    let mut rx_buffer = [0u8; 64];
    let mut tx_meta = [PacketMetadata::EMPTY; QUEUE_DEPTH];
    let mut tx_buffer = [0u8; QUEUE_DEPTH * LINE_CAPACITY];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buffer, &mut tx_meta, &mut tx_buffer);
    if let Err(e) = socket.bind(0) {
        warn!("UDP bind failed: {:?}", e);
    }
    LINK_UP.store(true, Ordering::Release);

    loop {
        let datagram = DATAGRAMS.receive().await;
        let [a, b, c, d] = datagram.to.addr;
        let endpoint = IpEndpoint::new(IpAddress::v4(a, b, c, d), datagram.to.port);
        if let Err(e) = socket.send_to(&datagram.payload, endpoint).await {
            warn!("UDP send to {:?} failed: {:?}", endpoint, e);
        }
    }
}
