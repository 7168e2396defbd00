use bytes::Bytes;
use std::{fmt, net::SocketAddrV4};

use crate::{flow::FiveTuple, time::SimTime};

/// IP protocol number.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Protocol(pub u8);

impl Protocol {
    pub const TCP: Protocol = Protocol(6);
    pub const UDP: Protocol = Protocol(17);

    /// IPv4 header plus the transport header for this protocol.
    pub fn header_bytes(&self) -> u32 {
        match *self {
            Protocol::UDP => 20 + 8,
            Protocol::TCP => 20 + 20,
            _ => 20,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Protocol::UDP => f.write_str("udp"),
            Protocol::TCP => f.write_str("tcp"),
            Protocol(n) => write!(f, "proto-{n}"),
        }
    }
}

/// network packet scheduled for delivery
///
/// Never mutated after creation; it moves from the sender into the arrival
/// event and from there to the receiver.
#[derive(Clone)]
pub struct Packet {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub protocol: Protocol,
    pub payload: Bytes,
    pub sent_at: SimTime,
    pub seq: u64,
}

impl Packet {
    pub fn udp(src: SocketAddrV4, dst: SocketAddrV4, payload: Bytes, sent_at: SimTime, seq: u64) -> Self {
        Self {
            src,
            dst,
            protocol: Protocol::UDP,
            payload,
            sent_at,
            seq,
        }
    }

    /// on-wire size: payload plus IP and transport headers.
    pub fn size_bytes(&self) -> u32 {
        let payload = u32::try_from(self.payload.len()).unwrap_or(u32::MAX);
        payload.saturating_add(self.protocol.header_bytes())
    }

    pub fn five_tuple(&self) -> FiveTuple {
        FiveTuple {
            src_addr: *self.src.ip(),
            dst_addr: *self.dst.ip(),
            src_port: self.src.port(),
            dst_port: self.dst.port(),
            protocol: self.protocol,
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{} {} [#{} {}B]",
            self.src,
            self.dst,
            self.protocol,
            self.seq,
            self.size_bytes()
        )
    }
}
