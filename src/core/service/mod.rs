//! Per-protocol packet processing engines.
//!
//! Each engine implements `layer::Protocol` and crosses layer boundaries
//! through its composed `ProtocolCore`. The receive path strips a header,
//! retags the buffer, and lifts it; the transmit path does the reverse.

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;
pub mod ipv6;
pub mod neighbor;
pub mod tcp;
pub mod udp;

use std::net::IpAddr;

use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};

/// Retags an outbound packet buffer for the network protocol matching its
/// destination address family. IPv6 buffers land on the stub protocol,
/// which fails them with `ProtocolNotSupported`.
pub fn set_type_by_family(pb: &mut PacketBuffer) {
    match pb.dst_addr().ip {
        IpAddr::V4(_) => pb.set_protocol_type(ProtocolType::Ipv4),
        IpAddr::V6(_) => pb.set_protocol_type(ProtocolType::Ipv6),
    }
}
