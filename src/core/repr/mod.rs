//! Wire formats for the protocols the stack speaks.
//!
//! Each module pairs an address or header `Repr` with `deserialize` and
//! `serialize` routines over raw byte buffers. Reprs travel on the packet
//! buffer so later pipeline stages can checksum and introspect without
//! re-parsing.

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;
pub mod tcp;
pub mod udp;

pub use self::arp::{
    Op as ArpOp,
    Repr as ArpRepr,
};
pub use self::ethernet::{
    eth_types,
    Address as EthernetAddress,
    Repr as EthernetRepr,
};
pub use self::icmpv4::{
    Message as Icmpv4Message,
    Repr as Icmpv4Repr,
};
pub use self::ipv4::{
    Address as Ipv4Address,
    Cidr as Ipv4Cidr,
    Protocol as Ipv4Protocol,
    Repr as Ipv4Repr,
};
pub use self::tcp::Repr as TcpRepr;
pub use self::udp::Repr as UdpRepr;
