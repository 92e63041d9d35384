//! Dispatch stub for IPv6. Inbound datagrams are counted out; outbound
//! ones fail their originator.

use crate::Error;
use crate::core::layer::Protocol;
use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};

pub struct Ipv6Protocol;

impl Protocol for Ipv6Protocol {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Ipv6
    }

    fn handle_rx(&self, _pb: PacketBuffer) {
        debug!("ipv6 is not supported, dropping");
    }

    fn handle_tx(&self, mut pb: PacketBuffer) {
        pb.resolve(Err(Error::ProtocolNotSupported));
    }
}
