//! The Ethernet engine: L2 frame parse and emit, ARP handoff, and
//! destination MAC resolution on the way out.

use std::sync::Arc;

use crate::Error;
use crate::core::layer::{
    Protocol,
    ProtocolCore,
};
use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};
use crate::core::repr::EthernetRepr;
use crate::core::service::neighbor::NeighborSubsystem;

pub struct EthernetProtocol {
    core: ProtocolCore,
    neighbor: Arc<NeighborSubsystem>,
}

impl EthernetProtocol {
    pub fn new(core: ProtocolCore, neighbor: Arc<NeighborSubsystem>) -> EthernetProtocol {
        EthernetProtocol { core, neighbor }
    }
}

impl Protocol for EthernetProtocol {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Ethernet
    }

    fn handle_rx(&self, mut pb: PacketBuffer) {
        let header = match EthernetRepr::deserialize(&pb.data) {
            Ok(header) => header,
            Err(err) => {
                debug!("dropping ethernet frame: {}", err);
                return;
            }
        };

        let rx_iface = match pb.rx_iface() {
            Some(iface) => Arc::clone(iface),
            None => {
                debug!("ethernet frame without an rx interface");
                return;
            }
        };

        // Unicast frames must be addressed to us; multicast and broadcast
        // pass through.
        if header.dst_addr.is_unicast() && header.dst_addr != rx_iface.hw_addr() {
            debug!(
                "frame for {} is not for {} ({})",
                header.dst_addr,
                rx_iface.name(),
                rx_iface.hw_addr()
            );
            return;
        }

        pb.set_l2_header(header);
        pb.set_protocol_type(header.payload_protocol());
        pb.strip_bytes(EthernetRepr::HEADER_LEN);

        // ARP never climbs the stack; the neighbor subsystem consumes it
        // right here.
        if pb.protocol_type() == ProtocolType::Arp {
            self.neighbor.handle_rx(pb);
            return;
        }

        self.core.rx_up(pb);
    }

    fn handle_tx(&self, mut pb: PacketBuffer) {
        let tx_iface = match pb.tx_iface() {
            Some(iface) => Arc::clone(iface),
            None => {
                warn!("ethernet tx without an interface");
                pb.resolve(Err(Error::Dropped));
                return;
            }
        };

        let dst_ip = match pb.dst_addr().ipv4() {
            Ok(ip) => ip,
            Err(err) => {
                pb.resolve(Err(err));
                return;
            }
        };

        let dst_addr = match self.neighbor.resolve(dst_ip) {
            Some(mac) => mac,
            None => {
                // No translation yet: the neighbor subsystem parks the
                // packet and re-emits it when a reply arrives.
                debug!("no translation for {}, sending arp request", dst_ip);
                self.neighbor.send_request(pb);
                return;
            }
        };

        let payload_type = match pb.l3_header() {
            Some(l3) => match EthernetRepr::payload_type_of(l3.protocol_type()) {
                Ok(payload_type) => payload_type,
                Err(err) => {
                    pb.resolve(Err(err));
                    return;
                }
            },
            None => {
                warn!("ethernet tx without an L3 header");
                pb.resolve(Err(Error::Dropped));
                return;
            }
        };

        let header = EthernetRepr {
            dst_addr,
            src_addr: tx_iface.hw_addr(),
            payload_type,
        };

        let mut frame = [0; EthernetRepr::HEADER_LEN];
        header.serialize(&mut frame[..]).unwrap();
        pb.prepend_bytes(&frame[..]);
        pb.set_l2_header(header);

        let _ = tx_iface.tx_chan().send(pb);
    }
}
