//! The IPv4 engine: header validation on the way in, header emission and
//! checksum on the way out, and the lateral handoff to ICMP.

use std::sync::Arc;

use crate::Error;
use crate::core::layer::{
    Protocol,
    ProtocolCore,
};
use crate::core::pb::{
    L3Header,
    PacketBuffer,
    ProtocolType,
};
use crate::core::repr::{
    Ipv4Protocol as IpProtocol,
    Ipv4Repr,
};
use crate::core::service::icmpv4::Icmpv4;
use crate::core::socket::SocketAddr;

pub struct Ipv4Protocol {
    core: ProtocolCore,
    icmp: Arc<Icmpv4>,
}

impl Ipv4Protocol {
    pub fn new(core: ProtocolCore, icmp: Arc<Icmpv4>) -> Ipv4Protocol {
        Ipv4Protocol { core, icmp }
    }
}

impl Protocol for Ipv4Protocol {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Ipv4
    }

    fn handle_rx(&self, mut pb: PacketBuffer) {
        let header = match Ipv4Repr::deserialize(&pb.data) {
            Ok(header) => header,
            Err(Error::Malformed) => {
                self.icmp.send_param_problem(&pb, 0);
                return;
            }
            Err(Error::TtlExpired) => {
                self.icmp.send_time_exceeded(&pb, 0);
                return;
            }
            Err(err) => {
                debug!("dropping ipv4 packet: {}", err);
                return;
            }
        };

        let rx_iface = match pb.rx_iface() {
            Some(iface) => Arc::clone(iface),
            None => return,
        };

        // Only global unicast destinations must match one of our
        // addresses; broadcast and multicast pass.
        if header.dst_addr.is_global_unicast() && !rx_iface.has_ip(header.dst_addr) {
            debug!(
                "ipv4 packet for {} is not for {}",
                header.dst_addr,
                rx_iface.name()
            );
            return;
        }

        pb.set_src_addr(SocketAddr::from_ipv4(header.src_addr, 0));
        pb.set_dst_addr(SocketAddr::from_ipv4(header.dst_addr, 0));
        pb.set_l3_header(L3Header::Ipv4(header));
        pb.set_protocol_type(header.protocol.protocol_type());
        pb.strip_bytes(Ipv4Repr::HEADER_LEN);

        if header.protocol == IpProtocol::Icmpv4 {
            self.icmp.handle_rx(pb);
            return;
        }

        self.core.rx_up(pb);
    }

    fn handle_tx(&self, mut pb: PacketBuffer) {
        let protocol = match pb.l4_header() {
            Some(l4) => match l4.protocol_type() {
                ProtocolType::Icmpv4 => IpProtocol::Icmpv4,
                ProtocolType::Tcp => IpProtocol::Tcp,
                ProtocolType::Udp => IpProtocol::Udp,
                _ => {
                    pb.resolve(Err(Error::ProtocolNotFound));
                    return;
                }
            },
            None => {
                warn!("ipv4 tx without an L4 header");
                pb.resolve(Err(Error::Dropped));
                return;
            }
        };

        let src_addr = match pb.src_addr().ipv4() {
            Ok(ip) => ip,
            Err(err) => {
                pb.resolve(Err(err));
                return;
            }
        };
        let dst_addr = match pb.dst_addr().ipv4() {
            Ok(ip) => ip,
            Err(err) => {
                pb.resolve(Err(err));
                return;
            }
        };

        let header = Ipv4Repr {
            total_length: (Ipv4Repr::HEADER_LEN + pb.data.len()) as u16,
            identification: 0,
            ttl: 64,
            protocol,
            src_addr,
            dst_addr,
        };

        let mut buffer = [0; Ipv4Repr::HEADER_LEN];
        header.serialize(&mut buffer[..]).unwrap();
        pb.set_l3_header(L3Header::Ipv4(header));
        pb.prepend_bytes(&buffer[..]);

        // The link layer formats next.
        pb.set_protocol_type(ProtocolType::Ethernet);
        self.core.tx_down(pb);
    }
}
