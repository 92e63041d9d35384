//! The UDP engine: an 8-byte header in, a pseudo-header checksum out.

use crate::Error;
use crate::core::layer::{
    Protocol,
    ProtocolCore,
};
use crate::core::pb::{
    L4Header,
    PacketBuffer,
    ProtocolType,
};
use crate::core::repr::UdpRepr;
use crate::core::service::set_type_by_family;

pub struct UdpProtocol {
    core: ProtocolCore,
}

impl UdpProtocol {
    pub fn new(core: ProtocolCore) -> UdpProtocol {
        UdpProtocol { core }
    }
}

impl Protocol for UdpProtocol {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Udp
    }

    fn handle_rx(&self, mut pb: PacketBuffer) {
        let header = match UdpRepr::deserialize(&pb.data) {
            Ok(header) => header,
            Err(err) => {
                debug!("dropping udp packet: {}", err);
                return;
            }
        };

        let mut src_addr = pb.src_addr();
        src_addr.port = header.src_port;
        pb.set_src_addr(src_addr);

        let mut dst_addr = pb.dst_addr();
        dst_addr.port = header.dst_port;
        pb.set_dst_addr(dst_addr);

        pb.set_l4_header(L4Header::Udp(header));
        pb.strip_bytes(UdpRepr::HEADER_LEN);

        self.core.rx_up(pb);
    }

    fn handle_tx(&self, mut pb: PacketBuffer) {
        // The socket layer already assigned both ports and the route's
        // source address.
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

        if pb.dst_addr().port == 0 {
            pb.resolve(Err(Error::InvalidSocketAddr));
            return;
        }

        let header = UdpRepr {
            src_port: pb.src_addr().port,
            dst_port: pb.dst_addr().port,
            length: (UdpRepr::HEADER_LEN + pb.data.len()) as u16,
        };

        let buffer = header.emit(src_addr, dst_addr, &pb.data);
        pb.set_l4_header(L4Header::Udp(header));
        pb.prepend_bytes(&buffer);

        set_type_by_family(&mut pb);
        self.core.tx_down(pb);
    }
}
