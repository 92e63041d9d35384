//! The ICMPv4 engine. Echo requests earn replies; time-exceeded and
//! parameter-problem messages are emitted from IPv4's error paths with the
//! offending header prefix as body.

use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use crate::core::pb::{
    L4Header,
    PacketBuffer,
    ProtocolType,
};
use crate::core::repr::{
    Icmpv4Message,
    Icmpv4Repr,
    Ipv4Address,
    Ipv4Repr,
};
use crate::core::socket::SocketAddr;

/// Bytes of the offending datagram echoed back in ICMP error messages:
/// the IPv4 header plus the first 8 payload bytes.
const ERROR_BODY_LEN: usize = Ipv4Repr::HEADER_LEN + 8;

pub struct Icmpv4 {
    /// The network layer's transmit mailbox; replies re-enter the
    /// pipeline as ordinary IPv4 transmissions.
    net_tx: SyncSender<PacketBuffer>,
}

impl Icmpv4 {
    pub fn new(net_tx: SyncSender<PacketBuffer>) -> Arc<Icmpv4> {
        Arc::new(Icmpv4 { net_tx })
    }

    /// Consumes an ICMP packet handed laterally from IPv4. The payload at
    /// this point starts at the ICMP header.
    pub fn handle_rx(&self, pb: PacketBuffer) {
        let header = match Icmpv4Repr::deserialize(&pb.data) {
            Ok(header) => header,
            Err(err) => {
                debug!("dropping icmp packet: {}", err);
                return;
            }
        };

        match header.message {
            Icmpv4Message::EchoRequest { id, seq } => self.echo_reply(&pb, id, seq),
            Icmpv4Message::EchoReply { .. } => debug!("icmp echo reply"),
            Icmpv4Message::DestinationUnreachable { code } => {
                debug!("icmp destination unreachable, code {}", code)
            }
            Icmpv4Message::Redirect { code } => debug!("icmp redirect, code {}", code),
            Icmpv4Message::TimeExceeded { code } => debug!("icmp time exceeded, code {}", code),
            Icmpv4Message::ParameterProblem { code } => {
                debug!("icmp parameter problem, code {}", code)
            }
            Icmpv4Message::Unknown { icmp_type, code } => {
                debug!("icmp type {} code {} ignored", icmp_type, code)
            }
        }
    }

    /// Builds an echo reply copying the request body, with the IPs
    /// swapped and the reply leaving through the interface the request
    /// arrived on.
    fn echo_reply(&self, request: &PacketBuffer, id: u16, seq: u16) {
        let reply = Icmpv4Repr {
            message: Icmpv4Message::EchoReply { id, seq },
        };
        let body = &request.data[Icmpv4Repr::HEADER_LEN ..];

        let (mut pb, completion) = PacketBuffer::with_completion(reply.emit(body));
        pb.set_protocol_type(ProtocolType::Ipv4);
        pb.set_l4_header(L4Header::Icmpv4(reply));
        pb.set_src_addr(request.dst_addr());
        pb.set_dst_addr(request.src_addr());
        if let Some(rx_iface) = request.rx_iface() {
            pb.set_tx_iface(Arc::clone(rx_iface));
        }

        let _ = self.net_tx.send(pb);

        if let Err(err) = completion.wait() {
            warn!("sending echo reply: {}", err);
        }
    }

    /// Emits a parameter problem (type 12) for a packet IPv4 rejected.
    pub fn send_param_problem(&self, pb: &PacketBuffer, code: u8) {
        self.send_error(
            pb,
            Icmpv4Repr {
                message: Icmpv4Message::ParameterProblem { code },
            },
        );
    }

    /// Emits a time exceeded (type 11) for a packet whose TTL ran out.
    pub fn send_time_exceeded(&self, pb: &PacketBuffer, code: u8) {
        self.send_error(
            pb,
            Icmpv4Repr {
                message: Icmpv4Message::TimeExceeded { code },
            },
        );
    }

    fn send_error(&self, offending: &PacketBuffer, repr: Icmpv4Repr) {
        // The offending buffer still holds the raw IPv4 packet; the source
        // address comes straight off its header bytes. A packet too short
        // to name a sender gets no message.
        if offending.data.len() < Ipv4Repr::HEADER_LEN {
            debug!("offending packet too short for an icmp error");
            return;
        }

        let src_addr = match Ipv4Address::try_new(&offending.data[12 .. 16]) {
            Ok(addr) => addr,
            Err(_) => return,
        };
        let dst_addr = match Ipv4Address::try_new(&offending.data[16 .. 20]) {
            Ok(addr) => addr,
            Err(_) => return,
        };

        let body_len = ERROR_BODY_LEN.min(offending.data.len());
        let body = &offending.data[.. body_len];

        let (mut pb, completion) = PacketBuffer::with_completion(repr.emit(body));
        pb.set_protocol_type(ProtocolType::Ipv4);
        pb.set_l4_header(L4Header::Icmpv4(repr));
        pb.set_src_addr(SocketAddr::from_ipv4(dst_addr, 0));
        pb.set_dst_addr(SocketAddr::from_ipv4(src_addr, 0));
        if let Some(rx_iface) = offending.rx_iface() {
            pb.set_tx_iface(Arc::clone(rx_iface));
        }

        let _ = self.net_tx.send(pb);

        if let Err(err) = completion.wait() {
            warn!("sending icmp error: {}", err);
        }
    }
}
