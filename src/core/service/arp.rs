//! The ARP engine: IP to MAC resolution, the expiring cache, the
//! pending-send table, and the request/reply protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::core::arp_cache::{
    ArpCache,
    ARP_ENTRY_TIMEOUT_SECS,
};
use crate::core::iface::Interface;
use crate::core::layer::ProtocolCore;
use crate::core::pb::{
    L3Header,
    PacketBuffer,
};
use crate::core::repr::{
    ArpOp,
    ArpRepr,
    EthernetAddress,
    Ipv4Address,
};
use crate::core::socket::SocketAddr;

pub struct ArpProtocol {
    /// `tx_down` points at the link layer's transmit mailbox.
    core: ProtocolCore,
    cache: Mutex<ArpCache>,
    pending: Mutex<HashMap<Ipv4Address, Vec<PacketBuffer>>>,
}

impl ArpProtocol {
    pub fn new(core: ProtocolCore) -> Arc<ArpProtocol> {
        Arc::new(ArpProtocol {
            core,
            cache: Mutex::new(ArpCache::new()),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Spawns the periodic sweep that purges expired cache entries.
    pub fn start_cleanup(self: &Arc<Self>) {
        let arp = Arc::clone(self);
        thread::Builder::new()
            .name("arp-sweep".to_string())
            .spawn(move || loop {
                thread::sleep(Duration::from_secs(ARP_ENTRY_TIMEOUT_SECS));
                arp.cache.lock().unwrap().cleanup();
            })
            .expect("spawning arp sweep");
    }

    /// Looks up the cached hardware address for an IP.
    pub fn resolve(&self, ip: Ipv4Address) -> Option<EthernetAddress> {
        self.cache.lock().unwrap().eth_addr_for_ip(ip)
    }

    /// Consumes an inbound ARP packet. The cache learns the sender pair
    /// from every packet regardless of opcode, parked packets for that
    /// sender drain back into the transmit path, and requests for one of
    /// our addresses earn a reply.
    pub fn handle_rx(&self, pb: PacketBuffer) {
        let header = match ArpRepr::deserialize(&pb.data) {
            Ok(header) => header,
            Err(err) => {
                debug!("dropping arp packet: {}", err);
                return;
            }
        };

        self.cache
            .lock()
            .unwrap()
            .set_eth_addr_for_ip(header.source_proto_addr, header.source_hw_addr);

        let parked = self
            .pending
            .lock()
            .unwrap()
            .remove(&header.source_proto_addr);
        if let Some(parked) = parked {
            debug!(
                "draining {} parked packets for {}",
                parked.len(),
                header.source_proto_addr
            );
            for pb in parked {
                self.core.tx_down(pb);
            }
        }

        if header.op != ArpOp::Request {
            return;
        }

        let rx_iface = match pb.rx_iface() {
            Some(iface) => Arc::clone(iface),
            None => return,
        };

        if !rx_iface.has_ip(header.target_proto_addr) {
            debug!("arp request for {} is not ours", header.target_proto_addr);
            return;
        }

        self.reply(&header, rx_iface);
    }

    /// Emits a reply claiming the requested IP with our hardware address.
    fn reply(&self, request: &ArpRepr, iface: Arc<Interface>) {
        let reply = ArpRepr {
            op: ArpOp::Reply,
            source_hw_addr: iface.hw_addr(),
            source_proto_addr: request.target_proto_addr,
            target_hw_addr: request.source_hw_addr,
            target_proto_addr: request.source_proto_addr,
        };

        let (mut pb, completion) = PacketBuffer::with_completion(reply.to_bytes());
        pb.set_protocol_type(iface.link_type());
        pb.set_tx_iface(iface);
        pb.set_l3_header(L3Header::Arp(reply));
        pb.set_src_addr(SocketAddr::from_ipv4(reply.source_proto_addr, 0));
        pb.set_dst_addr(SocketAddr::from_ipv4(reply.target_proto_addr, 0));

        self.core.tx_down(pb);

        if let Err(err) = completion.wait() {
            warn!("sending arp reply: {}", err);
        }
    }

    /// Parks a packet awaiting resolution and broadcasts a request for its
    /// destination. The broadcast placeholder installed in the cache lets
    /// the Ethernet stage frame the request itself without re-resolving.
    ///
    /// Blocks until the request hits the wire, so callers run it off the
    /// pipeline tasks.
    pub fn request(&self, mut pb: PacketBuffer) {
        let target_ip = match pb.dst_addr().ipv4() {
            Ok(ip) => ip,
            Err(err) => {
                pb.resolve(Err(err));
                return;
            }
        };
        let src_ip = match pb.src_addr().ipv4() {
            Ok(ip) => ip,
            Err(err) => {
                pb.resolve(Err(err));
                return;
            }
        };
        let iface = match pb.tx_iface() {
            Some(iface) => Arc::clone(iface),
            None => {
                pb.resolve(Err(crate::Error::Dropped));
                return;
            }
        };

        self.cache
            .lock()
            .unwrap()
            .set_eth_addr_for_ip(target_ip, EthernetAddress::BROADCAST);

        self.pending
            .lock()
            .unwrap()
            .entry(target_ip)
            .or_insert_with(Vec::new)
            .push(pb);

        let request = ArpRepr {
            op: ArpOp::Request,
            source_hw_addr: iface.hw_addr(),
            source_proto_addr: src_ip,
            target_hw_addr: EthernetAddress::BROADCAST,
            target_proto_addr: target_ip,
        };

        let (mut request_pb, completion) = PacketBuffer::with_completion(request.to_bytes());
        request_pb.set_protocol_type(iface.link_type());
        request_pb.set_tx_iface(iface);
        request_pb.set_l3_header(L3Header::Arp(request));
        request_pb.set_src_addr(SocketAddr::from_ipv4(src_ip, 0));
        request_pb.set_dst_addr(SocketAddr::from_ipv4(target_ip, 0));

        self.core.tx_down(request_pb);

        match completion.wait() {
            Ok(_) => debug!("arp request for {} hit the wire", target_ip),
            Err(err) => warn!("sending arp request: {}", err),
        }
    }

    #[cfg(test)]
    fn pending_len(&self, ip: Ipv4Address) -> usize {
        self.pending
            .lock()
            .unwrap()
            .get(&ip)
            .map(|parked| parked.len())
            .unwrap_or(0)
    }
}
