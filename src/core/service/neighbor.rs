//! The neighbor resolution subsystem: a thin multiplexer keyed by address
//! family. IPv4 resolution goes to ARP; IPv6 neighbor discovery is a stub.

use std::sync::Arc;
use std::thread;

use crate::Error;
use crate::core::pb::PacketBuffer;
use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
};
use crate::core::service::arp::ArpProtocol;

pub struct NeighborSubsystem {
    arp: Arc<ArpProtocol>,
}

impl NeighborSubsystem {
    pub fn new(arp: Arc<ArpProtocol>) -> Arc<NeighborSubsystem> {
        Arc::new(NeighborSubsystem { arp })
    }

    /// Looks up the hardware address for a next hop.
    pub fn resolve(&self, ip: Ipv4Address) -> Option<EthernetAddress> {
        self.arp.resolve(ip)
    }

    /// Parks the packet buffer and asks the wire for the translation it
    /// needs; the buffer is re-emitted when a reply arrives.
    ///
    /// The request itself crosses the same transmit path the caller runs
    /// on, so it goes out on its own task.
    pub fn send_request(&self, mut pb: PacketBuffer) {
        match pb.dst_addr().ipv4() {
            Ok(_) => {
                let arp = Arc::clone(&self.arp);
                thread::Builder::new()
                    .name("arp-request".to_string())
                    .spawn(move || arp.request(pb))
                    .expect("spawning arp request");
            }
            Err(_) => {
                debug!("neighbor resolution is ipv4 only");
                pb.resolve(Err(Error::ProtocolNotSupported));
            }
        }
    }

    /// Consumes an inbound neighbor packet handed over by the link layer.
    pub fn handle_rx(&self, pb: PacketBuffer) {
        self.arp.handle_rx(pb);
    }
}
