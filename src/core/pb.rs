//! The packet buffer: the unit of data that traverses the pipeline.
//!
//! A packet buffer is exclusively owned by the task currently holding it;
//! enqueuing it on a channel transfers ownership, which is exactly Rust's
//! move semantics. Each layer prepends its header on the way down and
//! strips it on the way up, retagging the buffer for the next stage.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};

use crate::{
    Error,
    Result,
};
use crate::core::iface::Interface;
use crate::core::repr::{
    ArpRepr,
    EthernetRepr,
    Icmpv4Repr,
    Ipv4Repr,
    TcpRepr,
    UdpRepr,
};
use crate::core::socket::SocketAddr;

/// The tag by which layers dispatch packet buffers to protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolType {
    Ethernet,
    Arp,
    Ipv4,
    Ipv6,
    Icmpv4,
    Icmpv6,
    Tcp,
    Udp,
    Raw,
    Unknown,
}

/// The parsed L3 header record carried by a packet buffer. The ARP variant
/// exists because an ARP packet occupies the L3 slot while being framed by
/// the Ethernet stage.
#[derive(Clone, Copy, Debug)]
pub enum L3Header {
    Ipv4(Ipv4Repr),
    Arp(ArpRepr),
}

impl L3Header {
    pub fn protocol_type(&self) -> ProtocolType {
        match *self {
            L3Header::Ipv4(_) => ProtocolType::Ipv4,
            L3Header::Arp(_) => ProtocolType::Arp,
        }
    }
}

/// The parsed L4 header record carried by a packet buffer.
#[derive(Clone, Copy, Debug)]
pub enum L4Header {
    Icmpv4(Icmpv4Repr),
    Udp(UdpRepr),
    Tcp(TcpRepr),
}

impl L4Header {
    pub fn protocol_type(&self) -> ProtocolType {
        match *self {
            L4Header::Icmpv4(_) => ProtocolType::Icmpv4,
            L4Header::Udp(_) => ProtocolType::Udp,
            L4Header::Tcp(_) => ProtocolType::Tcp,
        }
    }
}

/// The terminal outcome of a packet buffer: bytes written to a device, or
/// the error that stopped it.
pub type TxResult = Result<usize>;

enum Resp {
    /// Nothing is waiting on this packet (it came off the wire).
    None,
    /// An originator is parked on the completion.
    Pending(SyncSender<TxResult>),
    /// The completion fired; firing again is a bug.
    Resolved,
}

/// The receiving half of a packet buffer's one-shot completion.
pub struct Completion {
    rx: Receiver<TxResult>,
}

impl Completion {
    /// Blocks until the packet buffer is resolved by the terminal handler.
    ///
    /// A buffer dropped without resolution reports `Error::Dropped`.
    pub fn wait(self) -> TxResult {
        self.rx.recv().unwrap_or(Err(Error::Dropped))
    }
}

/// A mutable data carrier shuttled through the pipeline.
pub struct PacketBuffer {
    /// The current payload; headers are prepended on TX and stripped on RX.
    pub data: Vec<u8>,
    protocol_type: ProtocolType,
    rx_iface: Option<Arc<Interface>>,
    tx_iface: Option<Arc<Interface>>,
    src_addr: SocketAddr,
    dst_addr: SocketAddr,
    l2_header: Option<EthernetRepr>,
    l3_header: Option<L3Header>,
    l4_header: Option<L4Header>,
    resp: Resp,
}

impl PacketBuffer {
    /// Creates a packet buffer with no originator waiting on it.
    pub fn new(data: Vec<u8>) -> PacketBuffer {
        PacketBuffer {
            data,
            protocol_type: ProtocolType::Unknown,
            rx_iface: None,
            tx_iface: None,
            src_addr: SocketAddr::unspecified(),
            dst_addr: SocketAddr::unspecified(),
            l2_header: None,
            l3_header: None,
            l4_header: None,
            resp: Resp::None,
        }
    }

    /// Creates a packet buffer paired with the completion its originator
    /// blocks on.
    pub fn with_completion(data: Vec<u8>) -> (PacketBuffer, Completion) {
        let (tx, rx) = sync_channel(1);
        let mut pb = PacketBuffer::new(data);
        pb.resp = Resp::Pending(tx);
        (pb, Completion { rx })
    }

    pub fn protocol_type(&self) -> ProtocolType {
        self.protocol_type
    }

    pub fn set_protocol_type(&mut self, protocol_type: ProtocolType) {
        self.protocol_type = protocol_type;
    }

    /// Inserts bytes at the front of the payload.
    pub fn prepend_bytes(&mut self, bytes: &[u8]) {
        let mut data = Vec::with_capacity(bytes.len() + self.data.len());
        data.extend_from_slice(bytes);
        data.append(&mut self.data);
        self.data = data;
    }

    /// Drops n bytes from the front of the payload.
    pub fn strip_bytes(&mut self, n: usize) {
        self.data.drain(.. n.min(self.data.len()));
    }

    pub fn rx_iface(&self) -> Option<&Arc<Interface>> {
        self.rx_iface.as_ref()
    }

    pub fn set_rx_iface(&mut self, iface: Arc<Interface>) {
        self.rx_iface = Some(iface);
    }

    pub fn tx_iface(&self) -> Option<&Arc<Interface>> {
        self.tx_iface.as_ref()
    }

    pub fn set_tx_iface(&mut self, iface: Arc<Interface>) {
        self.tx_iface = Some(iface);
    }

    pub fn src_addr(&self) -> SocketAddr {
        self.src_addr
    }

    pub fn set_src_addr(&mut self, addr: SocketAddr) {
        self.src_addr = addr;
    }

    pub fn dst_addr(&self) -> SocketAddr {
        self.dst_addr
    }

    pub fn set_dst_addr(&mut self, addr: SocketAddr) {
        self.dst_addr = addr;
    }

    pub fn l2_header(&self) -> Option<&EthernetRepr> {
        self.l2_header.as_ref()
    }

    pub fn set_l2_header(&mut self, header: EthernetRepr) {
        self.l2_header = Some(header);
    }

    pub fn l3_header(&self) -> Option<&L3Header> {
        self.l3_header.as_ref()
    }

    pub fn set_l3_header(&mut self, header: L3Header) {
        self.l3_header = Some(header);
    }

    pub fn l4_header(&self) -> Option<&L4Header> {
        self.l4_header.as_ref()
    }

    pub fn set_l4_header(&mut self, header: L4Header) {
        self.l4_header = Some(header);
    }

    /// Signals the packet buffer's terminal outcome to whoever originated
    /// it. Fires at most once; a buffer off the wire has no originator and
    /// resolving it is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the completion already fired.
    pub fn resolve(&mut self, outcome: TxResult) {
        match std::mem::replace(&mut self.resp, Resp::Resolved) {
            Resp::Pending(tx) => {
                let _ = tx.send(outcome);
            }
            Resp::None => {
                self.resp = Resp::None;
            }
            Resp::Resolved => panic!("packet buffer resolved twice"),
        }
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("type", &self.protocol_type)
            .field("len", &self.data.len())
            .field("src", &self.src_addr)
            .field("dst", &self.dst_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_and_strip() {
        let mut pb = PacketBuffer::new(vec![4, 5, 6]);
        pb.prepend_bytes(&[1, 2, 3]);
        assert_eq!(&[1, 2, 3, 4, 5, 6][..], &pb.data[..]);

        pb.strip_bytes(2);
        assert_eq!(&[3, 4, 5, 6][..], &pb.data[..]);

        pb.strip_bytes(100);
        assert!(pb.data.is_empty());
    }

    #[test]
    fn test_new_buffer_is_untyped() {
        let pb = PacketBuffer::new(vec![]);
        assert_eq!(ProtocolType::Unknown, pb.protocol_type());
    }

    #[test]
    fn test_resolve_wakes_completion() {
        let (mut pb, completion) = PacketBuffer::with_completion(vec![0; 16]);
        pb.resolve(Ok(16));
        assert_matches!(completion.wait(), Ok(16));
    }

    #[test]
    fn test_drop_without_resolve_reports_dropped() {
        let (pb, completion) = PacketBuffer::with_completion(vec![]);
        drop(pb);
        assert_matches!(completion.wait(), Err(Error::Dropped));
    }

    #[test]
    fn test_resolve_without_completion_is_noop() {
        let mut pb = PacketBuffer::new(vec![]);
        pb.resolve(Ok(0));
        pb.resolve(Ok(0));
    }

    #[test]
    #[should_panic(expected = "resolved twice")]
    fn test_resolve_twice_panics() {
        let (mut pb, _completion) = PacketBuffer::with_completion(vec![]);
        pb.resolve(Ok(0));
        pb.resolve(Ok(0));
    }
}
