use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::net::{
    IpAddr,
    Ipv4Addr,
};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
};
use crate::core::iface::Interface;
use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};
use crate::core::repr::Ipv4Address;
use crate::core::routing::Route;
use crate::core::service::tcp::AcceptNotice;

/// Packets a socket's receive mailbox holds before the protocol manager
/// stalls.
pub const SOCKET_RX_QUEUE_LEN: usize = 100;

/// An IP + port pair with a derivable address family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketAddr {
    #[serde(rename = "IP")]
    pub ip: IpAddr,
    #[serde(rename = "Port")]
    pub port: u16,
}

impl SocketAddr {
    pub fn new(ip: IpAddr, port: u16) -> SocketAddr {
        SocketAddr { ip, port }
    }

    pub fn unspecified() -> SocketAddr {
        SocketAddr {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }

    pub fn from_ipv4(ip: Ipv4Address, port: u16) -> SocketAddr {
        SocketAddr {
            ip: IpAddr::V4(ip.into()),
            port,
        }
    }

    /// The IPv4 address, or `ProtocolNotSupported` for the stubbed v6
    /// family.
    pub fn ipv4(&self) -> Result<Ipv4Address> {
        match self.ip {
            IpAddr::V4(ip) => Ok(Ipv4Address::from(ip)),
            IpAddr::V6(_) => Err(Error::ProtocolNotSupported),
        }
    }

    /// Parses an `a.b.c.d:port` style address.
    pub fn parse(addr: &str) -> Result<SocketAddr> {
        let mut parts = addr.rsplitn(2, ':');
        let port = parts
            .next()
            .and_then(|port| port.parse().ok())
            .ok_or(Error::InvalidSocketAddr)?;
        let ip = parts
            .next()
            .and_then(|ip| ip.parse().ok())
            .ok_or(Error::InvalidSocketAddr)?;

        Ok(SocketAddr { ip, port })
    }
}

impl Display for SocketAddr {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// The socket variants over the shared capability set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketType {
    Stream = 1,
    Datagram = 2,
    Raw = 3,
}

impl SocketType {
    pub fn from_u8(value: u8) -> Result<SocketType> {
        match value {
            1 => Ok(SocketType::Stream),
            2 => Ok(SocketType::Datagram),
            3 => Ok(SocketType::Raw),
            _ => Err(Error::InvalidSocketType),
        }
    }

    /// The transport protocol serving this socket type.
    pub fn protocol_type(&self) -> ProtocolType {
        match *self {
            SocketType::Stream => ProtocolType::Tcp,
            SocketType::Datagram => ProtocolType::Udp,
            SocketType::Raw => ProtocolType::Raw,
        }
    }
}

/// A globally unique socket identifier of the form `<hex>-<type digit>`;
/// the suffix alone recovers the owning protocol manager.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SockId(String);

impl SockId {
    pub fn generate(sock_type: SocketType) -> SockId {
        SockId(format!("{:032x}-{}", rand::random::<u128>(), sock_type as u8))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the socket type from the id suffix.
    pub fn socket_type(&self) -> Result<SocketType> {
        let digit = self
            .0
            .rsplit('-')
            .next()
            .and_then(|suffix| suffix.parse().ok())
            .ok_or(Error::InvalidSocketId)?;
        SocketType::from_u8(digit)
    }
}

impl From<String> for SockId {
    fn from(id: String) -> SockId {
        SockId(id)
    }
}

impl Display for SockId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// Mutable socket state shared by all variants.
pub struct SocketMeta {
    pub sock_type: SocketType,
    pub id: SockId,
    /// The IPC connection that created the socket; disconnects reclaim by
    /// this key.
    pub conn_id: String,
    pub src_addr: SocketAddr,
    pub dst_addr: SocketAddr,
    pub route: Option<Route>,
    pub iface: Option<Arc<Interface>>,
    pub bound: bool,
}

/// An individual socket. The receive mailbox has a single producer (the
/// protocol manager) and a single consumer (the user-facing read path).
pub struct Socket {
    meta: Mutex<SocketMeta>,
    rx: SyncSender<PacketBuffer>,
    rx_queue: Mutex<Receiver<PacketBuffer>>,
    accept_tx: Mutex<Option<SyncSender<AcceptNotice>>>,
    accept_queue: Mutex<Option<Receiver<AcceptNotice>>>,
}

impl Socket {
    pub fn new(sock_type: SocketType, id: SockId, conn_id: String) -> Arc<Socket> {
        let (rx, rx_queue) = sync_channel(SOCKET_RX_QUEUE_LEN);

        Arc::new(Socket {
            meta: Mutex::new(SocketMeta {
                sock_type,
                id,
                conn_id,
                src_addr: SocketAddr::unspecified(),
                dst_addr: SocketAddr::unspecified(),
                route: None,
                iface: None,
                bound: false,
            }),
            rx,
            rx_queue: Mutex::new(rx_queue),
            accept_tx: Mutex::new(None),
            accept_queue: Mutex::new(None),
        })
    }

    pub fn meta(&self) -> MutexGuard<SocketMeta> {
        self.meta.lock().unwrap()
    }

    /// Hands an inbound packet to the socket; blocks when the mailbox is
    /// full.
    pub fn enqueue(&self, pb: PacketBuffer) {
        let _ = self.rx.send(pb);
    }

    /// Blocks until the next inbound packet. For a datagram socket this
    /// is a whole datagram.
    pub fn recv(&self) -> Result<PacketBuffer> {
        let rx_queue = self.rx_queue.lock().unwrap();
        rx_queue.recv().map_err(|_| Error::Dropped)
    }

    /// Creates (once) and returns the mailbox passive opens notify.
    pub fn listen_queue(&self) -> SyncSender<AcceptNotice> {
        let mut accept_tx = self.accept_tx.lock().unwrap();
        if accept_tx.is_none() {
            let (tx, rx) = sync_channel(SOCKET_RX_QUEUE_LEN);
            *accept_tx = Some(tx);
            *self.accept_queue.lock().unwrap() = Some(rx);
        }
        accept_tx.as_ref().unwrap().clone()
    }

    /// Blocks until a connection lands on this listening socket.
    pub fn accept(&self) -> Result<AcceptNotice> {
        let accept_queue = self.accept_queue.lock().unwrap();
        match *accept_queue {
            Some(ref queue) => queue.recv().map_err(|_| Error::Dropped),
            None => Err(Error::InvalidState),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr_parse() {
        let addr = SocketAddr::parse("10.88.45.69:8845").unwrap();
        assert_eq!("10.88.45.69:8845", addr.to_string());
        assert_eq!(8845, addr.port);
        assert_eq!(Ipv4Address::new([10, 88, 45, 69]), addr.ipv4().unwrap());

        assert_matches!(SocketAddr::parse("10.88.45.69"), Err(Error::InvalidSocketAddr));
        assert_matches!(
            SocketAddr::parse("not-an-ip:80"),
            Err(Error::InvalidSocketAddr)
        );
    }

    #[test]
    fn test_sock_id_recovers_socket_type() {
        let id = SockId::generate(SocketType::Datagram);
        assert_eq!(SocketType::Datagram, id.socket_type().unwrap());

        let id = SockId::generate(SocketType::Stream);
        assert_eq!(SocketType::Stream, id.socket_type().unwrap());

        assert_matches!(
            SockId::from("garbage".to_string()).socket_type(),
            Err(Error::InvalidSocketId)
        );
    }

    #[test]
    fn test_sock_ids_are_unique() {
        let a = SockId::generate(SocketType::Raw);
        let b = SockId::generate(SocketType::Raw);
        assert_ne!(a, b);
    }

    #[test]
    fn test_recv_returns_enqueued_packet() {
        let socket = Socket::new(
            SocketType::Datagram,
            SockId::generate(SocketType::Datagram),
            "conn".to_string(),
        );

        let mut pb = PacketBuffer::new(b"Hello World\n".to_vec());
        pb.set_protocol_type(ProtocolType::Udp);
        socket.enqueue(pb);

        let pb = socket.recv().unwrap();
        assert_eq!(b"Hello World\n".to_vec(), pb.data);
    }

    #[test]
    fn test_accept_before_listen_fails() {
        let socket = Socket::new(
            SocketType::Stream,
            SockId::generate(SocketType::Stream),
            "conn".to_string(),
        );
        assert_matches!(socket.accept(), Err(Error::InvalidState));
    }
}
