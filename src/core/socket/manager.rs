//! Per-protocol socket registries and the ephemeral port allocator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::{
    Error,
    Result,
};
use crate::core::layer::Protocol;
use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};
use crate::core::socket::{
    SockId,
    Socket,
    SocketAddr,
};

/// First port the ephemeral allocator hands out.
pub const EPHEMERAL_PORT_START: u16 = 40000;

/// Port bookkeeping for one transport protocol: the cursor-driven
/// ephemeral allocator and the port map in one.
///
/// Every bound or ephemeral-assigned port appears here exactly when its
/// owning socket exists in the manager's socket table.
pub struct PortAllocator {
    current_port: u16,
    assigned: HashMap<u16, SockId>,
}

impl PortAllocator {
    pub fn new() -> PortAllocator {
        PortAllocator {
            current_port: EPHEMERAL_PORT_START,
            assigned: HashMap::new(),
        }
    }

    /// Scans forward from the cursor and claims the first free port.
    /// Exhaustion fails; the allocator does not wrap.
    pub fn get_unused_port(&mut self, owner: &SockId) -> Result<u16> {
        for port in self.current_port .. 65535 {
            if !self.assigned.contains_key(&port) {
                self.assigned.insert(port, owner.clone());
                self.current_port = port;
                return Ok(port);
            }
        }

        Err(Error::NoPortsAvailable)
    }

    /// Claims a specific port for an explicit bind.
    pub fn claim(&mut self, port: u16, owner: &SockId) -> Result<()> {
        match self.assigned.get(&port) {
            Some(existing) if existing != owner => Err(Error::PortAlreadyAssigned),
            _ => {
                self.assigned.insert(port, owner.clone());
                Ok(())
            }
        }
    }

    /// Releases a port if the caller owns it.
    pub fn release(&mut self, port: u16, owner: &SockId) {
        if self.assigned.get(&port) == Some(owner) {
            self.assigned.remove(&port);
        }
    }

    pub fn owner_of(&self, port: u16) -> Option<&SockId> {
        self.assigned.get(&port)
    }
}

/// The socket registry for one transport protocol. Registered as a
/// socket-layer "protocol" so inbound packets dispatch here by type.
pub struct SocketManager {
    protocol_type: ProtocolType,
    sockets: Mutex<HashMap<SockId, Arc<Socket>>>,
    ports: Mutex<PortAllocator>,
}

impl SocketManager {
    pub fn new(protocol_type: ProtocolType) -> Arc<SocketManager> {
        Arc::new(SocketManager {
            protocol_type,
            sockets: Mutex::new(HashMap::new()),
            ports: Mutex::new(PortAllocator::new()),
        })
    }

    /// Registers a socket, assigning it an ephemeral source port it owns
    /// until close.
    pub fn add(&self, socket: &Arc<Socket>) -> Result<()> {
        let mut meta = socket.meta();
        let port = self.ports.lock().unwrap().get_unused_port(&meta.id)?;
        meta.src_addr.port = port;

        self.sockets
            .lock()
            .unwrap()
            .insert(meta.id.clone(), Arc::clone(socket));
        Ok(())
    }

    /// Registers a socket born of `accept`; it shares the listener's
    /// port, so no allocation happens.
    pub fn add_accepted(&self, socket: &Arc<Socket>) {
        let id = socket.meta().id.clone();
        self.sockets.lock().unwrap().insert(id, Arc::clone(socket));
    }

    pub fn get(&self, id: &SockId) -> Option<Arc<Socket>> {
        self.sockets.lock().unwrap().get(id).cloned()
    }

    /// Rebinds a socket to an explicit address, releasing its ephemeral
    /// port.
    pub fn bind(&self, socket: &Arc<Socket>, addr: SocketAddr) -> Result<()> {
        let mut meta = socket.meta();
        if meta.bound {
            return Err(Error::SocketAlreadyBound);
        }

        let mut ports = self.ports.lock().unwrap();
        if let Some(owner) = ports.owner_of(addr.port) {
            if *owner != meta.id {
                return Err(Error::PortAlreadyAssigned);
            }
        }

        let previous = meta.src_addr.port;
        ports.claim(addr.port, &meta.id)?;
        if previous != addr.port {
            ports.release(previous, &meta.id);
        }

        meta.src_addr = addr;
        meta.bound = true;
        Ok(())
    }

    /// Unregisters a socket and releases its port.
    pub fn remove(&self, id: &SockId) -> Option<Arc<Socket>> {
        let socket = self.sockets.lock().unwrap().remove(id)?;
        let port = socket.meta().src_addr.port;
        self.ports.lock().unwrap().release(port, id);
        Some(socket)
    }

    /// Unregisters every socket created by an IPC connection; used when
    /// the connection disappears.
    pub fn remove_by_conn(&self, conn_id: &str) -> Vec<Arc<Socket>> {
        let ids: Vec<SockId> = self
            .sockets
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, socket)| socket.meta().conn_id == conn_id)
            .map(|(id, _)| id.clone())
            .collect();

        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}

impl Protocol for SocketManager {
    fn protocol_type(&self) -> ProtocolType {
        self.protocol_type
    }

    /// Destination port to socket id to socket; the packet lands in the
    /// socket's receive mailbox.
    fn handle_rx(&self, pb: PacketBuffer) {
        let port = pb.dst_addr().port;

        let id = match self.ports.lock().unwrap().owner_of(port) {
            Some(id) => id.clone(),
            None => {
                debug!("no socket bound to port {}", port);
                return;
            }
        };

        match self.get(&id) {
            Some(socket) => socket.enqueue(pb),
            None => debug!("port {} names a vanished socket", port),
        }
    }

    /// The user-facing paths transmit directly; nothing dispatches here.
    fn handle_tx(&self, mut pb: PacketBuffer) {
        pb.resolve(Err(Error::InvalidState));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::socket::SocketType;

    fn socket() -> Arc<Socket> {
        Socket::new(
            SocketType::Datagram,
            SockId::generate(SocketType::Datagram),
            "conn".to_string(),
        )
    }

    #[test]
    fn test_add_assigns_ephemeral_port() {
        let manager = SocketManager::new(ProtocolType::Udp);

        let first = socket();
        let second = socket();
        manager.add(&first).unwrap();
        manager.add(&second).unwrap();

        assert_eq!(EPHEMERAL_PORT_START, first.meta().src_addr.port);
        assert_eq!(EPHEMERAL_PORT_START + 1, second.meta().src_addr.port);
    }

    #[test]
    fn test_allocator_exhaustion_fails() {
        let mut allocator = PortAllocator::new();
        allocator.current_port = 65534;

        let owner = SockId::generate(SocketType::Datagram);
        assert_matches!(allocator.get_unused_port(&owner), Ok(65534));
        assert_matches!(
            allocator.get_unused_port(&owner),
            Err(Error::NoPortsAvailable)
        );
    }

    #[test]
    fn test_bind_replaces_ephemeral_port() {
        let manager = SocketManager::new(ProtocolType::Udp);
        let socket = socket();
        manager.add(&socket).unwrap();
        let ephemeral = socket.meta().src_addr.port;

        manager
            .bind(&socket, SocketAddr::parse("0.0.0.0:8845").unwrap())
            .unwrap();

        assert_eq!(8845, socket.meta().src_addr.port);
        assert!(socket.meta().bound);

        let ports = manager.ports.lock().unwrap();
        assert!(ports.owner_of(ephemeral).is_none());
        assert_eq!(Some(&socket.meta().id), ports.owner_of(8845));
    }

    #[test]
    fn test_bind_conflicts() {
        let manager = SocketManager::new(ProtocolType::Udp);
        let first = socket();
        let second = socket();
        manager.add(&first).unwrap();
        manager.add(&second).unwrap();

        let addr = SocketAddr::parse("0.0.0.0:8845").unwrap();
        manager.bind(&first, addr).unwrap();
        assert_matches!(manager.bind(&second, addr), Err(Error::PortAlreadyAssigned));
        assert_matches!(manager.bind(&first, addr), Err(Error::SocketAlreadyBound));
    }

    #[test]
    fn test_remove_releases_port() {
        let manager = SocketManager::new(ProtocolType::Udp);
        let socket = socket();
        manager.add(&socket).unwrap();
        let port = socket.meta().src_addr.port;
        let id = socket.meta().id.clone();

        manager.remove(&id);
        assert!(manager.ports.lock().unwrap().owner_of(port).is_none());
        assert!(manager.get(&id).is_none());
    }

    #[test]
    fn test_remove_by_conn() {
        let manager = SocketManager::new(ProtocolType::Udp);
        let mine = socket();
        let theirs = Socket::new(
            SocketType::Datagram,
            SockId::generate(SocketType::Datagram),
            "other-conn".to_string(),
        );
        manager.add(&mine).unwrap();
        manager.add(&theirs).unwrap();

        let removed = manager.remove_by_conn("conn");
        assert_eq!(1, removed.len());
        assert!(manager.get(&theirs.meta().id).is_some());
    }
}
