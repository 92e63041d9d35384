//! The socket layer proper: one router task turning syscall requests
//! into packet exchanges, one response per request.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};
use std::thread;

use crate::{
    Error,
    Result,
};
use crate::core::layer::{
    start_protocol,
    Layer,
    Protocol,
};
use crate::core::pb::{
    PacketBuffer,
    ProtocolType,
};
use crate::core::routing::RoutingTable;
use crate::core::service::tcp::TcpProtocol;
use crate::core::socket::{
    SockId,
    Socket,
    SocketAddr,
    SocketManager,
    SocketType,
    SyscallRequest,
    SyscallResponse,
    SyscallType,
};

/// Depth of the syscall request and response mailboxes.
pub const SYSCALL_QUEUE_LEN: usize = 32;

pub struct SocketLayer {
    managers: HashMap<ProtocolType, Arc<SocketManager>>,
    routing: Arc<RoutingTable>,
    /// The transport layer's transmit mailbox; datagrams enter the
    /// pipeline here.
    transport_tx: SyncSender<PacketBuffer>,
    tcp: Arc<TcpProtocol>,
    req: SyncSender<SyscallRequest>,
    req_queue: Mutex<Option<Receiver<SyscallRequest>>>,
    resp: SyncSender<SyscallResponse>,
    resp_queue: Mutex<Option<Receiver<SyscallResponse>>>,
}

impl SocketLayer {
    /// Builds the socket layer over an already-created dispatch `Layer`
    /// (the one the transport protocols lift into) and starts the
    /// per-protocol socket managers on it.
    pub fn new(
        layer: Layer,
        routing: Arc<RoutingTable>,
        transport_tx: SyncSender<PacketBuffer>,
        tcp: Arc<TcpProtocol>,
    ) -> Arc<SocketLayer> {
        let mut managers = HashMap::new();
        for protocol_type in [ProtocolType::Udp, ProtocolType::Tcp, ProtocolType::Raw].iter() {
            managers.insert(*protocol_type, SocketManager::new(*protocol_type));
        }

        layer.start(
            managers
                .values()
                .map(|manager| start_protocol(Arc::clone(manager) as Arc<dyn Protocol>))
                .collect(),
        );

        let (req, req_queue) = sync_channel(SYSCALL_QUEUE_LEN);
        let (resp, resp_queue) = sync_channel(SYSCALL_QUEUE_LEN);

        Arc::new(SocketLayer {
            managers,
            routing,
            transport_tx,
            tcp,
            req,
            req_queue: Mutex::new(Some(req_queue)),
            resp,
            resp_queue: Mutex::new(Some(resp_queue)),
        })
    }

    /// The mailbox the IPC layer pumps decoded syscalls into.
    pub fn syscall_chan(&self) -> SyncSender<SyscallRequest> {
        self.req.clone()
    }

    /// The response stream the IPC layer consumes, matched by `ConnID`.
    /// Can be taken once.
    pub fn take_responses(&self) -> Receiver<SyscallResponse> {
        self.resp_queue
            .lock()
            .unwrap()
            .take()
            .expect("responses already taken")
    }

    /// Spawns the syscall router task.
    ///
    /// Syscalls are handled one at a time and each produces exactly one
    /// response; a blocking call blocks the router with it.
    pub fn start(self: &Arc<Self>) {
        let layer = Arc::clone(self);
        let req_queue = self
            .req_queue
            .lock()
            .unwrap()
            .take()
            .expect("socket layer already started");

        thread::Builder::new()
            .name("syscall-router".to_string())
            .spawn(move || {
                for req in req_queue.iter() {
                    let resp = layer.dispatch(req);
                    if layer.resp.send(resp).is_err() {
                        return;
                    }
                }
            })
            .expect("spawning syscall router");
    }

    fn dispatch(&self, req: SyscallRequest) -> SyscallResponse {
        let mut resp = req.response();

        let outcome = match req.syscall_type {
            SyscallType::Socket => self.socket(&req, &mut resp),
            SyscallType::Bind => self.bind(&req),
            SyscallType::Listen => self.listen(&req),
            SyscallType::Accept => self.accept(&req, &mut resp),
            SyscallType::Connect => self.connect(&req),
            SyscallType::Close => self.close(&req),
            SyscallType::Read | SyscallType::ReadFrom => self.read(&req, &mut resp),
            SyscallType::Write => self.write(&req, &mut resp),
            SyscallType::WriteTo => self.write_to(&req, &mut resp),
        };

        if let Err(err) = outcome {
            debug!("{:?} failed: {}", req.syscall_type, err);
            resp.err_msg = err.to_string();
        }

        resp
    }

    fn manager(&self, sock_type: SocketType) -> Result<&Arc<SocketManager>> {
        self.managers
            .get(&sock_type.protocol_type())
            .ok_or(Error::InvalidSocketType)
    }

    /// Recovers the manager and socket from the id alone; the type digit
    /// in the id picks the manager.
    fn socket_for(&self, req: &SyscallRequest) -> Result<(&Arc<SocketManager>, Arc<Socket>)> {
        let id = SockId::from(req.sock_id.clone());
        let manager = self.manager(id.socket_type()?)?;
        let socket = manager.get(&id).ok_or(Error::InvalidSocketId)?;
        Ok((manager, socket))
    }

    fn socket(&self, req: &SyscallRequest, resp: &mut SyscallResponse) -> Result<()> {
        let sock_type = SocketType::from_u8(req.sock_type)?;
        let id = SockId::generate(sock_type);
        let socket = Socket::new(sock_type, id.clone(), req.conn_id.clone());

        self.manager(sock_type)?.add(&socket)?;

        resp.sock_id = id.to_string();
        Ok(())
    }

    fn bind(&self, req: &SyscallRequest) -> Result<()> {
        let addr = req.addr.ok_or(Error::InvalidSocketAddr)?;
        let (manager, socket) = self.socket_for(req)?;
        manager.bind(&socket, addr)
    }

    fn listen(&self, req: &SyscallRequest) -> Result<()> {
        let (_, socket) = self.socket_for(req)?;
        let (sock_type, port) = {
            let meta = socket.meta();
            (meta.sock_type, meta.src_addr.port)
        };

        if sock_type != SocketType::Stream {
            return Err(Error::InvalidSocketType);
        }

        self.tcp.listen(port, socket.listen_queue());
        Ok(())
    }

    fn accept(&self, req: &SyscallRequest, resp: &mut SyscallResponse) -> Result<()> {
        let (manager, socket) = self.socket_for(req)?;

        let notice = socket.accept()?;

        // The new connection gets a socket of its own, sharing the
        // listener's port.
        let id = SockId::generate(SocketType::Stream);
        let accepted = Socket::new(SocketType::Stream, id.clone(), req.conn_id.clone());
        {
            let mut meta = accepted.meta();
            meta.src_addr = notice.local;
            meta.dst_addr = notice.remote;
            meta.bound = true;
        }
        manager.add_accepted(&accepted);

        resp.sock_id = id.to_string();
        resp.data = notice.remote.to_string().into_bytes();
        Ok(())
    }

    fn connect(&self, req: &SyscallRequest) -> Result<()> {
        let addr = req.addr.ok_or(Error::InvalidSocketAddr)?;
        let (_, socket) = self.socket_for(req)?;

        let (sock_type, src_addr, iface) = {
            let mut meta = socket.meta();

            let route = self
                .routing
                .lookup(addr.ipv4()?)
                .ok_or(Error::NoRoute)?;
            meta.src_addr.ip = IpAddr::V4(route.network.address.into());
            meta.dst_addr = addr;
            meta.iface = Some(Arc::clone(&route.iface));
            meta.route = Some(route);

            (
                meta.sock_type,
                meta.src_addr,
                Arc::clone(meta.iface.as_ref().unwrap()),
            )
        };

        match sock_type {
            // A datagram connect just caches the route and destination.
            SocketType::Datagram | SocketType::Raw => Ok(()),

            SocketType::Stream => {
                let established = self.tcp.open_connection(src_addr, addr, iface)?;
                match established.recv() {
                    Ok(result) => result,
                    Err(_) => Err(Error::Dropped),
                }
            }
        }
    }

    fn close(&self, req: &SyscallRequest) -> Result<()> {
        if req.sock_id.is_empty() {
            // Synthesized on IPC disconnect: reclaim everything the
            // connection owned.
            self.close_conn(&req.conn_id);
            return Ok(());
        }

        let (manager, socket) = self.socket_for(req)?;
        self.close_socket(manager, &socket);
        Ok(())
    }

    fn close_conn(&self, conn_id: &str) {
        for manager in self.managers.values() {
            for socket in manager.remove_by_conn(conn_id) {
                self.teardown(&socket);
            }
        }
    }

    fn close_socket(&self, manager: &Arc<SocketManager>, socket: &Arc<Socket>) {
        let id = socket.meta().id.clone();
        self.teardown(socket);
        manager.remove(&id);
    }

    /// Protocol-side cleanup: listening ports are unregistered and live
    /// connections shut down.
    fn teardown(&self, socket: &Arc<Socket>) {
        let (sock_type, src_addr, dst_addr) = {
            let meta = socket.meta();
            (meta.sock_type, meta.src_addr, meta.dst_addr)
        };

        if sock_type != SocketType::Stream {
            return;
        }

        self.tcp.unlisten(src_addr.port);

        if dst_addr.port != 0 {
            if let Err(err) = self.tcp.close_connection(src_addr, dst_addr) {
                debug!("closing {}-{}: {}", src_addr, dst_addr, err);
            }
        }
    }

    fn read(&self, req: &SyscallRequest, resp: &mut SyscallResponse) -> Result<()> {
        let (_, socket) = self.socket_for(req)?;
        let pb = socket.recv()?;
        resp.data = pb.data;
        Ok(())
    }

    fn write(&self, req: &SyscallRequest, resp: &mut SyscallResponse) -> Result<()> {
        let (_, socket) = self.socket_for(req)?;
        let (sock_type, src_addr, dst_addr) = {
            let meta = socket.meta();
            (meta.sock_type, meta.src_addr, meta.dst_addr)
        };

        match sock_type {
            SocketType::Stream => {
                resp.bytes_written = self.tcp.send(src_addr, dst_addr, &req.data)?;
                Ok(())
            }
            // A connected datagram socket writes to its cached
            // destination.
            SocketType::Datagram => {
                if dst_addr.port == 0 {
                    return Err(Error::InvalidSocketAddr);
                }
                resp.bytes_written = self.send_to(&socket, dst_addr, req.data.clone())?;
                Ok(())
            }

            SocketType::Raw => Err(Error::ProtocolNotSupported),
        }
    }

    fn write_to(&self, req: &SyscallRequest, resp: &mut SyscallResponse) -> Result<()> {
        let addr = req.addr.ok_or(Error::InvalidSocketAddr)?;
        let (_, socket) = self.socket_for(req)?;

        if socket.meta().sock_type == SocketType::Raw {
            return Err(Error::ProtocolNotSupported);
        }

        resp.bytes_written = self.send_to(&socket, addr, req.data.clone())?;
        Ok(())
    }

    /// The datagram transmit flow: route, source address, a packet
    /// buffer tagged for UDP, then block until the wire answers.
    fn send_to(&self, socket: &Arc<Socket>, addr: SocketAddr, data: Vec<u8>) -> Result<usize> {
        let (pb, completion) = {
            let mut meta = socket.meta();

            let route = self
                .routing
                .lookup(addr.ipv4()?)
                .ok_or(Error::NoRoute)?;
            meta.src_addr.ip = IpAddr::V4(route.network.address.into());
            meta.iface = Some(Arc::clone(&route.iface));

            let (mut pb, completion) = PacketBuffer::with_completion(data);
            pb.set_protocol_type(ProtocolType::Udp);
            pb.set_tx_iface(Arc::clone(&route.iface));
            pb.set_src_addr(meta.src_addr);
            pb.set_dst_addr(addr);

            meta.route = Some(route);
            (pb, completion)
        };

        self.transport_tx
            .send(pb)
            .map_err(|_| Error::Dropped)?;
        completion.wait()
    }
}
