//! The thin client library: marshals socket calls as JSON frames over
//! the stack's UNIX-domain socket.
//!
//! ```no_run
//! use rustnet::api::Client;
//! use rustnet::core::socket::{SocketAddr, SocketType};
//!
//! let client = Client::attach_default().unwrap();
//! let sock = client.socket(SocketType::Datagram).unwrap();
//! let addr = SocketAddr::parse("10.88.45.1:8845").unwrap();
//! client.write_to(&sock, b"Hello World\n", addr).unwrap();
//! ```

use std::io::{
    BufRead,
    BufReader,
    Write,
};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;

use crate::Result;
use crate::core::socket::{
    SockId,
    SocketAddr,
    SocketType,
    SyscallRequest,
    SyscallResponse,
    SyscallType,
};
use crate::ipc::DEFAULT_SOCKET_PATH;

struct Conn {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

/// One IPC connection to the stack. Calls are sequential: one request,
/// one response.
pub struct Client {
    conn: Mutex<Conn>,
}

impl Client {
    /// Attaches to a stack at the default socket path.
    pub fn attach_default() -> Result<Client> {
        Client::attach(DEFAULT_SOCKET_PATH)
    }

    /// Attaches to a stack serving at the given socket path.
    pub fn attach(path: &str) -> Result<Client> {
        let writer = UnixStream::connect(path)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Client {
            conn: Mutex::new(Conn { reader, writer }),
        })
    }

    fn call(&self, req: SyscallRequest) -> Result<SyscallResponse> {
        let mut conn = self.conn.lock().unwrap();

        let mut encoded = serde_json::to_vec(&req).map_err(|err| {
            crate::Error::Syscall(err.to_string())
        })?;
        encoded.push(b'\n');
        conn.writer.write_all(&encoded)?;

        let mut line = String::new();
        conn.reader.read_line(&mut line)?;

        let resp: SyscallResponse = serde_json::from_str(&line)
            .map_err(|err| crate::Error::Syscall(err.to_string()))?;
        resp.into_result()
    }

    fn request(syscall_type: SyscallType, sock: &SockId) -> SyscallRequest {
        let mut req = SyscallRequest::new(syscall_type);
        req.sock_id = sock.to_string();
        req
    }

    /// Creates a socket of the given type and returns its id.
    pub fn socket(&self, sock_type: SocketType) -> Result<SockId> {
        let mut req = SyscallRequest::new(SyscallType::Socket);
        req.sock_type = sock_type as u8;

        let resp = self.call(req)?;
        Ok(SockId::from(resp.sock_id))
    }

    /// Binds the socket to an explicit local address.
    pub fn bind(&self, sock: &SockId, addr: SocketAddr) -> Result<()> {
        let mut req = Client::request(SyscallType::Bind, sock);
        req.addr = Some(addr);
        self.call(req).map(|_| ())
    }

    /// Marks a stream socket as accepting connections.
    pub fn listen(&self, sock: &SockId) -> Result<()> {
        self.call(Client::request(SyscallType::Listen, sock)).map(|_| ())
    }

    /// Blocks for an inbound connection; returns the connection's socket
    /// and the remote address.
    pub fn accept(&self, sock: &SockId) -> Result<(SockId, SocketAddr)> {
        let resp = self.call(Client::request(SyscallType::Accept, sock))?;
        let remote = String::from_utf8(resp.data)
            .ok()
            .and_then(|addr| SocketAddr::parse(&addr).ok())
            .ok_or(crate::Error::InvalidSocketAddr)?;
        Ok((SockId::from(resp.sock_id), remote))
    }

    /// Connects the socket; blocks until the connection is established
    /// (stream) or the route is cached (datagram).
    pub fn connect(&self, sock: &SockId, addr: SocketAddr) -> Result<()> {
        let mut req = Client::request(SyscallType::Connect, sock);
        req.addr = Some(addr);
        self.call(req).map(|_| ())
    }

    /// Closes the socket, releasing its port and connection state.
    pub fn close(&self, sock: &SockId) -> Result<()> {
        self.call(Client::request(SyscallType::Close, sock)).map(|_| ())
    }

    /// Blocks for the next inbound payload.
    pub fn read(&self, sock: &SockId) -> Result<Vec<u8>> {
        let resp = self.call(Client::request(SyscallType::Read, sock))?;
        Ok(resp.data)
    }

    /// Writes to the socket's connected destination.
    pub fn write(&self, sock: &SockId, data: &[u8]) -> Result<usize> {
        let mut req = Client::request(SyscallType::Write, sock);
        req.data = data.to_vec();

        let resp = self.call(req)?;
        Ok(resp.bytes_written)
    }

    /// Blocks for the next inbound datagram.
    pub fn read_from(&self, sock: &SockId) -> Result<Vec<u8>> {
        let resp = self.call(Client::request(SyscallType::ReadFrom, sock))?;
        Ok(resp.data)
    }

    /// Sends one datagram to the given destination.
    pub fn write_to(&self, sock: &SockId, data: &[u8], addr: SocketAddr) -> Result<usize> {
        let mut req = Client::request(SyscallType::WriteTo, sock);
        req.addr = Some(addr);
        req.data = data.to_vec();

        let resp = self.call(req)?;
        Ok(resp.bytes_written)
    }
}
