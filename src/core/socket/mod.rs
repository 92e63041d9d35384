//! The socket layer: socket types and metadata, per-protocol socket
//! managers, the syscall schema, and the router task that turns syscalls
//! into packet exchanges.

pub mod layer;
pub mod manager;
pub mod socket;
pub mod syscall;

pub use self::layer::SocketLayer;
pub use self::manager::{
    PortAllocator,
    SocketManager,
    EPHEMERAL_PORT_START,
};
pub use self::socket::{
    SockId,
    Socket,
    SocketAddr,
    SocketMeta,
    SocketType,
};
pub use self::syscall::{
    SyscallRequest,
    SyscallResponse,
    SyscallType,
};
