#[cfg(test)]
#[macro_use]
extern crate assert_matches;
extern crate byteorder;
#[macro_use]
extern crate lazy_static;
extern crate libc;
#[macro_use]
extern crate log;
extern crate rand;
extern crate serde;
extern crate serde_json;

pub mod api;
pub mod core;
pub mod ipc;

#[cfg(target_os = "linux")]
pub mod linux;

use std::fmt::{
    Display,
    Formatter,
    Result as FmtResult,
};
use std::io::Error as IOError;
use std::result::Result as StdResult;

#[derive(Debug)]
pub enum Error {
    /// Indicates a header which could not be parsed or encoded.
    Malformed,
    /// Indicates a buffer, queue, or allocator without capacity left.
    Exhausted,
    /// Indicates a header with an invalid checksum.
    Checksum,
    /// Indicates an IPv4 packet that arrived with a zero TTL.
    TtlExpired,
    /// Indicates a frame or packet not addressed to us.
    AddressMismatch,
    /// Indicates a missing IP to MAC translation; the packet is parked
    /// until a reply arrives.
    ArpCacheMiss,
    /// Indicates a destination with no matching route and no default.
    NoRoute,
    /// Indicates a packet dropped before its completion fired.
    Dropped,
    /// Indicates an unsupported socket type in a syscall.
    InvalidSocketType,
    /// Indicates a socket id with no entry in the socket table.
    InvalidSocketId,
    /// Indicates a socket address which could not be parsed.
    InvalidSocketAddr,
    /// Indicates the ephemeral port allocator ran dry.
    NoPortsAvailable,
    /// Indicates a bind to a port owned by another socket.
    PortAlreadyAssigned,
    /// Indicates a bind on a socket which already holds a binding.
    SocketAlreadyBound,
    /// Indicates a TCP segment outside the receive window.
    InvalidSequenceNumber,
    /// Indicates a TCP acknowledgment outside [SND.UNA, SND.NXT].
    InvalidAckNumber,
    /// Indicates a connection aborted by an RST segment.
    ConnectionReset,
    /// Indicates an operation on a connection with no control block.
    ConnectionNoExist,
    /// Indicates a close on a connection already shutting down.
    ConnectionClosing,
    /// Indicates a TCP event which is illegal in the current state.
    InvalidState,
    /// Indicates a protocol the stack only stubs (IPv6 for the most part).
    ProtocolNotSupported,
    /// Indicates a dispatch to a protocol not registered with its layer.
    ProtocolNotFound,
    /// Indicates an error reported by the stack over the IPC boundary.
    Syscall(String),
    /// Indicates a generic IO error.
    IO(IOError),
}

impl From<IOError> for Error {
    fn from(err: IOError) -> Error {
        Error::IO(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match *self {
            Error::Malformed => write!(f, "malformed header"),
            Error::Exhausted => write!(f, "buffer exhausted"),
            Error::Checksum => write!(f, "invalid checksum"),
            Error::TtlExpired => write!(f, "ttl expired"),
            Error::AddressMismatch => write!(f, "address mismatch"),
            Error::ArpCacheMiss => write!(f, "arp cache miss"),
            Error::NoRoute => write!(f, "no route to destination"),
            Error::Dropped => write!(f, "packet dropped"),
            Error::InvalidSocketType => write!(f, "invalid socket type"),
            Error::InvalidSocketId => write!(f, "invalid socket id"),
            Error::InvalidSocketAddr => write!(f, "invalid socket address"),
            Error::NoPortsAvailable => write!(f, "no ports available"),
            Error::PortAlreadyAssigned => write!(f, "port already assigned"),
            Error::SocketAlreadyBound => write!(f, "socket already bound"),
            Error::InvalidSequenceNumber => write!(f, "invalid sequence number"),
            Error::InvalidAckNumber => write!(f, "invalid ack number"),
            Error::ConnectionReset => write!(f, "connection reset"),
            Error::ConnectionNoExist => write!(f, "connection does not exist"),
            Error::ConnectionClosing => write!(f, "connection is closing"),
            Error::InvalidState => write!(f, "invalid connection state"),
            Error::ProtocolNotSupported => write!(f, "protocol not supported"),
            Error::ProtocolNotFound => write!(f, "protocol not found"),
            Error::Syscall(ref msg) => write!(f, "{}", msg),
            Error::IO(ref err) => write!(f, "{}", err),
        }
    }
}

pub type Result<T> = StdResult<T, Error>;
