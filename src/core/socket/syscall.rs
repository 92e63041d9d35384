//! The syscall schema carried over the IPC boundary: newline-delimited
//! JSON, one request to one response, matched by connection id.

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    Error,
    Result,
};
use crate::core::socket::SocketAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyscallType {
    Socket,
    Bind,
    Listen,
    Accept,
    Connect,
    Close,
    Read,
    Write,
    ReadFrom,
    WriteTo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyscallRequest {
    #[serde(rename = "ConnID", default)]
    pub conn_id: String,
    #[serde(rename = "SyscallType")]
    pub syscall_type: SyscallType,
    #[serde(rename = "SockType", default)]
    pub sock_type: u8,
    #[serde(rename = "SockID", default)]
    pub sock_id: String,
    #[serde(rename = "Addr", default)]
    pub addr: Option<SocketAddr>,
    #[serde(rename = "Flags", default)]
    pub flags: i32,
    #[serde(rename = "Data", default)]
    pub data: Vec<u8>,
}

impl SyscallRequest {
    /// A request carrying nothing but its type, for synthesized syscalls
    /// and as a builder base.
    pub fn new(syscall_type: SyscallType) -> SyscallRequest {
        SyscallRequest {
            conn_id: String::new(),
            syscall_type,
            sock_type: 0,
            sock_id: String::new(),
            addr: None,
            flags: 0,
            data: Vec::new(),
        }
    }

    /// The response shell echoing the request's connection and socket.
    pub fn response(&self) -> SyscallResponse {
        SyscallResponse {
            conn_id: self.conn_id.clone(),
            sock_id: self.sock_id.clone(),
            err_msg: String::new(),
            data: Vec::new(),
            bytes_written: 0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SyscallResponse {
    #[serde(rename = "ConnID", default)]
    pub conn_id: String,
    #[serde(rename = "SockID", default)]
    pub sock_id: String,
    #[serde(rename = "ErrMsg", default)]
    pub err_msg: String,
    #[serde(rename = "Data", default)]
    pub data: Vec<u8>,
    #[serde(rename = "BytesWritten", default)]
    pub bytes_written: usize,
}

impl SyscallResponse {
    /// Client-side view: a non-empty error message is a failed syscall.
    pub fn into_result(self) -> Result<SyscallResponse> {
        if self.err_msg.is_empty() {
            Ok(self)
        } else {
            Err(Error::Syscall(self.err_msg))
        }
    }
}
