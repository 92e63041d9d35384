//! The stack-side IPC surface: a UNIX-domain stream listener speaking
//! newline-delimited JSON syscall frames.

use std::collections::HashMap;
use std::fs;
use std::io::{
    BufRead,
    BufReader,
    Write,
};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{
    UnixListener,
    UnixStream,
};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};
use std::thread;

use crate::Result;
use crate::core::socket::{
    SyscallRequest,
    SyscallResponse,
    SyscallType,
};
use crate::core::stack::Stack;

/// Where clients find the stack unless told otherwise.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/rustnet.sock";

type ConnMap = Arc<Mutex<HashMap<String, SyncSender<SyscallResponse>>>>;

fn conn_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Serves syscalls forever. Each accepted connection gets a reader task;
/// a response loop routes the socket layer's answers back by `ConnID`.
pub fn serve(stack: &Stack, path: &str) -> Result<()> {
    let _ = fs::remove_file(path);
    let listener = UnixListener::bind(path)?;

    // Non-root clients need to reach the socket.
    fs::set_permissions(path, fs::Permissions::from_mode(0o777))?;
    info!("serving syscalls on {}", path);

    let conn_map: ConnMap = Arc::new(Mutex::new(HashMap::new()));
    let requests = stack.socket_layer.syscall_chan();
    let responses = stack.socket_layer.take_responses();

    start_response_loop(responses, Arc::clone(&conn_map));

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("accepting ipc connection: {}", err);
                continue;
            }
        };

        let id = conn_id();
        let (resp_tx, resp_rx) = sync_channel(1);
        conn_map.lock().unwrap().insert(id.clone(), resp_tx);

        let requests = requests.clone();
        let conn_map = Arc::clone(&conn_map);
        thread::Builder::new()
            .name(format!("ipc-{}", id))
            .spawn(move || {
                handle_connection(stream, id.clone(), requests, resp_rx);
                conn_map.lock().unwrap().remove(&id);
            })
            .expect("spawning ipc connection");
    }

    Ok(())
}

fn start_response_loop(responses: Receiver<SyscallResponse>, conn_map: ConnMap) {
    thread::Builder::new()
        .name("ipc-responses".to_string())
        .spawn(move || {
            for resp in responses.iter() {
                let chan = conn_map.lock().unwrap().get(&resp.conn_id).cloned();
                match chan {
                    Some(chan) => {
                        let _ = chan.send(resp);
                    }
                    None => debug!("response for a vanished connection {}", resp.conn_id),
                }
            }
        })
        .expect("spawning ipc response loop");
}

/// Reads requests off one client connection and writes back the matching
/// responses. On disconnect a `close` is synthesized so the connection's
/// sockets are reclaimed.
fn handle_connection(
    stream: UnixStream,
    id: String,
    requests: SyncSender<SyscallRequest>,
    responses: Receiver<SyscallResponse>,
) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            warn!("cloning ipc stream: {}", err);
            return;
        }
    };
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                debug!("{}: reading request: {}", id, err);
                break;
            }
        };

        let mut req: SyscallRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(err) => {
                warn!("{}: undecodable request: {}", id, err);
                continue;
            }
        };
        req.conn_id = id.clone();

        if requests.send(req).is_err() {
            return;
        }
        let resp = match responses.recv() {
            Ok(resp) => resp,
            Err(_) => return,
        };

        let mut encoded = match serde_json::to_vec(&resp) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!("{}: encoding response: {}", id, err);
                continue;
            }
        };
        encoded.push(b'\n');

        if writer.write_all(&encoded).is_err() {
            break;
        }
    }

    debug!("{}: disconnected, reclaiming sockets", id);
    let mut close = SyscallRequest::new(SyscallType::Close);
    close.conn_id = id;
    if requests.send(close).is_ok() {
        let _ = responses.recv();
    }
}
