//! The stack daemon: attach to a TAP interface and serve socket
//! syscalls over the IPC socket.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rustnetd", about = "A user-space TCP/IP stack.")]
struct Args {
    /// TAP interface to attach to.
    #[arg(long, default_value = "tap0")]
    iface: String,

    /// Interface IPv4 address.
    #[arg(long)]
    ip: Option<String>,

    /// Interface netmask.
    #[arg(long)]
    netmask: Option<String>,

    /// Default gateway.
    #[arg(long)]
    gateway: Option<String>,

    /// UNIX socket path to serve syscalls on.
    #[arg(long, default_value = rustnet::ipc::DEFAULT_SOCKET_PATH)]
    sock: String,
}

#[cfg(target_os = "linux")]
fn main() {
    use std::process::exit;
    use std::sync::Arc;

    use rustnet::core::stack::{
        self,
        StackConfig,
    };
    use rustnet::ipc;
    use rustnet::linux::dev::Tap;

    env_logger::init();

    let args = Args::parse();

    let mut config = StackConfig::default();
    config.iface_name = args.iface.clone();
    if let Some(ip) = args.ip {
        config.addr.ip = ip.parse().expect("invalid --ip");
    }
    if let Some(netmask) = args.netmask {
        config.addr.netmask = netmask.parse().expect("invalid --netmask");
    }
    if let Some(gateway) = args.gateway {
        config.addr.gateway = gateway.parse().expect("invalid --gateway");
    }

    let tap = Arc::new(Tap::new(&args.iface));
    let stack = stack::init(tap, &config);

    if let Err(err) = ipc::serve(&stack, &args.sock) {
        eprintln!("serving ipc: {}", err);
        exit(1);
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    let _ = Args::parse();
    eprintln!("rustnetd needs a Linux TAP device");
    std::process::exit(1);
}
