//! One round trip over the real IPC surface: a client process image
//! (the api module) talking JSON frames to a served stack.

extern crate rustnet;

mod context;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rustnet::api::Client;
use rustnet::core::repr::{
    ArpOp,
    EthernetAddress,
};
use rustnet::core::socket::{
    SocketAddr,
    SocketType,
};
use rustnet::core::stack::{
    self,
    StackConfig,
};
use rustnet::ipc;

use context::*;

#[test]
fn client_writes_a_datagram_through_the_served_stack() {
    let (dev, inject, wire) = scripted_device();
    let stack = Arc::new(stack::init(dev, &StackConfig::default()));

    let path = format!("/tmp/rustnet-test-{:08x}.sock", rand_suffix());
    {
        let stack = Arc::clone(&stack);
        let path = path.clone();
        thread::Builder::new()
            .name("ipc-server".to_string())
            .spawn(move || {
                ipc::serve(&stack, &path).expect("serving ipc");
            })
            .unwrap();
    }

    let client = attach_with_retry(&path);

    // Teach the stack the host's MAC up front so the write resolves
    // without a concurrent ARP dance.
    inject.send(arp_frame(
        ArpOp::Request,
        host_mac(),
        host_ip(),
        EthernetAddress::BROADCAST,
        stack_ip(),
    ))
    .unwrap();
    let reply = wire.recv_timeout(RECV_TIMEOUT).expect("arp reply");
    assert_eq!(ArpOp::Reply, parse_arp_op(&reply));

    let sock = client.socket(SocketType::Datagram).unwrap();
    let written = client
        .write_to(
            &sock,
            b"Hello World\n",
            SocketAddr::from_ipv4(host_ip(), 8845),
        )
        .unwrap();

    let frame = wire.recv_timeout(RECV_TIMEOUT).expect("udp frame");
    assert_eq!(frame.len(), written);

    let (_, packet) = parse_eth(&frame);
    let (_, datagram) = parse_ipv4(packet);
    assert_eq!(&b"Hello World\n"[..], &datagram[8 ..]);

    client.close(&sock).unwrap();
}

fn rand_suffix() -> u32 {
    // Distinct per test process; the nanosecond clock is plenty.
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos()
}

fn attach_with_retry(path: &str) -> Client {
    for _ in 0 .. 50 {
        if let Ok(client) = Client::attach(path) {
            return client;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("ipc server never came up at {}", path);
}

fn parse_arp_op(frame: &[u8]) -> ArpOp {
    use rustnet::core::repr::ArpRepr;

    let (_, payload) = parse_eth(frame);
    ArpRepr::deserialize(payload).unwrap().op
}
