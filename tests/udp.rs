//! The UDP scenarios: a socket writing through the stack puts exactly
//! the payload on the wire, and a bound socket reads exactly what the
//! wire delivers.

extern crate rustnet;

mod context;

use rustnet::core::check::internet_checksum_slices;
use rustnet::core::repr::{
    eth_types,
    ArpOp,
    Ipv4Protocol,
    Ipv4Repr,
    UdpRepr,
};
use rustnet::core::socket::{
    SocketAddr,
    SyscallRequest,
    SyscallType,
};

use context::*;

const PAYLOAD: &[u8] = b"Hello World\n";

fn create_socket(stack: &TestStack) -> String {
    let mut req = SyscallRequest::new(SyscallType::Socket);
    req.sock_type = 2;

    let resp = stack.syscall(req);
    assert!(resp.err_msg.is_empty(), "socket: {}", resp.err_msg);
    assert!(!resp.sock_id.is_empty());
    resp.sock_id
}

#[test]
fn write_to_puts_the_datagram_on_the_wire() {
    let stack = TestStack::new();
    let sock_id = create_socket(&stack);

    let mut req = SyscallRequest::new(SyscallType::WriteTo);
    req.sock_id = sock_id;
    req.addr = Some(SocketAddr::from_ipv4(host_ip(), 8845));
    req.data = PAYLOAD.to_vec();
    stack.send_syscall(req);

    // The destination MAC is unknown, so the datagram waits behind ARP.
    let frame = stack.recv_frame();
    let (eth, _) = parse_eth(&frame);
    assert_eq!(eth_types::ARP, eth.payload_type);

    stack.inject_frame(arp_frame(
        ArpOp::Reply,
        host_mac(),
        host_ip(),
        stack_mac(),
        stack_ip(),
    ));

    let frame = stack.recv_frame();
    let (eth, packet) = parse_eth(&frame);
    assert_eq!(eth_types::IPV4, eth.payload_type);
    assert_eq!(host_mac(), eth.dst_addr);
    assert_eq!(stack_mac(), eth.src_addr);

    let (ip, datagram) = parse_ipv4(packet);
    assert_eq!(Ipv4Protocol::Udp, ip.protocol);
    assert_eq!(stack_ip(), ip.src_addr);
    assert_eq!(host_ip(), ip.dst_addr);

    let udp = UdpRepr::deserialize(datagram).unwrap();
    assert_eq!(8845, udp.dst_port);
    assert_eq!(40000, udp.src_port);
    assert_eq!((UdpRepr::HEADER_LEN + PAYLOAD.len()) as u16, udp.length);
    assert_eq!(PAYLOAD, &datagram[UdpRepr::HEADER_LEN ..]);

    // The checksum holds over the pseudo header.
    let pseudo = Ipv4Repr::pseudo_header(ip.src_addr, ip.dst_addr, Ipv4Protocol::Udp, udp.length);
    assert_eq!(0, internet_checksum_slices(&[&pseudo[..], datagram]));

    // The originating syscall reports the frame the device wrote.
    let resp = stack.recv_response();
    assert!(resp.err_msg.is_empty(), "writeto: {}", resp.err_msg);
    assert_eq!(frame.len(), resp.bytes_written);
}

#[test]
fn bound_socket_reads_the_wire_datagram() {
    let stack = TestStack::new();
    let sock_id = create_socket(&stack);

    let mut req = SyscallRequest::new(SyscallType::Bind);
    req.sock_id = sock_id.clone();
    req.addr = Some(SocketAddr::parse("0.0.0.0:8845").unwrap());
    let resp = stack.syscall(req);
    assert!(resp.err_msg.is_empty(), "bind: {}", resp.err_msg);

    let mut req = SyscallRequest::new(SyscallType::Read);
    req.sock_id = sock_id;
    stack.send_syscall(req);

    stack.inject_frame(udp_frame(9999, 8845, PAYLOAD));

    let resp = stack.recv_response();
    assert!(resp.err_msg.is_empty(), "read: {}", resp.err_msg);
    assert_eq!(PAYLOAD.to_vec(), resp.data);
}

#[test]
fn bind_to_an_owned_port_fails() {
    let stack = TestStack::new();
    let first = create_socket(&stack);
    let second = create_socket(&stack);

    let mut req = SyscallRequest::new(SyscallType::Bind);
    req.sock_id = first;
    req.addr = Some(SocketAddr::parse("0.0.0.0:8845").unwrap());
    assert!(stack.syscall(req).err_msg.is_empty());

    let mut req = SyscallRequest::new(SyscallType::Bind);
    req.sock_id = second;
    req.addr = Some(SocketAddr::parse("0.0.0.0:8845").unwrap());
    assert_eq!("port already assigned", stack.syscall(req).err_msg);
}
