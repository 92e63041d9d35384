//! The ping scenario: an echo request to the stack's IP earns one echo
//! reply with an identical payload and a correct checksum.

extern crate rustnet;

mod context;

use rustnet::core::check::internet_checksum;
use rustnet::core::repr::{
    eth_types,
    ArpOp,
    Icmpv4Message,
    Icmpv4Repr,
    Ipv4Protocol,
};

use context::*;

#[test]
fn echo_request_earns_an_echo_reply() {
    let stack = TestStack::new();

    let body = b"abcdefghijklmnopqrstuvwabcdefghi";
    let request = Icmpv4Repr {
        message: Icmpv4Message::EchoRequest { id: 0x77, seq: 1 },
    };
    stack.inject_frame(ipv4_frame(Ipv4Protocol::Icmpv4, &request.emit(&body[..])));

    // The stack has never heard from the host, so the reply is parked
    // behind an ARP exchange.
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

    // The parked reply drains out once the translation lands.
    let frame = stack.recv_frame();
    let (eth, packet) = parse_eth(&frame);
    assert_eq!(eth_types::IPV4, eth.payload_type);
    assert_eq!(host_mac(), eth.dst_addr);

    let (ip, icmp_packet) = parse_ipv4(packet);
    assert_eq!(Ipv4Protocol::Icmpv4, ip.protocol);
    assert_eq!(stack_ip(), ip.src_addr);
    assert_eq!(host_ip(), ip.dst_addr);

    let reply = Icmpv4Repr::deserialize(icmp_packet).unwrap();
    assert_eq!(
        Icmpv4Message::EchoReply { id: 0x77, seq: 1 },
        reply.message
    );
    assert_eq!(&body[..], &icmp_packet[Icmpv4Repr::HEADER_LEN ..]);
    assert_eq!(0, internet_checksum(icmp_packet));
}
