//! The arping scenario: a host on the segment asks who has the stack's
//! IP and gets exactly one unicast reply pairing it with the stack's MAC.

extern crate rustnet;

mod context;

use std::time::Duration;

use rustnet::core::repr::{
    eth_types,
    ArpOp,
    ArpRepr,
    EthernetAddress,
};

use context::*;

#[test]
fn arp_request_earns_a_unicast_reply() {
    let stack = TestStack::new();

    stack.inject_frame(arp_frame(
        ArpOp::Request,
        host_mac(),
        host_ip(),
        EthernetAddress::BROADCAST,
        stack_ip(),
    ));

    let frame = stack.recv_frame();
    let (eth, payload) = parse_eth(&frame);

    assert_eq!(host_mac(), eth.dst_addr);
    assert_eq!(stack_mac(), eth.src_addr);
    assert_eq!(eth_types::ARP, eth.payload_type);

    let arp = ArpRepr::deserialize(payload).unwrap();
    assert_eq!(ArpOp::Reply, arp.op);
    assert_eq!(stack_ip(), arp.source_proto_addr);
    assert_eq!(stack_mac(), arp.source_hw_addr);
    assert_eq!(host_ip(), arp.target_proto_addr);
    assert_eq!(host_mac(), arp.target_hw_addr);

    // Exactly one reply.
    assert!(stack.wire.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn arp_request_for_another_ip_is_ignored() {
    let stack = TestStack::new();

    stack.inject_frame(arp_frame(
        ArpOp::Request,
        host_mac(),
        host_ip(),
        EthernetAddress::BROADCAST,
        host_ip(),
    ));

    assert!(stack.wire.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn arp_with_unsupported_hw_type_is_dropped() {
    let stack = TestStack::new();

    let mut packet = ArpRepr {
        op: ArpOp::Request,
        source_hw_addr: host_mac(),
        source_proto_addr: host_ip(),
        target_hw_addr: EthernetAddress::BROADCAST,
        target_proto_addr: stack_ip(),
    }
    .to_bytes();
    packet[1] = 0x02; // not Ethernet

    stack.inject_frame(eth_frame(
        EthernetAddress::BROADCAST,
        host_mac(),
        eth_types::ARP,
        &packet,
    ));

    assert!(stack.wire.recv_timeout(Duration::from_millis(200)).is_err());
}
