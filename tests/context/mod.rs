//! Shared harness: a scripted wire device so the whole pipeline runs
//! in-process, plus frame builders for the host side of each exchange.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::mpsc::{
    sync_channel,
    Receiver,
    SyncSender,
};
use std::time::Duration;

use rustnet::Result;
use rustnet::core::dev::Device;
use rustnet::core::repr::{
    eth_types,
    ArpOp,
    ArpRepr,
    EthernetAddress,
    EthernetRepr,
    Ipv4Address,
    Ipv4Protocol,
    Ipv4Repr,
    TcpRepr,
    UdpRepr,
};
use rustnet::core::socket::{
    SyscallRequest,
    SyscallResponse,
};
use rustnet::core::stack::{
    self,
    Stack,
    StackConfig,
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// The host on the far side of the scripted wire.
pub fn host_mac() -> EthernetAddress {
    EthernetAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01])
}

/// `LOCAL_IP` overrides the host address, mirroring how the stack is
/// exercised against a live peer.
pub fn host_ip() -> Ipv4Address {
    std::env::var("LOCAL_IP")
        .ok()
        .and_then(|ip| ip.parse().ok())
        .unwrap_or_else(|| Ipv4Address::new([10, 88, 45, 1]))
}

pub fn stack_mac() -> EthernetAddress {
    *stack::DEFAULT_ETH_ADDR
}

pub fn stack_ip() -> Ipv4Address {
    *stack::DEFAULT_IPV4_ADDR
}

/// A wire whose far end is the test: frames the test injects come back
/// from `recv`, frames the stack sends land on a channel the test reads.
pub struct ScriptedDevice {
    rx: Mutex<Receiver<Vec<u8>>>,
    tx: SyncSender<Vec<u8>>,
}

impl Device for ScriptedDevice {
    fn send(&self, buffer: &[u8]) -> Result<()> {
        let _ = self.tx.send(buffer.to_vec());
        Ok(())
    }

    fn recv(&self, buffer: &mut [u8]) -> Result<usize> {
        let frame = self
            .rx
            .lock()
            .unwrap()
            .recv()
            .map_err(|_| rustnet::Error::Dropped)?;
        let len = frame.len().min(buffer.len());
        buffer[.. len].copy_from_slice(&frame[.. len]);
        Ok(len)
    }

    fn max_transmission_unit(&self) -> usize {
        1500
    }
}

/// Builds the device plus the test-side frame channels.
pub fn scripted_device() -> (Arc<ScriptedDevice>, SyncSender<Vec<u8>>, Receiver<Vec<u8>>) {
    let (inject, rx) = sync_channel(128);
    let (tx, wire) = sync_channel(128);

    (
        Arc::new(ScriptedDevice {
            rx: Mutex::new(rx),
            tx,
        }),
        inject,
        wire,
    )
}

/// A full stack on a scripted wire, with direct access to the syscall
/// mailboxes.
pub struct TestStack {
    pub stack: Arc<Stack>,
    pub inject: SyncSender<Vec<u8>>,
    pub wire: Receiver<Vec<u8>>,
    syscalls: SyncSender<SyscallRequest>,
    responses: Receiver<SyscallResponse>,
}

impl TestStack {
    pub fn new() -> TestStack {
        let (dev, inject, wire) = scripted_device();
        let stack = Arc::new(stack::init(dev, &StackConfig::default()));
        let syscalls = stack.socket_layer.syscall_chan();
        let responses = stack.socket_layer.take_responses();

        TestStack {
            stack,
            inject,
            wire,
            syscalls,
            responses,
        }
    }

    /// Issues a syscall and waits for its response. Only for calls whose
    /// packet exchanges are already satisfied.
    pub fn syscall(&self, req: SyscallRequest) -> SyscallResponse {
        self.send_syscall(req);
        self.recv_response()
    }

    /// Issues a syscall without waiting, for the blocking flows where the
    /// test must first play the host's part on the wire.
    pub fn send_syscall(&self, mut req: SyscallRequest) {
        req.conn_id = "test-conn".to_string();
        self.syscalls.send(req).unwrap();
    }

    pub fn recv_response(&self) -> SyscallResponse {
        self.responses
            .recv_timeout(RECV_TIMEOUT)
            .expect("syscall response")
    }

    pub fn inject_frame(&self, frame: Vec<u8>) {
        self.inject.send(frame).unwrap();
    }

    pub fn recv_frame(&self) -> Vec<u8> {
        self.wire.recv_timeout(RECV_TIMEOUT).expect("wire frame")
    }

    /// Teaches the stack the host's MAC by playing an ARP request for the
    /// stack's IP, and consumes the reply it earns.
    pub fn warm_arp(&self) {
        self.inject_frame(arp_frame(
            ArpOp::Request,
            host_mac(),
            host_ip(),
            EthernetAddress::BROADCAST,
            stack_ip(),
        ));

        let reply = self.recv_frame();
        let (eth, payload) = parse_eth(&reply);
        assert_eq!(eth_types::ARP, eth.payload_type);
        let arp = ArpRepr::deserialize(payload).unwrap();
        assert_eq!(ArpOp::Reply, arp.op);
    }
}

pub fn eth_frame(dst: EthernetAddress, src: EthernetAddress, payload_type: u16, payload: &[u8]) -> Vec<u8> {
    let repr = EthernetRepr {
        dst_addr: dst,
        src_addr: src,
        payload_type,
    };

    let mut frame = vec![0; EthernetRepr::HEADER_LEN + payload.len()];
    repr.serialize(&mut frame[.. EthernetRepr::HEADER_LEN]).unwrap();
    frame[EthernetRepr::HEADER_LEN ..].copy_from_slice(payload);
    frame
}

pub fn arp_frame(
    op: ArpOp,
    source_hw: EthernetAddress,
    source_ip: Ipv4Address,
    target_hw: EthernetAddress,
    target_ip: Ipv4Address,
) -> Vec<u8> {
    let repr = ArpRepr {
        op,
        source_hw_addr: source_hw,
        source_proto_addr: source_ip,
        target_hw_addr: target_hw,
        target_proto_addr: target_ip,
    };

    let dst = if op == ArpOp::Request {
        EthernetAddress::BROADCAST
    } else {
        stack_mac()
    };
    eth_frame(dst, source_hw, eth_types::ARP, &repr.to_bytes())
}

/// An IPv4 packet from the host to the stack, framed for the wire.
pub fn ipv4_frame(protocol: Ipv4Protocol, payload: &[u8]) -> Vec<u8> {
    let repr = Ipv4Repr {
        total_length: (Ipv4Repr::HEADER_LEN + payload.len()) as u16,
        identification: 0,
        ttl: 64,
        protocol,
        src_addr: host_ip(),
        dst_addr: stack_ip(),
    };

    let mut packet = vec![0; Ipv4Repr::HEADER_LEN + payload.len()];
    repr.serialize(&mut packet[.. Ipv4Repr::HEADER_LEN]).unwrap();
    packet[Ipv4Repr::HEADER_LEN ..].copy_from_slice(payload);

    eth_frame(stack_mac(), host_mac(), eth_types::IPV4, &packet)
}

/// A UDP datagram from the host to the stack, framed for the wire.
pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let repr = UdpRepr {
        src_port,
        dst_port,
        length: (UdpRepr::HEADER_LEN + payload.len()) as u16,
    };

    let mut datagram = repr.emit(host_ip(), stack_ip(), payload);
    datagram.extend_from_slice(payload);
    ipv4_frame(Ipv4Protocol::Udp, &datagram)
}

/// A TCP segment from the host to the stack, framed for the wire.
pub fn tcp_frame(header: &TcpRepr, payload: &[u8]) -> Vec<u8> {
    let mut segment = header.emit(host_ip(), stack_ip(), payload);
    segment.extend_from_slice(payload);
    ipv4_frame(Ipv4Protocol::Tcp, &segment)
}

pub fn parse_eth(frame: &[u8]) -> (EthernetRepr, &[u8]) {
    let repr = EthernetRepr::deserialize(frame).unwrap();
    (repr, &frame[EthernetRepr::HEADER_LEN ..])
}

pub fn parse_ipv4(packet: &[u8]) -> (Ipv4Repr, &[u8]) {
    let repr = Ipv4Repr::deserialize(packet).unwrap();
    (repr, &packet[Ipv4Repr::HEADER_LEN ..])
}

pub fn parse_tcp(segment: &[u8]) -> (TcpRepr, &[u8]) {
    let repr = TcpRepr::deserialize(segment).unwrap();
    (repr, &segment[repr.header_len() ..])
}
