//! Wires devices, layers, protocols, routing, and the socket layer into
//! a running stack.

use std::sync::Arc;

use crate::core::dev::{
    Device,
    Loopback,
};
use crate::core::iface::{
    IfAddr,
    Interface,
};
use crate::core::layer::{
    start_protocol,
    Layer,
    Protocol,
    ProtocolCore,
};
use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
    Ipv4Cidr,
};
use crate::core::routing::RoutingTable;
use crate::core::service::arp::ArpProtocol;
use crate::core::service::ethernet::EthernetProtocol;
use crate::core::service::icmpv4::Icmpv4;
use crate::core::service::ipv4::Ipv4Protocol;
use crate::core::service::ipv6::Ipv6Protocol;
use crate::core::service::neighbor::NeighborSubsystem;
use crate::core::service::tcp::TcpProtocol;
use crate::core::service::udp::UdpProtocol;
use crate::core::socket::SocketLayer;

lazy_static! {
    /// Default TAP interface IPv4 address.
    pub static ref DEFAULT_IPV4_ADDR: Ipv4Address = Ipv4Address::new([10, 88, 45, 69]);

    /// Default TAP interface netmask.
    pub static ref DEFAULT_NETMASK: Ipv4Address = Ipv4Address::new([255, 255, 255, 0]);

    /// Default gateway for packets leaving the TAP subnet.
    pub static ref DEFAULT_GATEWAY: Ipv4Address = Ipv4Address::new([10, 88, 45, 1]);

    /// Default TAP interface MAC address.
    pub static ref DEFAULT_ETH_ADDR: EthernetAddress =
        EthernetAddress::new([0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xAD]);
}

/// Interface parameters the stack is brought up with.
#[derive(Clone, Debug)]
pub struct StackConfig {
    pub iface_name: String,
    pub addr: IfAddr,
    pub hw_addr: EthernetAddress,
    pub mtu: usize,
}

impl Default for StackConfig {
    fn default() -> StackConfig {
        StackConfig {
            iface_name: "tap0".to_string(),
            addr: IfAddr {
                ip: *DEFAULT_IPV4_ADDR,
                netmask: *DEFAULT_NETMASK,
                gateway: *DEFAULT_GATEWAY,
            },
            hw_addr: *DEFAULT_ETH_ADDR,
            mtu: 1500,
        }
    }
}

/// A running stack: every loop is spawned, and syscalls flow through the
/// socket layer's mailboxes.
pub struct Stack {
    pub socket_layer: Arc<SocketLayer>,
    pub routing: Arc<RoutingTable>,
    pub tap_iface: Arc<Interface>,
    pub loopback_iface: Arc<Interface>,
}

/// Brings the stack up over a wire-side device. The device is usually
/// the TAP; tests substitute a scripted one.
pub fn init(wire_dev: Arc<dyn Device>, config: &StackConfig) -> Stack {
    // Layers first; their mailboxes are the fixed points everything else
    // hooks into.
    let link = Layer::new("link");
    let network = Layer::new("network");
    let transport = Layer::new("transport");
    let socket = Layer::new("socket");

    // Interfaces.
    let tap_iface = Interface::new(
        &config.iface_name,
        config.hw_addr,
        config.mtu,
        vec![config.addr],
    );

    let loopback_dev = Arc::new(Loopback::new());
    let loopback_iface = Interface::new(
        "lo",
        EthernetAddress::new([0; 6]),
        loopback_dev.max_transmission_unit(),
        vec![IfAddr {
            ip: Ipv4Address::new([127, 0, 0, 1]),
            netmask: Ipv4Address::new([255, 0, 0, 0]),
            gateway: Ipv4Address::UNSPECIFIED,
        }],
    );

    // Routing.
    let routing = Arc::new(RoutingTable::new());
    routing.add_connected_routes(&tap_iface);
    routing.add_connected_routes(&loopback_iface);
    routing.set_default_route(
        Ipv4Cidr::new(Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED),
        config.addr.gateway,
        &tap_iface,
    );

    // The link layer: Ethernet plus the neighbor subsystem it leans on.
    let arp = ArpProtocol::new(ProtocolCore::new(None, Some(link.tx_chan())));
    arp.start_cleanup();
    let neighbor = NeighborSubsystem::new(Arc::clone(&arp));
    let ethernet = Arc::new(EthernetProtocol::new(
        ProtocolCore::new(Some(network.rx_chan()), None),
        neighbor,
    ));

    // The network layer: IPv4 with ICMP at its side, and the v6 stub.
    let icmp = Icmpv4::new(network.tx_chan());
    let ipv4 = Arc::new(Ipv4Protocol::new(
        ProtocolCore::new(Some(transport.rx_chan()), Some(link.tx_chan())),
        icmp,
    ));
    let ipv6 = Arc::new(Ipv6Protocol);

    // The transport layer. Both protocols lift into the socket layer's
    // receive mailbox and emit through the network layer.
    let tcp = TcpProtocol::new(ProtocolCore::new(
        Some(socket.rx_chan()),
        Some(network.tx_chan()),
    ));
    let udp = Arc::new(UdpProtocol::new(ProtocolCore::new(
        Some(socket.rx_chan()),
        Some(network.tx_chan()),
    )));

    // The socket layer owns the dispatch layer the transports feed.
    let socket_layer = SocketLayer::new(
        socket,
        Arc::clone(&routing),
        transport.tx_chan(),
        Arc::clone(&tcp),
    );
    socket_layer.start();

    // Dispatchers.
    link.start(vec![start_protocol(ethernet)]);
    network.start(vec![
        start_protocol(ipv4),
        start_protocol(ipv6 as Arc<dyn Protocol>),
    ]);
    transport.start(vec![
        start_protocol(tcp as Arc<dyn Protocol>),
        start_protocol(udp),
    ]);

    // Finally the wire loops.
    tap_iface.start(wire_dev, link.rx_chan());
    loopback_iface.start(loopback_dev, link.rx_chan());

    Stack {
        socket_layer,
        routing,
        tap_iface,
        loopback_iface,
    }
}
