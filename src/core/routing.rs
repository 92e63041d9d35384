//! Destination based route selection.

use std::sync::Arc;
use std::sync::Mutex;

use crate::core::iface::Interface;
use crate::core::repr::{
    Ipv4Address,
    Ipv4Cidr,
};

/// A network/gateway/interface triple used to pick the outgoing interface
/// and next hop for a destination.
#[derive(Clone)]
pub struct Route {
    pub network: Ipv4Cidr,
    pub gateway: Ipv4Address,
    pub iface: Arc<Interface>,
    pub connected: bool,
    /// Filled in by lookup: the destination itself for connected routes,
    /// the gateway otherwise.
    pub next_hop: Ipv4Address,
}

/// An ordered first-match route table with a single default route.
pub struct RoutingTable {
    routes: Mutex<Vec<Route>>,
    default_route: Mutex<Option<Route>>,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable {
            routes: Mutex::new(Vec::new()),
            default_route: Mutex::new(None),
        }
    }

    /// Creates one connected route per address assigned to the interface.
    pub fn add_connected_routes(&self, iface: &Arc<Interface>) {
        let mut routes = self.routes.lock().unwrap();
        for addr in iface.addrs() {
            routes.push(Route {
                network: Ipv4Cidr::new(addr.ip, addr.netmask),
                gateway: addr.gateway,
                iface: Arc::clone(iface),
                connected: true,
                next_hop: addr.gateway,
            });
        }
    }

    /// Assigns the route used when no entry contains the destination.
    pub fn set_default_route(
        &self,
        network: Ipv4Cidr,
        gateway: Ipv4Address,
        iface: &Arc<Interface>,
    ) {
        *self.default_route.lock().unwrap() = Some(Route {
            network,
            gateway,
            iface: Arc::clone(iface),
            connected: false,
            next_hop: gateway,
        });
    }

    /// Returns the first route whose network contains the destination, or
    /// the default route if none does. For connected routes the next hop
    /// is the destination itself; otherwise it is the gateway.
    pub fn lookup(&self, destination: Ipv4Address) -> Option<Route> {
        let routes = self.routes.lock().unwrap();

        for route in routes.iter() {
            if route.network.contains(destination) {
                let mut route = route.clone();
                route.next_hop = if route.connected {
                    destination
                } else {
                    route.gateway
                };
                return Some(route);
            }
        }

        self.default_route.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iface::IfAddr;
    use crate::core::repr::EthernetAddress;

    fn iface() -> Arc<Interface> {
        Interface::new(
            "tap0",
            EthernetAddress::new([0xDE, 0xAD, 0xBE, 0xEF, 0xDE, 0xAD]),
            1500,
            vec![IfAddr {
                ip: Ipv4Address::new([10, 88, 45, 69]),
                netmask: Ipv4Address::new([255, 255, 255, 0]),
                gateway: Ipv4Address::new([10, 88, 45, 1]),
            }],
        )
    }

    #[test]
    fn test_lookup_with_no_routes() {
        let table = RoutingTable::new();
        assert!(table.lookup(Ipv4Address::new([10, 88, 45, 2])).is_none());
    }

    #[test]
    fn test_connected_route_next_hop_is_destination() {
        let table = RoutingTable::new();
        table.add_connected_routes(&iface());

        let destination = Ipv4Address::new([10, 88, 45, 2]);
        let route = table.lookup(destination).unwrap();
        assert!(route.connected);
        assert_eq!(destination, route.next_hop);
    }

    #[test]
    fn test_default_route_next_hop_is_gateway() {
        let table = RoutingTable::new();
        let iface = iface();
        table.add_connected_routes(&iface);

        let gateway = Ipv4Address::new([10, 88, 45, 1]);
        table.set_default_route(
            Ipv4Cidr::new(Ipv4Address::UNSPECIFIED, Ipv4Address::UNSPECIFIED),
            gateway,
            &iface,
        );

        let route = table.lookup(Ipv4Address::new([8, 8, 8, 8])).unwrap();
        assert!(!route.connected);
        assert_eq!(gateway, route.next_hop);
    }
}
