use std::collections::HashMap;
use std::time::{
    Duration,
    Instant,
};

use crate::core::repr::{
    EthernetAddress,
    Ipv4Address,
};
use crate::core::time::{
    Env,
    SystemEnv,
};

struct Entry {
    eth_addr: EthernetAddress,
    in_cache_since: Instant,
}

/// Seconds before an IPv4 to Ethernet translation expires.
pub const ARP_ENTRY_TIMEOUT_SECS: u64 = 5;

/// Maintains an expiring set of IPv4 -> Ethernet address translations.
///
/// Any inbound ARP packet refreshes the sender's entry; a later mapping
/// for the same IP overwrites the earlier one.
pub struct ArpCache<T = SystemEnv>
where
    T: Env,
{
    entries: HashMap<Ipv4Address, Entry>,
    expiration: Duration,
    time_env: T,
}

impl ArpCache<SystemEnv> {
    /// Creates an ARP cache with the stack's default expiration.
    pub fn new() -> ArpCache<SystemEnv> {
        ArpCache::with_env(ARP_ENTRY_TIMEOUT_SECS, SystemEnv::new())
    }
}

impl<T: Env> ArpCache<T> {
    /// Creates an ARP cache where translations expire after
    /// expiration_in_secs seconds.
    pub fn with_env(expiration_in_secs: u64, time_env: T) -> ArpCache<T> {
        ArpCache {
            entries: HashMap::new(),
            expiration: Duration::from_secs(expiration_in_secs),
            time_env,
        }
    }

    /// Looks up the Ethernet address for an IPv4 address.
    pub fn eth_addr_for_ip(&mut self, ipv4_addr: Ipv4Address) -> Option<EthernetAddress> {
        self.cleanup();
        self.entries.get(&ipv4_addr).map(|entry| entry.eth_addr)
    }

    /// Creates or updates the Ethernet address translation for an IPv4
    /// address.
    pub fn set_eth_addr_for_ip(&mut self, ipv4_addr: Ipv4Address, eth_addr: EthernetAddress) {
        let in_cache_since = self.time_env.now_instant();
        self.entries.insert(
            ipv4_addr,
            Entry {
                eth_addr,
                in_cache_since,
            },
        );
    }

    /// Purges translations that have expired.
    pub fn cleanup(&mut self) {
        let now = self.time_env.now_instant();
        let expiration = self.expiration;
        self.entries
            .retain(|_, entry| now.duration_since(entry.in_cache_since) <= expiration);
    }

    #[cfg(test)]
    fn time_env(&mut self) -> &mut T {
        &mut self.time_env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::MockEnv;

    fn arp_cache() -> ArpCache<MockEnv> {
        ArpCache::with_env(5, MockEnv::new())
    }

    fn ipv4(i: u8) -> Ipv4Address {
        Ipv4Address::new([0, 0, 0, i])
    }

    fn eth(i: u8) -> EthernetAddress {
        EthernetAddress::new([0, 0, 0, 0, 0, i])
    }

    #[test]
    fn test_lookup_ip_with_no_translation() {
        let mut arp_cache = arp_cache();
        assert_matches!(arp_cache.eth_addr_for_ip(ipv4(0)), None);
    }

    #[test]
    fn test_lookup_ip_with_translation() {
        let mut arp_cache = arp_cache();

        arp_cache.set_eth_addr_for_ip(ipv4(0), eth(0));
        assert_eq!(arp_cache.eth_addr_for_ip(ipv4(0)).unwrap(), eth(0));

        arp_cache.time_env().now += Duration::from_secs(5);
        assert_eq!(arp_cache.eth_addr_for_ip(ipv4(0)).unwrap(), eth(0));
    }

    #[test]
    fn test_lookup_ip_after_expiring() {
        let mut arp_cache = arp_cache();

        arp_cache.set_eth_addr_for_ip(ipv4(0), eth(0));
        arp_cache.time_env().now += Duration::from_secs(6);
        assert_matches!(arp_cache.eth_addr_for_ip(ipv4(0)), None);
    }

    #[test]
    fn test_second_translation_overwrites_first() {
        let mut arp_cache = arp_cache();

        arp_cache.set_eth_addr_for_ip(ipv4(0), eth(0));
        arp_cache.set_eth_addr_for_ip(ipv4(0), eth(1));
        assert_eq!(arp_cache.eth_addr_for_ip(ipv4(0)).unwrap(), eth(1));
    }

    #[test]
    fn test_update_pushes_back_expiration() {
        let mut arp_cache = arp_cache();

        arp_cache.set_eth_addr_for_ip(ipv4(0), eth(0));
        arp_cache.time_env().now += Duration::from_secs(3);
        arp_cache.set_eth_addr_for_ip(ipv4(0), eth(0));
        arp_cache.time_env().now += Duration::from_secs(3);
        assert_eq!(arp_cache.eth_addr_for_ip(ipv4(0)).unwrap(), eth(0));

        arp_cache.time_env().now += Duration::from_secs(3);
        assert_matches!(arp_cache.eth_addr_for_ip(ipv4(0)), None);
    }
}
