//! Address allocation from per-queue CIDR pools.
//!
//! Each network queue is backed by one CIDR. Addresses are handed out in
//! ascending order, skipping the network and broadcast addresses and anything
//! the registry already holds. Allocation and registration happen in the same
//! step, so later calls within a run always observe earlier ones.

use super::registry::UsedAddressRegistry;
use crate::error::{ConfigError, InventoryError};
use ipnet::{IpAddrRange, IpNet};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Address pool of a single network queue.
#[derive(Debug, Clone)]
pub struct AddressPool {
    queue: String,
    network: IpNet,
    /// Addresses not yet examined, in ascending order
    remaining: IpAddrRange,
}

impl AddressPool {
    pub fn new(queue: &str, cidr: &str) -> Result<Self, ConfigError> {
        let network: IpNet = cidr
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidCidr {
                queue: queue.to_string(),
                cidr: cidr.to_string(),
            })?;
        // Normalise "172.29.236.7/22" to its network address
        let network = network.trunc();
        Ok(AddressPool {
            queue: queue.to_string(),
            network,
            remaining: network.hosts(),
        })
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn network(&self) -> IpNet {
        self.network
    }

    /// Dotted netmask for IPv4 pools, prefix length for IPv6 pools.
    pub fn netmask(&self) -> String {
        match self.network {
            IpNet::V4(net) => net.netmask().to_string(),
            IpNet::V6(net) => net.prefix_len().to_string(),
        }
    }

    pub fn contains(&self, address: &IpAddr) -> bool {
        self.network.contains(address)
    }

    /// Take the next free address and register it.
    ///
    /// Fails with `AddressPoolExhausted` once every address has been examined;
    /// a failed call registers nothing.
    pub fn allocate(&mut self, registry: &mut UsedAddressRegistry) -> Result<IpAddr, InventoryError> {
        for address in self.remaining.by_ref() {
            if registry.is_used(&self.queue, &address) {
                continue;
            }
            registry.register(&self.queue, address);
            log::debug!("Allocated {} from queue {}", address, self.queue);
            return Ok(address);
        }

        log::error!("Address pool for queue {} ({}) is exhausted", self.queue, self.network);
        Err(InventoryError::AddressPoolExhausted {
            queue: self.queue.clone(),
        })
    }
}

/// All address pools of a run, keyed by queue name.
#[derive(Debug, Clone, Default)]
pub struct AddressAllocator {
    pools: BTreeMap<String, AddressPool>,
}

impl AddressAllocator {
    /// Build one pool per `cidr_networks` entry.
    pub fn from_cidr_networks(cidr_networks: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let pools = cidr_networks
            .iter()
            .map(|(queue, cidr)| AddressPool::new(queue, cidr).map(|pool| (queue.clone(), pool)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(AddressAllocator { pools })
    }

    pub fn pool(&self, queue: &str) -> Option<&AddressPool> {
        self.pools.get(queue)
    }

    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    /// Allocate the next free address on `queue`.
    pub fn allocate(
        &mut self,
        queue: &str,
        registry: &mut UsedAddressRegistry,
    ) -> Result<IpAddr, InventoryError> {
        let pool = self
            .pools
            .get_mut(queue)
            .ok_or_else(|| ConfigError::UnknownQueue {
                queue: queue.to_string(),
            })?;
        pool.allocate(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_allocates_ascending_and_skips_network_address() {
        let mut registry = UsedAddressRegistry::new();
        let mut pool = AddressPool::new("container", "10.0.0.0/29").unwrap();

        assert_eq!(pool.allocate(&mut registry).unwrap(), addr("10.0.0.1"));
        assert_eq!(pool.allocate(&mut registry).unwrap(), addr("10.0.0.2"));
        assert!(registry.is_used("container", &addr("10.0.0.1")));
        assert_eq!(pool.netmask(), "255.255.255.248");
    }

    #[test]
    fn test_skips_registered_and_reserved_addresses() {
        let mut registry = UsedAddressRegistry::new();
        registry.register("container", addr("10.0.0.1"));
        registry.reserve(addr("10.0.0.2"));
        registry.register("storage", addr("10.0.0.3"));

        let mut pool = AddressPool::new("container", "10.0.0.0/29").unwrap();
        assert_eq!(pool.allocate(&mut registry).unwrap(), addr("10.0.0.3"));
    }

    #[test]
    fn test_exhaustion_reports_queue_and_registers_nothing() {
        let mut registry = UsedAddressRegistry::new();
        // /30 has exactly two usable host addresses
        let mut pool = AddressPool::new("test", "10.0.0.0/30").unwrap();
        pool.allocate(&mut registry).unwrap();
        pool.allocate(&mut registry).unwrap();
        assert_eq!(registry.queue_len("test"), 2);

        let err = pool.allocate(&mut registry).unwrap_err();
        assert!(matches!(
            &err,
            InventoryError::AddressPoolExhausted { queue } if queue == "test"
        ));
        assert_eq!(
            err.to_string(),
            "Cannot retrieve requested amount of IP addresses. \
             Increase the test range in your user_config.yml."
        );
        assert_eq!(registry.queue_len("test"), 2);
    }

    #[test]
    fn test_fully_reserved_pool_is_exhausted() {
        let mut registry = UsedAddressRegistry::new();
        registry
            .reserve_used_ips(&["10.0.0.1,10.0.0.6".to_string()])
            .unwrap();
        let mut pool = AddressPool::new("container", "10.0.0.0/29").unwrap();
        assert!(pool.allocate(&mut registry).is_err());
        assert_eq!(registry.queue_len("container"), 0);
    }

    #[test]
    fn test_invalid_cidr() {
        let err = AddressPool::new("storage", "172.29.244.0/99").unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidCidr {
                queue: "storage".to_string(),
                cidr: "172.29.244.0/99".to_string(),
            }
        );
    }

    #[test]
    fn test_allocator_routes_by_queue() {
        let mut cidrs = BTreeMap::new();
        cidrs.insert("container".to_string(), "172.29.236.0/22".to_string());
        cidrs.insert("storage".to_string(), "172.29.244.0/22".to_string());
        let mut allocator = AddressAllocator::from_cidr_networks(&cidrs).unwrap();
        let mut registry = UsedAddressRegistry::new();

        assert_eq!(
            allocator.allocate("storage", &mut registry).unwrap(),
            addr("172.29.244.1")
        );
        assert_eq!(
            allocator.allocate("container", &mut registry).unwrap(),
            addr("172.29.236.1")
        );
        assert!(matches!(
            allocator.allocate("tunnel", &mut registry),
            Err(InventoryError::Config(ConfigError::UnknownQueue { .. }))
        ));
        assert_eq!(allocator.queues().collect::<Vec<_>>(), vec!["container", "storage"]);
    }
}
