//! Used address registry.
//!
//! Tracks every address already committed during one synthesis pass so the
//! allocator never hands out the same address twice. A registry is created
//! per run by the orchestrator and threaded through every allocation; it is
//! never shared between runs.

use crate::error::ConfigError;
use crate::inventory::Inventory;
use crate::utils::ip_utils::{parse_address, parse_used_ip_entry, AddressRange};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Per-run registry of addresses that must not be allocated again.
#[derive(Debug, Default)]
pub struct UsedAddressRegistry {
    /// Addresses committed on each network queue
    by_queue: HashMap<String, HashSet<IpAddr>>,
    /// Addresses reserved on every queue (explicit host ips)
    reserved: HashSet<IpAddr>,
    /// Ranges reserved on every queue (`used_ips`)
    reserved_ranges: Vec<AddressRange>,
}

impl UsedAddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `address` as committed on `queue`. Returns false if it was already recorded.
    pub fn register(&mut self, queue: &str, address: IpAddr) -> bool {
        self.by_queue
            .entry(queue.to_string())
            .or_default()
            .insert(address)
    }

    /// Reserve `address` on every queue.
    pub fn reserve(&mut self, address: IpAddr) {
        self.reserved.insert(address);
    }

    /// Reserve an inclusive range on every queue.
    pub fn reserve_range(&mut self, range: AddressRange) {
        self.reserved_ranges.push(range);
    }

    /// Whether `address` may not be handed out on `queue`.
    pub fn is_used(&self, queue: &str, address: &IpAddr) -> bool {
        self.reserved.contains(address)
            || self.reserved_ranges.iter().any(|range| range.contains(address))
            || self
                .by_queue
                .get(queue)
                .map_or(false, |used| used.contains(address))
    }

    /// Number of addresses committed on `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.by_queue.get(queue).map_or(0, HashSet::len)
    }

    /// Reserve every `used_ips` entry of the user configuration.
    pub fn reserve_used_ips(&mut self, used_ips: &[String]) -> Result<(), ConfigError> {
        for entry in used_ips {
            let range = parse_used_ip_entry(entry)?;
            log::debug!("Reserving {} - {} from used_ips", range.start, range.end);
            self.reserve_range(range);
        }
        Ok(())
    }

    /// Register every address already present in a seeded inventory.
    ///
    /// Network entries are keyed `<queue>_address`; entries whose key does not
    /// follow that form are reserved on every queue. Unparseable addresses are
    /// skipped with a warning since they can never collide with an allocation.
    pub fn seed_from_inventory(&mut self, inventory: &Inventory) {
        for (host, vars) in &inventory.hostvars {
            for (key, entry) in &vars.container_networks {
                let Some(raw) = entry.address.as_deref() else {
                    continue;
                };
                let address = match parse_address(raw, key) {
                    Ok(address) => address,
                    Err(err) => {
                        log::warn!("Ignoring address of {} on {}: {}", host, key, err);
                        continue;
                    }
                };
                match key.strip_suffix("_address") {
                    Some(queue) => {
                        self.register(queue, address);
                    }
                    None => self.reserve(address),
                }
            }
        }
        log::debug!(
            "Seeded address registry from {} existing hosts",
            inventory.host_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::NetworkEntry;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_register_is_per_queue() {
        let mut registry = UsedAddressRegistry::new();
        assert!(registry.register("container", addr("10.0.0.2")));
        assert!(!registry.register("container", addr("10.0.0.2")));

        assert!(registry.is_used("container", &addr("10.0.0.2")));
        assert!(!registry.is_used("storage", &addr("10.0.0.2")));
        assert_eq!(registry.queue_len("container"), 1);
        assert_eq!(registry.queue_len("storage"), 0);
    }

    #[test]
    fn test_reservations_apply_to_every_queue() {
        let mut registry = UsedAddressRegistry::new();
        registry.reserve(addr("10.0.0.9"));
        registry
            .reserve_used_ips(&["10.0.1.1,10.0.1.3".to_string()])
            .unwrap();

        for queue in ["container", "storage"] {
            assert!(registry.is_used(queue, &addr("10.0.0.9")));
            assert!(registry.is_used(queue, &addr("10.0.1.2")));
            assert!(!registry.is_used(queue, &addr("10.0.1.4")));
        }
    }

    #[test]
    fn test_reserve_used_ips_rejects_garbage() {
        let mut registry = UsedAddressRegistry::new();
        assert!(registry.reserve_used_ips(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_seed_from_inventory() {
        let mut inventory = Inventory::default();
        let vars = inventory.host_vars_mut("c1");
        vars.container_networks.insert(
            "container_address".to_string(),
            NetworkEntry {
                address: Some("172.29.236.20".to_string()),
                ..Default::default()
            },
        );
        vars.container_networks.insert(
            "legacy".to_string(),
            NetworkEntry {
                address: Some("172.29.240.7".to_string()),
                ..Default::default()
            },
        );
        vars.container_networks.insert(
            "storage_address".to_string(),
            NetworkEntry {
                address: Some("not-an-ip".to_string()),
                ..Default::default()
            },
        );

        let mut registry = UsedAddressRegistry::new();
        registry.seed_from_inventory(&inventory);

        assert!(registry.is_used("container", &addr("172.29.236.20")));
        assert!(!registry.is_used("storage", &addr("172.29.236.20")));
        assert!(registry.is_used("tunnel", &addr("172.29.240.7")));
        assert_eq!(registry.queue_len("storage"), 0);
    }
}
