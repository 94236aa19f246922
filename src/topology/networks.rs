//! Provider network binding.
//!
//! Every provider network is bound to the hosts reachable through its
//! `group_binds` groups. Each bound host gets one entry in its
//! `container_networks`, keyed `<queue>_address`, holding the bridge and
//! interface settings of the network and an address from the queue's pool.
//!
//! Binding order is fixed so allocation is reproducible: provider networks
//! in declaration order, then `group_binds` in declaration order, then the
//! hosts of each group (own hosts first, then child groups depth-first),
//! then ascending pool order inside the allocator.
//!
//! Entries for networks that no longer bind a host are dropped after binding.

use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::config::{NetworkFlag, ProviderNetwork, ProviderNetworkEntry};
use crate::error::InventoryError;
use crate::inventory::{Inventory, NetworkEntry};
use crate::ip::{AddressAllocator, UsedAddressRegistry};
use crate::utils::validation::resolve_static_routes;

/// Mark every network on `bridge` that does not carry `flag` yet.
///
/// Networks already carrying the flag keep their value, including an
/// explicit `false`. Order is preserved and repeated calls change nothing.
pub fn net_address_search(networks: &mut [ProviderNetworkEntry], bridge: &str, flag: NetworkFlag) {
    for entry in networks.iter_mut() {
        let network = &mut entry.network;
        if network.container_bridge.as_deref() != Some(bridge) {
            continue;
        }
        let value = network.flag_mut(flag);
        if value.is_none() {
            debug!("Marking network on {} with {}", bridge, flag.key());
            *value = Some(true);
        }
    }
}

/// Mark the management bridge as carrying both the SSH and container address.
pub fn mark_management_networks(networks: &mut [ProviderNetworkEntry], bridge: &str) {
    net_address_search(networks, bridge, NetworkFlag::SshAddress);
    net_address_search(networks, bridge, NetworkFlag::ContainerAddress);
}

/// Bridge of the management network.
///
/// An explicit `management_bridge` wins; otherwise the bridge of the first
/// provider network drawing from the management queue.
pub fn management_bridge(
    explicit: Option<&str>,
    networks: &[ProviderNetworkEntry],
    management_queue: &str,
) -> Option<String> {
    explicit.map(str::to_string).or_else(|| {
        networks
            .iter()
            .find(|entry| entry.network.ip_from_q.as_deref() == Some(management_queue))
            .and_then(|entry| entry.network.container_bridge.clone())
    })
}

/// Bind every provider network to the hosts of its `group_binds` groups.
///
/// # Arguments
///
/// * `inventory` - Inventory whose groups are already populated
/// * `networks` - Provider networks with address-search flags applied
/// * `management_queue` - Queue of the container/management network
/// * `explicit_ips` - Explicit host addresses from the user configuration
/// * `allocator` - Address pools of this run
/// * `registry` - Addresses already committed in this run
///
/// # Returns
///
/// * `Ok(())` once every bound host carries an entry for every network and
///   no host keeps an entry for a network that did not bind it
/// * `Err(InventoryError)` when a pool runs dry or a route is incomplete
pub fn bind_provider_networks(
    inventory: &mut Inventory,
    networks: &[ProviderNetworkEntry],
    management_queue: &str,
    explicit_ips: &BTreeMap<String, IpAddr>,
    allocator: &mut AddressAllocator,
    registry: &mut UsedAddressRegistry,
) -> Result<(), InventoryError> {
    let mut bound_keys: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for entry in networks {
        let network = &entry.network;
        let Some(key) = network.address_key() else {
            warn!("Skipping provider network without ip_from_q or container_interface");
            continue;
        };
        let static_routes = resolve_static_routes(network)?;

        let mut bound = 0usize;
        for group in &network.group_binds {
            let hosts = inventory.hosts_in(group);
            if hosts.is_empty() {
                debug!("Group {} bound to {} has no hosts", group, key);
            }
            for host in hosts {
                let explicit = explicit_ips
                    .get(&host)
                    .copied()
                    .filter(|_| network.ip_from_q.as_deref() == Some(management_queue));
                let address = resolve_address(
                    inventory, &host, &key, network, explicit, allocator, registry,
                )?;

                let vars = inventory.host_vars_mut(&host);
                let netmask = network
                    .ip_from_q
                    .as_deref()
                    .and_then(|queue| allocator.pool(queue))
                    .map(|pool| pool.netmask());
                let entry = vars.container_networks.entry(key.clone()).or_default();
                entry.address = address.map(|addr| addr.to_string());
                entry.bridge = network.container_bridge.clone();
                entry.interface = network.container_interface.clone();
                entry.netmask = netmask;
                entry.net_type = network.net_type.clone();
                entry.mtu = network.container_mtu.clone();
                entry.static_routes = static_routes.clone();

                if let Some(address) = address {
                    if !explicit_ips.contains_key(&host) {
                        if network.is_flagged(NetworkFlag::SshAddress) {
                            vars.ansible_ssh_host = Some(address.to_string());
                        }
                        if network.is_flagged(NetworkFlag::ContainerAddress) {
                            vars.container_address = Some(address.to_string());
                        }
                    }
                }
                bound_keys.entry(host).or_default().insert(key.clone());
                bound += 1;
            }
        }
        info!("Bound {} to {} hosts", key, bound);
    }

    drop_unbound_networks(inventory, &bound_keys);
    Ok(())
}

fn drop_unbound_networks(inventory: &mut Inventory, bound_keys: &BTreeMap<String, BTreeSet<String>>) {
    for (host, vars) in inventory.hostvars.iter_mut() {
        let keys = bound_keys.get(host);
        vars.container_networks.retain(|key, _| {
            let keep = keys.map_or(false, |keys| keys.contains(key));
            if !keep {
                info!("Removing {} from {}, no provider network binds it", key, host);
            }
            keep
        });
    }
}

/// Address of `host` on one network.
///
/// An explicit host address on the management queue wins, then an address
/// kept from the seeded inventory, then a fresh allocation. Networks without
/// a queue carry no address.
fn resolve_address(
    inventory: &Inventory,
    host: &str,
    key: &str,
    network: &ProviderNetwork,
    explicit: Option<IpAddr>,
    allocator: &mut AddressAllocator,
    registry: &mut UsedAddressRegistry,
) -> Result<Option<IpAddr>, InventoryError> {
    let Some(queue) = network.ip_from_q.as_deref() else {
        return Ok(None);
    };

    if let Some(address) = explicit {
        registry.register(queue, address);
        return Ok(Some(address));
    }

    if let Some(existing) = existing_address(inventory, host, key) {
        match existing.parse::<IpAddr>() {
            Ok(address) if allocator.pool(queue).map_or(true, |pool| pool.contains(&address)) => {
                registry.register(queue, address);
                return Ok(Some(address));
            }
            _ => warn!(
                "Address {} of {} is outside the {} pool, allocating a new one",
                existing, host, queue
            ),
        }
    }

    allocator.allocate(queue, registry).map(Some)
}

fn existing_address<'a>(inventory: &'a Inventory, host: &str, key: &str) -> Option<&'a str> {
    inventory
        .hostvars
        .get(host)
        .and_then(|vars| vars.container_networks.get(key))
        .and_then(|entry: &NetworkEntry| entry.address.as_deref())
}
