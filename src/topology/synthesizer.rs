//! Inventory synthesis.
//!
//! Expands the environment skeleton and the user host groups into concrete
//! group membership and host variables, then binds provider networks. The
//! inventory passed in may already hold the result of an earlier run;
//! synthesis reuses its container names and addresses and rebuilds
//! everything else: group membership, variables taken from the configuration
//! and network attachments. Running it twice on the same input changes
//! nothing.

use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;
use uuid::Uuid;

use crate::config::{GlobalOverrides, HostGroup, UserConfig};
use crate::error::{ConfigError, InventoryError};
use crate::inventory::{HostVars, Inventory, ALL_GROUP};
use crate::ip::{AddressAllocator, UsedAddressRegistry};
use crate::topology::networks::{bind_provider_networks, management_bridge, mark_management_networks};
use crate::topology::skeleton::{ContainerGroup, GroupNode, Skeleton};
use crate::utils::ip_utils::parse_address;

/// Explicit host addresses, first declaration wins.
pub fn explicit_host_ips(config: &UserConfig) -> Result<BTreeMap<String, IpAddr>, ConfigError> {
    let mut ips = BTreeMap::new();
    for group in &config.host_groups {
        for (host, settings) in &group.hosts {
            if let Some(ip) = &settings.ip {
                let address = parse_address(ip, &format!("host {} of {}", host, group.name))?;
                ips.entry(host.clone()).or_insert(address);
            }
        }
    }
    Ok(ips)
}

/// Build the address registry of one run.
///
/// `used_ips` and explicit host addresses are reserved on every queue before
/// the addresses of the seeded inventory are registered.
pub fn prepare_registry(config: &UserConfig, inventory: &Inventory) -> Result<UsedAddressRegistry, ConfigError> {
    let mut registry = UsedAddressRegistry::new();
    registry.reserve_used_ips(&config.used_ips)?;
    for address in explicit_host_ips(config)?.into_values() {
        registry.reserve(address);
    }
    registry.seed_from_inventory(inventory);
    Ok(registry)
}

/// Create every skeleton group and link it under its parents.
///
/// Host lists, child links and configuration-sourced host variables of a
/// seeded inventory are cleared first so they always reflect the current
/// configuration.
pub fn skel_setup(inventory: &mut Inventory, nodes: &[GroupNode]) {
    for group in inventory.groups.values_mut() {
        group.hosts.clear();
        group.children.clear();
    }
    for vars in inventory.hostvars.values_mut() {
        vars.clear_config_vars();
    }
    inventory.ensure_group(ALL_GROUP);
    for node in nodes {
        inventory.ensure_group(&node.name);
        for parent in &node.parents {
            inventory.ensure_group(parent).add_child(&node.name);
        }
    }
    debug!("Set up {} skeleton groups", nodes.len());
}

/// Rebuild `all.vars` from `global_overrides` plus `container_cidr`.
pub fn apply_global_vars(
    inventory: &mut Inventory,
    overrides: &GlobalOverrides,
    container_cidr: &str,
) -> Result<(), InventoryError> {
    let mut vars = overrides.to_vars().map_err(InventoryError::GlobalVars)?;
    vars.insert("container_cidr".to_string(), Value::from(container_cidr));
    inventory.ensure_group(ALL_GROUP).vars = vars;
    Ok(())
}

fn set_vars(vars: &mut HostVars, host: &str, values: &BTreeMap<String, Value>) -> Result<(), InventoryError> {
    for (key, value) in values {
        vars.set_config_var(key, value.clone())
            .map_err(|source| InventoryError::HostVar {
                host: host.to_string(),
                key: key.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Add the physical hosts of every user host group declared in `physical_skel`.
///
/// Returns the names of the hosts added.
pub fn add_physical_hosts(
    inventory: &mut Inventory,
    config: &UserConfig,
    skeleton: &Skeleton,
    explicit_ips: &BTreeMap<String, IpAddr>,
) -> Result<BTreeSet<String>, InventoryError> {
    let mut added = BTreeSet::new();

    for group in &config.host_groups {
        if !skeleton.physical_skel.contains_key(&group.name) {
            warn!("Host group {} is not part of the environment, skipping it", group.name);
            continue;
        }
        for (host, settings) in &group.hosts {
            inventory.ensure_group(&group.name).add_host(host);
            let first_seen = added.insert(host.clone());

            let vars = inventory.host_vars_mut(host);
            if first_seen {
                vars.physical_host_group = Some(group.name.clone());
            }
            vars.physical_host = Some(host.clone());
            vars.container_name = Some(host.clone());
            vars.is_metal = Some(true);
            if let Some(address) = explicit_ips.get(host) {
                vars.ansible_ssh_host = Some(address.to_string());
                vars.container_address = Some(address.to_string());
            }
            set_vars(vars, host, &settings.host_vars)?;
        }
    }

    info!("Added {} physical hosts", added.len());
    Ok(added)
}

/// Deterministic name of the `index`-th container of `container_group` on `host`.
pub fn container_name(host: &str, container_group: &str, index: u32) -> String {
    let seed = format!("{}:{}:{}", host, container_group, index);
    let suffix = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).simple().to_string();
    format!("{}_{}-{}", host, container_group, &suffix[..8])
}

/// Names of `count` containers of `container_group` on `host`.
///
/// Containers already present in the inventory for the host are kept;
/// missing ones get fresh deterministic names. The result is sorted.
pub fn ensure_container_names(
    inventory: &Inventory,
    host: &str,
    container_group: &str,
    count: u32,
) -> Vec<String> {
    let prefix = format!("{}_{}-", host, container_group);
    let mut names: Vec<String> = inventory
        .hostvars
        .iter()
        .filter(|(name, vars)| {
            name.starts_with(&prefix) && vars.physical_host.as_deref() == Some(host) && !vars.is_metal()
        })
        .map(|(name, _)| name.clone())
        .take(count as usize)
        .collect();

    let mut index = 0;
    while names.len() < count as usize {
        let candidate = container_name(host, container_group, index);
        index += 1;
        if names.contains(&candidate) || inventory.hostvars.contains_key(&candidate) {
            continue;
        }
        names.push(candidate);
    }
    names.sort();
    names
}

/// Place containers on the physical hosts of every container group.
///
/// Returns the `<host>-host_containers` groups created.
pub fn add_containers(
    inventory: &mut Inventory,
    config: &UserConfig,
    skeleton: &Skeleton,
) -> Result<BTreeSet<String>, InventoryError> {
    let mut host_groups = BTreeSet::new();
    let mut placed = 0usize;

    for (container_group, definition) in &skeleton.container_skel {
        for containers_group in &definition.belongs_to {
            let Some(hosts_group) = Skeleton::physical_group_for(containers_group) else {
                debug!("{} is not a containers group, nothing to place", containers_group);
                continue;
            };
            if !skeleton.physical_skel.contains_key(&hosts_group) {
                continue;
            }
            let Some(user_group) = config.host_group(&hosts_group) else {
                continue;
            };
            placed += place_on_group(
                inventory,
                container_group,
                definition,
                containers_group,
                user_group,
                &mut host_groups,
            )?;
        }
    }

    info!("Placed {} containers", placed);
    Ok(host_groups)
}

fn place_on_group(
    inventory: &mut Inventory,
    container_group: &str,
    definition: &ContainerGroup,
    containers_group: &str,
    user_group: &HostGroup,
    host_groups: &mut BTreeSet<String>,
) -> Result<usize, InventoryError> {
    let mut placed = 0;

    for (host, settings) in &user_group.hosts {
        let host_group = Skeleton::host_containers_group(host);
        inventory.ensure_group(&host_group);
        inventory.ensure_group(containers_group).add_child(&host_group);
        host_groups.insert(host_group.clone());

        let names = if definition.is_metal() {
            vec![host.clone()]
        } else {
            let count = settings.affinity.get(container_group).copied().unwrap_or(1);
            ensure_container_names(inventory, host, container_group, count)
        };

        for name in names {
            inventory.ensure_group(container_group).add_host(&name);
            for component in &definition.contains {
                inventory.ensure_group(component).add_host(&name);
            }
            inventory.ensure_group(&host_group).add_host(&name);

            let vars = inventory.host_vars_mut(&name);
            vars.component = Some(container_group.to_string());
            if name != *host {
                vars.physical_host = Some(host.clone());
                vars.physical_host_group = Some(user_group.name.clone());
                vars.container_name = Some(name.clone());
            }
            set_vars(vars, &name, &settings.container_vars)?;
            placed += 1;
        }
    }
    Ok(placed)
}

/// Drop groups that are no longer derived from the skeleton and hosts that
/// no group lists any more.
pub fn prune_stale_groups(inventory: &mut Inventory, keep: &BTreeSet<String>) {
    let stale: Vec<String> = inventory
        .groups
        .keys()
        .filter(|name| !keep.contains(*name))
        .cloned()
        .collect();
    for name in &stale {
        info!("Removing stale group {}", name);
        inventory.groups.remove(name);
    }

    let orphans: Vec<String> = inventory
        .hostvars
        .keys()
        .filter(|host| !inventory.is_grouped(host))
        .cloned()
        .collect();
    for host in &orphans {
        info!("Removing host {} which no longer belongs to any group", host);
        inventory.remove_host(host);
    }
}

/// Give every host the full set of required variables and copy the
/// container group properties onto its members.
pub fn ensure_inventory_uptodate(inventory: &mut Inventory, container_skel: &BTreeMap<String, ContainerGroup>) {
    for (host, vars) in inventory.hostvars.iter_mut() {
        if vars.container_name.is_none() {
            vars.container_name = Some(host.clone());
        }
    }

    for (container_group, definition) in container_skel {
        let Some(properties) = &definition.properties else {
            continue;
        };
        let hosts = match inventory.group(container_group) {
            Some(group) => group.hosts.clone(),
            None => continue,
        };
        for host in hosts {
            inventory.host_vars_mut(&host).properties = Some(properties.clone());
        }
    }
}

/// Synthesize the inventory for `config` and `skeleton`.
///
/// Steps run in a fixed order: group skeleton, global variables, physical
/// hosts, containers, pruning, provider networks, healing.
pub fn synthesize(
    inventory: &mut Inventory,
    skeleton: &Skeleton,
    config: &UserConfig,
    allocator: &mut AddressAllocator,
    registry: &mut UsedAddressRegistry,
) -> Result<(), InventoryError> {
    let nodes = skeleton.resolve()?;
    let management_queue = config
        .management_queue()
        .ok_or(ConfigError::MissingManagementNetwork)?;
    let overrides = config
        .global_overrides
        .as_ref()
        .ok_or(ConfigError::MissingGlobalOverrides)?;
    let explicit_ips = explicit_host_ips(config)?;

    let mut networks = config.provider_networks().to_vec();
    if let Some(bridge) = management_bridge(
        overrides.management_bridge.as_deref(),
        &networks,
        management_queue,
    ) {
        mark_management_networks(&mut networks, &bridge);
    } else {
        warn!("No management bridge found, hosts get no SSH address from provider networks");
    }
    let mut overrides = overrides.clone();
    overrides.provider_networks = Some(networks.clone());

    skel_setup(inventory, &nodes);

    let container_cidr = config
        .cidr_networks
        .as_ref()
        .and_then(|cidrs| cidrs.get(management_queue))
        .cloned()
        .unwrap_or_default();
    apply_global_vars(inventory, &overrides, &container_cidr)?;

    add_physical_hosts(inventory, config, skeleton, &explicit_ips)?;
    let host_groups = add_containers(inventory, config, skeleton)?;

    let mut keep = skeleton.group_names();
    keep.extend(host_groups);
    prune_stale_groups(inventory, &keep);

    bind_provider_networks(
        inventory,
        &networks,
        management_queue,
        &explicit_ips,
        allocator,
        registry,
    )?;

    ensure_inventory_uptodate(inventory, &skeleton.container_skel);

    let groups_with_hosts: HashSet<&str> = inventory
        .groups
        .iter()
        .filter(|(_, group)| !group.hosts.is_empty())
        .map(|(name, _)| name.as_str())
        .collect();
    info!(
        "Synthesized {} hosts across {} groups ({} populated)",
        inventory.host_count(),
        inventory.groups.len(),
        groups_with_hosts.len()
    );
    Ok(())
}
