//! Configuration validation utilities.
//!
//! This module provides the structural checks run on the user configuration
//! before synthesis and the cross-entity address checks run on host groups
//! and on the synthesized inventory. Every check fails on the first
//! violation.

use crate::config::{HostGroup, ProviderNetwork, UserConfig};
use crate::error::{ConfigError, InventoryError};
use crate::inventory::{Inventory, StaticRoute};
use crate::ip::AddressAllocator;
use crate::utils::ip_utils::parse_address;
use std::collections::HashMap;

/// Validate the structure of the user configuration
///
/// Checks, in order:
/// - `cidr_networks` is present and non-empty
/// - a `container` or `management` pool is declared
/// - `global_overrides` is present
/// - `provider_networks` is present under `global_overrides`
/// - at least one provider network draws from the container/management pool
/// - every provider network queue has a pool in `cidr_networks`
/// - every static route has both `cidr` and `gateway`
/// - every pool is a valid CIDR
///
/// # Arguments
/// * `config` - The loaded user configuration
///
/// # Returns
/// * `Ok(AddressAllocator)` with one pool per `cidr_networks` entry
/// * `Err(InventoryError)` describing the first violation
pub fn check_config_settings(config: &UserConfig) -> Result<AddressAllocator, InventoryError> {
    let cidr_networks = match &config.cidr_networks {
        Some(cidrs) if !cidrs.is_empty() => cidrs,
        _ => return Err(ConfigError::MissingCidrNetworks.into()),
    };

    let management_queue = config
        .management_queue()
        .ok_or(ConfigError::MissingManagementNetwork)?;

    let overrides = config
        .global_overrides
        .as_ref()
        .ok_or(ConfigError::MissingGlobalOverrides)?;

    let provider_networks = overrides
        .provider_networks
        .as_ref()
        .ok_or(ConfigError::MissingProviderNetworks)?;

    if !provider_networks
        .iter()
        .any(|entry| entry.network.ip_from_q.as_deref() == Some(management_queue))
    {
        return Err(ConfigError::MissingManagementNetwork.into());
    }

    for entry in provider_networks {
        if let Some(queue) = entry.network.ip_from_q.as_deref() {
            if !cidr_networks.contains_key(queue) {
                return Err(ConfigError::UnknownQueue {
                    queue: queue.to_string(),
                }
                .into());
            }
        }
        resolve_static_routes(&entry.network)?;
    }

    let allocator = AddressAllocator::from_cidr_networks(cidr_networks)?;
    log::debug!(
        "User config checks passed: {} pools, {} provider networks",
        cidr_networks.len(),
        provider_networks.len()
    );
    Ok(allocator)
}

/// Resolve the static routes of a provider network
///
/// A route must carry both `cidr` and `gateway`; a route with either one
/// missing (or null) is rejected. Omitting `static_routes` is fine.
///
/// # Returns
/// * `Ok(None)` when the network declares no routes
/// * `Ok(Some(routes))` with every route fully specified
/// * `Err(InventoryError::MissingStaticRouteInfo)` naming the network's queue
pub fn resolve_static_routes(network: &ProviderNetwork) -> Result<Option<Vec<StaticRoute>>, InventoryError> {
    let Some(declared) = &network.static_routes else {
        return Ok(None);
    };
    if declared.is_empty() {
        return Ok(None);
    }

    declared
        .iter()
        .map(|route| match (route.cidr.as_deref(), route.gateway.as_deref()) {
            (Some(cidr), Some(gateway)) if !cidr.is_empty() && !gateway.is_empty() => Ok(StaticRoute {
                cidr: cidr.to_string(),
                gateway: gateway.to_string(),
            }),
            _ => Err(InventoryError::MissingStaticRouteInfo {
                queue: network
                    .ip_from_q
                    .clone()
                    .or_else(|| network.container_interface.clone())
                    .unwrap_or_default(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Check that explicit host addresses are valid and globally consistent
///
/// Runs the parse check, then [`check_same_ip_to_multiple_host`], then
/// [`check_multiple_ips_to_host`].
pub fn check_host_addresses(groups: &[HostGroup]) -> Result<(), InventoryError> {
    for group in groups {
        for (host, settings) in &group.hosts {
            if let Some(ip) = &settings.ip {
                parse_address(ip, &format!("host {} of {}", host, group.name))?;
            }
        }
    }
    check_same_ip_to_multiple_host(groups)?;
    check_multiple_ips_to_host(groups)?;
    Ok(())
}

/// Ensure no address is claimed by two different hosts
///
/// Host groups are scanned in declaration order; the first host seen with an
/// address owns it.
///
/// # Examples
/// ```
/// use dynamic_inventory::config::{HostConfig, HostGroup};
/// use dynamic_inventory::utils::validation::check_same_ip_to_multiple_host;
///
/// let host = |ip: &str| HostConfig { ip: Some(ip.to_string()), ..Default::default() };
/// let groups = vec![
///     HostGroup { name: "infra_hosts".into(), hosts: vec![("host1".into(), host("192.168.1.1"))] },
///     HostGroup { name: "compute_hosts".into(), hosts: vec![("host2".into(), host("192.168.1.1"))] },
/// ];
/// assert!(check_same_ip_to_multiple_host(&groups).is_err());
/// ```
pub fn check_same_ip_to_multiple_host(groups: &[HostGroup]) -> Result<bool, InventoryError> {
    let mut owners: HashMap<&str, &str> = HashMap::new();

    for group in groups {
        for (host, settings) in &group.hosts {
            let Some(ip) = settings.ip.as_deref().map(str::trim) else {
                continue;
            };
            match owners.get(ip) {
                Some(owner) if *owner != host.as_str() => {
                    return Err(InventoryError::MultipleHostsWithOneIp {
                        ip: ip.to_string(),
                        assigned_host: owner.to_string(),
                        new_host: host.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    owners.insert(ip, host.as_str());
                }
            }
        }
    }

    Ok(true)
}

/// Ensure no host is given two different addresses
///
/// Host groups are scanned in declaration order; the first address seen for
/// a host is its current address.
pub fn check_multiple_ips_to_host(groups: &[HostGroup]) -> Result<bool, InventoryError> {
    let mut addresses: HashMap<&str, &str> = HashMap::new();

    for group in groups {
        for (host, settings) in &group.hosts {
            let Some(ip) = settings.ip.as_deref().map(str::trim) else {
                continue;
            };
            match addresses.get(host.as_str()) {
                Some(current) if *current != ip => {
                    return Err(InventoryError::MultipleIpForHost {
                        hostname: host.clone(),
                        current_ip: current.to_string(),
                        new_ip: ip.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    addresses.insert(host.as_str(), ip);
                }
            }
        }
    }

    Ok(true)
}

/// Ensure the synthesized inventory holds every address on a network once
///
/// Hosts are scanned in name order, so the reported "assigned" host is the
/// alphabetically first holder.
pub fn check_inventory_addresses(inventory: &Inventory) -> Result<(), InventoryError> {
    let mut owners: HashMap<(&str, &str), &str> = HashMap::new();

    for (host, vars) in &inventory.hostvars {
        for (network, entry) in &vars.container_networks {
            let Some(address) = entry.address.as_deref() else {
                continue;
            };
            if let Some(owner) = owners.insert((network.as_str(), address), host.as_str()) {
                return Err(InventoryError::MultipleHostsWithOneIp {
                    ip: address.to_string(),
                    assigned_host: owner.to_string(),
                    new_host: host.clone(),
                });
            }
        }
    }

    Ok(())
}
