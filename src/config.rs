//! Typed user configuration.
//!
//! The user configuration is a YAML mapping with a handful of well-known
//! sections (`cidr_networks`, `used_ips`, `global_overrides`) and any number
//! of host groups, recognised by the `_hosts` suffix of their key. Host
//! groups keep the order in which they were declared, since the address
//! consistency checks report conflicts relative to that order.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Suffix identifying host-group sections in the user configuration.
pub const HOST_GROUP_SUFFIX: &str = "_hosts";

/// Queue names accepted as the container/management network, in order of preference.
pub const MANAGEMENT_QUEUES: [&str; 2] = ["container", "management"];

/// Top-level user configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserConfig {
    /// Queue name -> CIDR string
    pub cidr_networks: Option<BTreeMap<String, String>>,
    /// Addresses that must never be allocated ("a.b.c.d" or "start,end")
    pub used_ips: Vec<String>,
    /// Global variables, including the provider network list
    pub global_overrides: Option<GlobalOverrides>,
    /// Host groups in declaration order
    pub host_groups: Vec<HostGroup>,
}

impl UserConfig {
    /// Build a typed configuration from a parsed YAML document.
    pub fn from_value(value: serde_yaml::Value) -> Result<Self, serde_yaml::Error> {
        let mapping = match value {
            serde_yaml::Value::Mapping(mapping) => mapping,
            serde_yaml::Value::Null => return Ok(UserConfig::default()),
            other => {
                return Err(serde_yaml::Error::custom(format!(
                    "user configuration must be a mapping, found {:?}",
                    other
                )))
            }
        };

        let mut config = UserConfig::default();
        for (key, value) in mapping {
            let key = match key {
                serde_yaml::Value::String(key) => key,
                other => {
                    return Err(serde_yaml::Error::custom(format!(
                        "user configuration keys must be strings, found {:?}",
                        other
                    )))
                }
            };

            match key.as_str() {
                "cidr_networks" => config.cidr_networks = serde_yaml::from_value(value)?,
                "used_ips" => {
                    config.used_ips = serde_yaml::from_value::<Option<Vec<String>>>(value)?
                        .unwrap_or_default()
                }
                "global_overrides" => config.global_overrides = serde_yaml::from_value(value)?,
                name if name.ends_with(HOST_GROUP_SUFFIX) => {
                    config.host_groups.push(HostGroup::from_value(name, value)?);
                }
                other => log::debug!("Ignoring unrecognised user config section {}", other),
            }
        }

        Ok(config)
    }

    /// Look up a host group by name.
    pub fn host_group(&self, name: &str) -> Option<&HostGroup> {
        self.host_groups.iter().find(|group| group.name == name)
    }

    /// Queue name of the container/management network, if one is declared.
    pub fn management_queue(&self) -> Option<&'static str> {
        let cidrs = self.cidr_networks.as_ref()?;
        MANAGEMENT_QUEUES
            .iter()
            .copied()
            .find(|queue| cidrs.contains_key(*queue))
    }

    /// Provider networks declared under `global_overrides`, or an empty slice.
    pub fn provider_networks(&self) -> &[ProviderNetworkEntry] {
        self.global_overrides
            .as_ref()
            .and_then(|overrides| overrides.provider_networks.as_deref())
            .unwrap_or(&[])
    }
}

/// A named group of physical hosts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostGroup {
    pub name: String,
    pub hosts: Vec<(String, HostConfig)>,
}

impl HostGroup {
    fn from_value(name: &str, value: serde_yaml::Value) -> Result<Self, serde_yaml::Error> {
        let mut group = HostGroup {
            name: name.to_string(),
            hosts: Vec::new(),
        };

        let mapping = match value {
            serde_yaml::Value::Null => return Ok(group),
            serde_yaml::Value::Mapping(mapping) => mapping,
            other => {
                return Err(serde_yaml::Error::custom(format!(
                    "host group {} must be a mapping of host names, found {:?}",
                    name, other
                )))
            }
        };

        for (host, settings) in mapping {
            let host = match host {
                serde_yaml::Value::String(host) => host,
                other => {
                    return Err(serde_yaml::Error::custom(format!(
                        "host names in {} must be strings, found {:?}",
                        name, other
                    )))
                }
            };
            let settings = match settings {
                serde_yaml::Value::Null => HostConfig::default(),
                settings => serde_yaml::from_value(settings)?,
            };
            group.hosts.push((host, settings));
        }

        Ok(group)
    }

    /// Settings of a single host in this group.
    pub fn host(&self, name: &str) -> Option<&HostConfig> {
        self.hosts
            .iter()
            .find(|(host, _)| host == name)
            .map(|(_, settings)| settings)
    }

    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(|(host, _)| host.as_str())
    }
}

/// Per-host settings inside a host group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Explicit address of the physical host
    #[serde(default)]
    pub ip: Option<String>,
    /// Container group -> number of containers to place on this host
    #[serde(default)]
    pub affinity: BTreeMap<String, u32>,
    /// Variables applied to the physical host
    #[serde(default)]
    pub host_vars: BTreeMap<String, Value>,
    /// Variables applied to every container placed on this host
    #[serde(default)]
    pub container_vars: BTreeMap<String, Value>,
}

/// The `global_overrides` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_networks: Option<Vec<ProviderNetworkEntry>>,
    /// Bridge used to reach hosts for administration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_bridge: Option<String>,
    /// Every other global variable
    #[serde(flatten)]
    pub vars: BTreeMap<String, Value>,
}

impl GlobalOverrides {
    /// All overrides as inventory variables.
    pub fn to_vars(&self) -> Result<BTreeMap<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(BTreeMap::new()),
        }
    }
}

/// A provider network list item, `{ network: {...} }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderNetworkEntry {
    pub network: ProviderNetwork,
}

/// A provider network binding a queue to bridges, interfaces and host groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderNetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_from_q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_bridge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_type: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub net_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_mtu: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_binds: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_routes: Option<Vec<StaticRouteSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ssh_address: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_container_address: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProviderNetwork {
    /// Key of this network inside a host's `container_networks`.
    ///
    /// Derived from the queue name, falling back to the interface for
    /// networks that do not draw addresses from a pool.
    pub fn address_key(&self) -> Option<String> {
        self.ip_from_q
            .as_deref()
            .or(self.container_interface.as_deref())
            .map(|name| format!("{}_address", name))
    }

    pub fn flag(&self, flag: NetworkFlag) -> Option<bool> {
        match flag {
            NetworkFlag::SshAddress => self.is_ssh_address,
            NetworkFlag::ContainerAddress => self.is_container_address,
        }
    }

    pub fn flag_mut(&mut self, flag: NetworkFlag) -> &mut Option<bool> {
        match flag {
            NetworkFlag::SshAddress => &mut self.is_ssh_address,
            NetworkFlag::ContainerAddress => &mut self.is_container_address,
        }
    }

    pub fn is_flagged(&self, flag: NetworkFlag) -> bool {
        self.flag(flag).unwrap_or(false)
    }
}

/// Boolean markers set on provider networks by the address search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFlag {
    /// The network carries the address used for SSH access
    SshAddress,
    /// The network carries the host's primary container address
    ContainerAddress,
}

impl NetworkFlag {
    pub fn key(&self) -> &'static str {
        match self {
            NetworkFlag::SshAddress => "is_ssh_address",
            NetworkFlag::ContainerAddress => "is_container_address",
        }
    }
}

/// A static route as written by the user; both fields may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRouteSpec {
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
cidr_networks:
  container: 172.29.236.0/22
  storage: 172.29.244.0/22
used_ips:
  - "172.29.236.1,172.29.236.50"
global_overrides:
  internal_lb_vip_address: 172.29.236.100
  management_bridge: br-mgmt
  provider_networks:
    - network:
        container_bridge: br-mgmt
        container_interface: eth1
        ip_from_q: container
        type: raw
        group_binds:
          - all_containers
          - hosts
shared-infra_hosts:
  aio1:
    ip: 172.29.236.100
compute_hosts:
  aio1:
    ip: 172.29.236.100
  aio2:
log_hosts:
"#;

    fn parse(yaml: &str) -> UserConfig {
        UserConfig::from_value(serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_host_groups_keep_declaration_order() {
        let config = parse(CONFIG);
        let names: Vec<&str> = config.host_groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["shared-infra_hosts", "compute_hosts", "log_hosts"]);

        let compute = config.host_group("compute_hosts").unwrap();
        assert_eq!(compute.host_names().collect::<Vec<_>>(), vec!["aio1", "aio2"]);
        assert_eq!(compute.host("aio2"), Some(&HostConfig::default()));
        assert!(config.host_group("log_hosts").unwrap().hosts.is_empty());
    }

    #[test]
    fn test_management_queue_preference() {
        let config = parse(CONFIG);
        assert_eq!(config.management_queue(), Some("container"));

        let config = parse("cidr_networks:\n  management: 10.0.0.0/24\n");
        assert_eq!(config.management_queue(), Some("management"));

        let config = parse("cidr_networks:\n  storage: 10.0.0.0/24\n");
        assert_eq!(config.management_queue(), None);
    }

    #[test]
    fn test_global_overrides_round_trip_into_vars() {
        let config = parse(CONFIG);
        let vars = config.global_overrides.as_ref().unwrap().to_vars().unwrap();
        assert_eq!(vars["internal_lb_vip_address"], Value::from("172.29.236.100"));
        assert_eq!(vars["management_bridge"], Value::from("br-mgmt"));
        assert!(vars["provider_networks"].is_array());
        assert_eq!(config.provider_networks().len(), 1);
    }

    #[test]
    fn test_address_key() {
        let config = parse(CONFIG);
        let network = &config.provider_networks()[0].network;
        assert_eq!(network.address_key().as_deref(), Some("container_address"));

        let raw = ProviderNetwork {
            container_interface: Some("eth12".to_string()),
            ..Default::default()
        };
        assert_eq!(raw.address_key().as_deref(), Some("eth12_address"));
        assert_eq!(ProviderNetwork::default().address_key(), None);
    }

    #[test]
    fn test_non_mapping_host_group_is_rejected() {
        let value = serde_yaml::from_str("infra_hosts: [a, b]\n").unwrap();
        assert!(UserConfig::from_value(value).is_err());
    }
}
