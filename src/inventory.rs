//! Inventory data structures.
//!
//! The serialized inventory is a JSON object whose keys are group names,
//! each holding `{ "hosts": [...], "vars": {...} }` (plus `children` when the
//! group has sub-groups), and one `_meta` key holding the per-host variables:
//!
//! ```json
//! {
//!   "all": { "hosts": [], "vars": { "container_cidr": "172.29.236.0/22" } },
//!   "galera_container": { "hosts": ["aio1_galera_container-1f2e3d4c"], "vars": {} },
//!   "_meta": { "hostvars": { "aio1_galera_container-1f2e3d4c": { "...": "..." } } }
//! }
//! ```
//!
//! Host variables are typed for the keys the rest of the deployment depends
//! on and keep every other key verbatim, so hand-edited inventories survive
//! a round trip.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Key under which per-host variables are stored.
pub const META_KEY: &str = "_meta";

/// Root group every inventory carries.
pub const ALL_GROUP: &str = "all";

/// Host variables every host must carry, even when empty.
pub const REQUIRED_HOSTVARS: [&str; 8] = [
    "properties",
    "ansible_ssh_host",
    "physical_host_group",
    "container_address",
    "container_name",
    "container_networks",
    "physical_host",
    "component",
];

/// Complete inventory: groups plus `_meta.hostvars`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "InventoryDocument", into = "InventoryDocument")]
pub struct Inventory {
    pub groups: BTreeMap<String, Group>,
    pub hostvars: BTreeMap<String, HostVars>,
}

#[derive(Serialize, Deserialize)]
struct InventoryDocument {
    #[serde(rename = "_meta", default)]
    meta: Meta,
    #[serde(flatten)]
    groups: BTreeMap<String, Group>,
}

#[derive(Default, Serialize, Deserialize)]
struct Meta {
    #[serde(default, deserialize_with = "null_as_default")]
    hostvars: BTreeMap<String, HostVars>,
}

impl From<InventoryDocument> for Inventory {
    fn from(document: InventoryDocument) -> Self {
        Inventory {
            groups: document.groups,
            hostvars: document.meta.hostvars,
        }
    }
}

impl From<Inventory> for InventoryDocument {
    fn from(inventory: Inventory) -> Self {
        InventoryDocument {
            meta: Meta {
                hostvars: inventory.hostvars,
            },
            groups: inventory.groups,
        }
    }
}

impl Inventory {
    /// Get a group, creating it when missing.
    pub fn ensure_group(&mut self, name: &str) -> &mut Group {
        self.groups.entry(name.to_string()).or_default()
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Get a host's variables, creating an empty set when missing.
    pub fn host_vars_mut(&mut self, host: &str) -> &mut HostVars {
        self.hostvars.entry(host.to_string()).or_default()
    }

    /// All hosts reachable from `group`: its own hosts first, then the hosts
    /// of each child group depth-first. Each host appears once.
    pub fn hosts_in(&self, group: &str) -> Vec<String> {
        let mut hosts = Vec::new();
        let mut seen_hosts = HashSet::new();
        let mut seen_groups = HashSet::new();
        self.collect_hosts(group, &mut hosts, &mut seen_hosts, &mut seen_groups);
        hosts
    }

    fn collect_hosts<'a>(
        &'a self,
        group: &'a str,
        hosts: &mut Vec<String>,
        seen_hosts: &mut HashSet<&'a str>,
        seen_groups: &mut HashSet<&'a str>,
    ) {
        if !seen_groups.insert(group) {
            return;
        }
        let Some(entry) = self.groups.get(group) else {
            return;
        };
        for host in &entry.hosts {
            if seen_hosts.insert(host.as_str()) {
                hosts.push(host.clone());
            }
        }
        for child in &entry.children {
            self.collect_hosts(child, hosts, seen_hosts, seen_groups);
        }
    }

    /// Drop a host from every group and from `_meta.hostvars`.
    pub fn remove_host(&mut self, host: &str) {
        for group in self.groups.values_mut() {
            group.hosts.retain(|existing| existing != host);
        }
        self.hostvars.remove(host);
    }

    /// Whether any group lists `host` directly.
    pub fn is_grouped(&self, host: &str) -> bool {
        self.groups.values().any(|group| group.has_host(host))
    }

    /// Number of hosts listed in `_meta.hostvars`.
    pub fn host_count(&self) -> usize {
        self.hostvars.len()
    }
}

/// An inventory group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(default, deserialize_with = "null_as_default")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub vars: BTreeMap<String, Value>,
}

impl Group {
    /// Add a host unless already present. Returns true when added.
    pub fn add_host(&mut self, host: &str) -> bool {
        push_unique(&mut self.hosts, host)
    }

    /// Add a child group unless already present. Returns true when added.
    pub fn add_child(&mut self, child: &str) -> bool {
        push_unique(&mut self.children, child)
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    if list.iter().any(|existing| existing == item) {
        false
    } else {
        list.push(item.to_string());
        true
    }
}

/// Variables of a single host under `_meta.hostvars`.
///
/// The required keys are always serialized, as `null` when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostVars {
    #[serde(default)]
    pub properties: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub ansible_ssh_host: Option<String>,
    #[serde(default)]
    pub physical_host_group: Option<String>,
    #[serde(default)]
    pub container_address: Option<String>,
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub container_networks: BTreeMap<String, NetworkEntry>,
    #[serde(default)]
    pub physical_host: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_metal: Option<bool>,
    /// Keys of `extra` that were last set from `host_vars`/`container_vars`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub config_var_keys: BTreeSet<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl HostVars {
    pub fn is_metal(&self) -> bool {
        self.is_metal.unwrap_or(false)
    }

    /// Set a variable by name, routing well-known keys to their typed field.
    pub fn set_var(&mut self, key: &str, value: Value) -> Result<(), serde_json::Error> {
        match key {
            "properties" => self.properties = serde_json::from_value(value)?,
            "ansible_ssh_host" => self.ansible_ssh_host = serde_json::from_value(value)?,
            "physical_host_group" => self.physical_host_group = serde_json::from_value(value)?,
            "container_address" => self.container_address = serde_json::from_value(value)?,
            "container_name" => self.container_name = serde_json::from_value(value)?,
            "container_networks" => {
                self.container_networks =
                    serde_json::from_value::<Option<_>>(value)?.unwrap_or_default()
            }
            "physical_host" => self.physical_host = serde_json::from_value(value)?,
            "component" => self.component = serde_json::from_value(value)?,
            "is_metal" => self.is_metal = serde_json::from_value(value)?,
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Set a variable coming from the user configuration.
    ///
    /// Untyped keys are remembered so [`HostVars::clear_config_vars`] can
    /// drop them once the configuration no longer sets them.
    pub fn set_config_var(&mut self, key: &str, value: Value) -> Result<(), serde_json::Error> {
        self.set_var(key, value)?;
        if self.extra.contains_key(key) {
            self.config_var_keys.insert(key.to_string());
        }
        Ok(())
    }

    /// Drop every variable set by an earlier run from the user configuration.
    /// Hand-edited keys stay.
    pub fn clear_config_vars(&mut self) {
        for key in std::mem::take(&mut self.config_var_keys) {
            self.extra.remove(&key);
        }
    }
}

/// A host's attachment to one provider network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub net_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_routes: Option<Vec<StaticRoute>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A fully specified static route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub cidr: String,
    pub gateway: String,
}

/// Treat an explicit `null` the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_host_vars_serialize_required_keys() {
        let value = serde_json::to_value(HostVars::default()).unwrap();
        let object = value.as_object().unwrap();
        for key in REQUIRED_HOSTVARS {
            assert!(object.contains_key(key), "missing required key {}", key);
        }
        assert!(object["container_networks"].is_object());
        assert!(!object.contains_key("is_metal"));
        assert!(!object.contains_key("config_var_keys"));
    }

    #[test]
    fn test_document_layout() {
        let mut inventory = Inventory::default();
        inventory.ensure_group(ALL_GROUP);
        inventory.ensure_group("hosts").add_host("aio1");
        inventory.host_vars_mut("aio1").container_name = Some("aio1".to_string());

        let value = serde_json::to_value(&inventory).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["_meta", "all", "hosts"]);
        assert_eq!(object["hosts"]["hosts"], serde_json::json!(["aio1"]));
        assert!(object["all"]["vars"].is_object());
        assert!(object["hosts"].get("children").is_none());
        assert_eq!(
            object["_meta"]["hostvars"]["aio1"]["container_name"],
            Value::from("aio1")
        );

        let parsed: Inventory = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, inventory);
    }

    #[test]
    fn test_hand_edited_nulls_are_healed_on_load() {
        let raw = serde_json::json!({
            "hosts": { "hosts": null },
            "_meta": { "hostvars": {
                "aio1": { "container_networks": null, "custom": 7 }
            }}
        });
        let inventory: Inventory = serde_json::from_value(raw).unwrap();
        assert!(inventory.groups["hosts"].hosts.is_empty());
        let vars = &inventory.hostvars["aio1"];
        assert!(vars.container_networks.is_empty());
        assert_eq!(vars.extra["custom"], Value::from(7));
    }

    #[test]
    fn test_set_var_routes_typed_keys() {
        let mut vars = HostVars::default();
        vars.set_var("container_name", Value::from("custom")).unwrap();
        vars.set_var("rack", Value::from("r12")).unwrap();
        assert_eq!(vars.container_name.as_deref(), Some("custom"));
        assert_eq!(vars.extra["rack"], Value::from("r12"));
        assert!(!vars.extra.contains_key("container_name"));

        assert!(vars.set_var("container_name", Value::from(3)).is_err());
        assert_eq!(vars.container_name.as_deref(), Some("custom"));
    }

    #[test]
    fn test_config_vars_are_cleared_but_hand_edits_stay() {
        let raw = serde_json::json!({ "custom": 7, "rack": "r12", "config_var_keys": ["rack"] });
        let mut vars: HostVars = serde_json::from_value(raw).unwrap();
        assert!(!vars.extra.contains_key("config_var_keys"));

        vars.set_config_var("container_name", Value::from("c1")).unwrap();
        vars.set_config_var("zone", Value::from("z1")).unwrap();
        assert_eq!(
            vars.config_var_keys.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["rack", "zone"]
        );

        vars.clear_config_vars();
        assert!(vars.config_var_keys.is_empty());
        assert!(!vars.extra.contains_key("rack"));
        assert!(!vars.extra.contains_key("zone"));
        assert_eq!(vars.extra["custom"], Value::from(7));
        assert_eq!(vars.container_name.as_deref(), Some("c1"));
    }

    #[test]
    fn test_hosts_in_walks_children_once() {
        let mut inventory = Inventory::default();
        inventory.ensure_group("all_containers").add_child("infra_containers");
        inventory.ensure_group("all_containers").add_host("c0");
        inventory.ensure_group("infra_containers").add_child("aio1-host_containers");
        inventory.ensure_group("infra_containers").add_child("aio1-host_containers");
        inventory.ensure_group("aio1-host_containers").add_host("c1");
        inventory.ensure_group("aio1-host_containers").add_host("c0");

        assert_eq!(inventory.hosts_in("all_containers"), vec!["c0", "c1"]);
        assert!(inventory.hosts_in("missing").is_empty());
        assert_eq!(inventory.groups["infra_containers"].children.len(), 1);
    }
}
