//! Environment skeleton.
//!
//! The skeleton describes which groups exist and how they nest. It has three
//! parts:
//!
//! - `component_skel`: services, each belonging to aggregate groups
//!   (`galera` belongs to `galera_all`)
//! - `container_skel`: container groups, placed under `<type>_containers`
//!   groups and containing components (`galera_container` contains `galera`)
//! - `physical_skel`: groups of physical hosts and their container groups
//!   (`shared-infra_hosts` belongs to `hosts`)
//!
//! Every `belongs_to` edge points from a group to a parent. The parents form
//! a directed graph that is resolved once, parents before children, before
//! any inventory is touched.

use crate::error::ConfigError;
use crate::inventory::ALL_GROUP;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Suffix of groups that hold the containers of a host type.
pub const CONTAINERS_SUFFIX: &str = "_containers";

/// Suffix of groups that hold physical hosts.
pub const HOSTS_SUFFIX: &str = "_hosts";

/// The full environment skeleton, merged from every `env.d` fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    #[serde(default)]
    pub component_skel: BTreeMap<String, SkeletonGroup>,
    #[serde(default)]
    pub container_skel: BTreeMap<String, ContainerGroup>,
    #[serde(default)]
    pub physical_skel: BTreeMap<String, SkeletonGroup>,
}

/// A component or physical group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkeletonGroup {
    #[serde(default)]
    pub belongs_to: Vec<String>,
}

/// A container group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerGroup {
    /// `<type>_containers` groups this container group is placed under
    #[serde(default)]
    pub belongs_to: Vec<String>,
    /// Components running inside these containers
    #[serde(default)]
    pub contains: Vec<String>,
    /// Properties copied onto every host of the group
    #[serde(default)]
    pub properties: Option<BTreeMap<String, Value>>,
}

impl ContainerGroup {
    /// Metal groups run directly on the physical host instead of a container.
    pub fn is_metal(&self) -> bool {
        self.properties
            .as_ref()
            .and_then(|props| props.get("is_metal"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A skeleton group with its resolved parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNode {
    pub name: String,
    pub parents: Vec<String>,
}

impl Skeleton {
    /// Physical host type of a `<type>_containers` group: the matching `<type>_hosts` group.
    pub fn physical_group_for(containers_group: &str) -> Option<String> {
        containers_group
            .strip_suffix(CONTAINERS_SUFFIX)
            .map(|host_type| format!("{}{}", host_type, HOSTS_SUFFIX))
    }

    /// Group holding the containers of one physical host.
    pub fn host_containers_group(host: &str) -> String {
        format!("{}-host{}", host, CONTAINERS_SUFFIX)
    }

    /// Check references that the group graph alone does not cover.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (container, group) in &self.container_skel {
            if let Some(component) = group
                .contains
                .iter()
                .find(|component| !self.component_skel.contains_key(*component))
            {
                return Err(ConfigError::UndeclaredComponent {
                    container: container.clone(),
                    component: component.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parent edges of every group, including groups only named as a parent.
    fn parent_edges(&self) -> BTreeMap<String, Vec<String>> {
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        edges.entry(ALL_GROUP.to_string()).or_default();

        let declared = self
            .component_skel
            .iter()
            .map(|(name, group)| (name, &group.belongs_to))
            .chain(self.physical_skel.iter().map(|(name, group)| (name, &group.belongs_to)))
            .chain(self.container_skel.iter().map(|(name, group)| (name, &group.belongs_to)));

        for (name, belongs_to) in declared {
            for parent in belongs_to {
                edges.entry(parent.clone()).or_default();
                let parents = edges.entry(name.clone()).or_default();
                if !parents.contains(parent) {
                    parents.push(parent.clone());
                }
            }
            edges.entry(name.clone()).or_default();
        }
        edges
    }

    /// Every group the skeleton gives rise to, independent of hosts.
    pub fn group_names(&self) -> BTreeSet<String> {
        self.parent_edges().into_keys().collect()
    }

    /// Resolve the group graph into parents-before-children order.
    ///
    /// Ties are broken by group name so the order is stable. Fails if any
    /// group is its own ancestor.
    pub fn resolve(&self) -> Result<Vec<GroupNode>, ConfigError> {
        self.validate()?;
        let edges = self.parent_edges();

        let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        for (name, parents) in &edges {
            pending.insert(name.as_str(), parents.len());
            for parent in parents {
                children.entry(parent.as_str()).or_default().push(name.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(edges.len());

        while let Some(name) = ready.pop_first() {
            order.push(GroupNode {
                name: name.to_string(),
                parents: edges[name].clone(),
            });
            for child in children.get(name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }

        if order.len() < edges.len() {
            let resolved: BTreeSet<&str> = order.iter().map(|node| node.name.as_str()).collect();
            let group = edges
                .keys()
                .find(|name| !resolved.contains(name.as_str()))
                .cloned()
                .unwrap_or_default();
            return Err(ConfigError::SkeletonCycle { group });
        }

        log::debug!("Resolved {} skeleton groups", order.len());
        Ok(order)
    }
}
