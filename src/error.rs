//! Error types for inventory generation.
//!
//! Every failure is fatal to the run: nothing is retried and no partial
//! inventory is written. Variants carry the structured fields (addresses,
//! host names, queue names) so callers can inspect the cause without
//! matching on message text.

use std::path::PathBuf;

/// Configuration problems detected before or during synthesis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("No container CIDR specified in user config")]
    MissingCidrNetworks,

    #[error("No container or management network specified in user config.")]
    MissingManagementNetwork,

    #[error("global_overrides can't be found in user config")]
    MissingGlobalOverrides,

    #[error("provider networks can't be found under global_overrides")]
    MissingProviderNetworks,

    #[error("can't find {queue} in cidr_networks")]
    UnknownQueue { queue: String },

    #[error("invalid CIDR '{cidr}' for queue {queue} in cidr_networks")]
    InvalidCidr { queue: String, cidr: String },

    #[error("invalid address '{value}' in {context}")]
    InvalidAddress { value: String, context: String },

    #[error("container group {container} contains undeclared component {component}")]
    UndeclaredComponent { container: String, component: String },

    #[error("group {group} is part of a belongs_to cycle in the environment skeleton")]
    SkeletonCycle { group: String },
}

/// Top-level error returned by every fallible inventory operation.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot retrieve requested amount of IP addresses. Increase the {queue} range in your user_config.yml.")]
    AddressPoolExhausted { queue: String },

    #[error("Both host:{assigned_host} and host:{new_host} have address:{ip} assigned.  Cannot assign same ip to both hosts")]
    MultipleHostsWithOneIp {
        ip: String,
        assigned_host: String,
        new_host: String,
    },

    #[error("Host {hostname} has both {current_ip} and {new_ip} assigned")]
    MultipleIpForHost {
        hostname: String,
        current_ip: String,
        new_ip: String,
    },

    #[error("Static route provider network with queue '{queue}' needs both 'cidr' and 'gateway' values.")]
    MissingStaticRouteInfo { queue: String },

    #[error("failed to convert global_overrides into inventory variables: {0}")]
    GlobalVars(#[source] serde_json::Error),

    #[error("invalid value for variable {key} of host {host}: {source}")]
    HostVar {
        host: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to process inventory JSON {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl InventoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InventoryError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = InventoryError> = std::result::Result<T, E>;
