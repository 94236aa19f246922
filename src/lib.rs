//! # dynamic-inventory - Deployment inventory synthesis
//!
//! This library turns a declarative deployment topology into a concrete,
//! internally consistent machine inventory for configuration management.
//!
//! ## Overview
//!
//! The input is a configuration directory holding the user configuration
//! (host groups, provider networks, CIDR pools) and an environment skeleton
//! (which groups exist and how they nest). The output is an inventory in
//! which every host belongs to its groups, carries the variables the
//! deployment relies on, and holds exactly one address per network it is
//! bound to.
//!
//! ## Key Features
//!
//! - **Collision-free addressing**: Per-network pools, `used_ips` reservations, explicit host addresses
//! - **Skeleton expansion**: Group hierarchy resolved parents-first, containers placed per host
//! - **Consistency checks**: Structural config checks and global address uniqueness
//! - **Idempotent**: Re-running on the same input yields the same inventory
//! - **Backups**: Every overwritten inventory is appended to a tar archive
//!
//! ## Architecture
//!
//! - `config`: Typed user configuration
//! - `config_loader`: Loading `user_config.yml`, `conf.d` and `env.d`
//! - `inventory`: Inventory data structures and JSON layout
//! - `ip`: Address pools and the per-run used address registry
//! - `topology`: Skeleton resolution, synthesis and network binding
//! - `utils`: Address parsing and validation checks
//! - `persistence`: Inventory file, backup archive and host address map
//! - `orchestrator`: One generation run end to end
//! - `error`: Error types
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dynamic_inventory::orchestrator;
//! use std::path::Path;
//!
//! // Reads /etc/deploy/user_config.yml, conf.d/ and env.d/, writes inventory.json
//! let json = orchestrator::generate_inventory(Path::new("/etc/deploy"))?;
//! println!("{}", json);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! cidr_networks:
//!   container: 172.29.236.0/22
//!   storage: 172.29.244.0/22
//!
//! used_ips:
//!   - "172.29.236.1,172.29.236.50"
//!
//! global_overrides:
//!   management_bridge: br-mgmt
//!   provider_networks:
//!     - network:
//!         container_bridge: br-mgmt
//!         container_interface: eth1
//!         ip_from_q: container
//!         type: raw
//!         group_binds: [all_containers, hosts]
//!
//! shared-infra_hosts:
//!   infra1:
//!     ip: 172.29.236.11
//! ```
//!
//! ## Error Handling
//!
//! Library functions return [`error::InventoryError`], a `thiserror` enum
//! whose variants carry the offending queue, address or host names. Every
//! check aborts the run on the first violation.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod inventory;
pub mod ip;
pub mod topology;
pub mod utils;
pub mod persistence;
pub mod orchestrator;
