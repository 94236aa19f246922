//! Inventory orchestrator.
//!
//! This module coordinates one inventory generation run, from loading the
//! configuration directory through synthesis and validation to writing the
//! inventory. Nothing is written unless every check passed.

use crate::config::UserConfig;
use crate::config_loader::{load_environment, load_user_configuration};
use crate::error::Result;
use crate::inventory::Inventory;
use crate::persistence::{
    load_inventory, make_backup, save_inventory, write_hostnames_ips, INVENTORY_FILE,
};
use crate::topology::{prepare_registry, synthesize, Skeleton};
use crate::utils::validation::{check_config_settings, check_host_addresses, check_inventory_addresses};
use log::info;
use std::path::Path;

/// Synthesize a validated inventory in memory.
///
/// `existing` is the previously generated inventory (empty on a first run);
/// its container names and addresses are kept.
pub fn build_inventory(
    config: &UserConfig,
    skeleton: &Skeleton,
    existing: Inventory,
) -> Result<Inventory> {
    let mut allocator = check_config_settings(config)?;
    check_host_addresses(&config.host_groups)?;

    let mut inventory = existing;
    let mut registry = prepare_registry(config, &inventory)?;
    synthesize(&mut inventory, skeleton, config, &mut allocator, &mut registry)?;

    check_inventory_addresses(&inventory)?;
    Ok(inventory)
}

/// Generate the inventory for the configuration directory `config_dir`.
///
/// Loads `user_config.yml`, `conf.d` and `env.d`, synthesizes the inventory
/// on top of the existing `inventory.json`, backs the old file up and writes
/// the new one. Returns the JSON text of the new inventory.
pub fn generate_inventory(config_dir: &Path) -> Result<String> {
    info!("Generating inventory for {:?}", config_dir);
    let config = load_user_configuration(config_dir)?;
    let skeleton = load_environment(config_dir)?;

    let inventory_path = config_dir.join(INVENTORY_FILE);
    let existing = load_inventory(&inventory_path)?;
    let inventory = build_inventory(&config, &skeleton, existing)?;

    make_backup(config_dir, &inventory_path)?;
    let json = save_inventory(&inventory, &inventory_path)?;
    write_hostnames_ips(&inventory, config_dir)?;

    info!(
        "Inventory generated: {} hosts in {} groups",
        inventory.host_count(),
        inventory.groups.len()
    );
    Ok(json)
}
