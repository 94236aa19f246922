//! Inventory persistence and backups.
//!
//! The inventory lives in `inventory.json` next to the user configuration.
//! Before it is overwritten, the previous file is appended to
//! `backup_inventory.tar` under a timestamped name, so every generation can
//! be recovered.

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;
use tar::{Archive, Builder, Header};

use crate::error::{InventoryError, Result};
use crate::inventory::Inventory;

/// Inventory file name inside the configuration directory.
pub const INVENTORY_FILE: &str = "inventory.json";

/// Backup archive file name inside the configuration directory.
pub const BACKUP_ARCHIVE: &str = "backup_inventory.tar";

/// Host name to address map written next to the inventory.
pub const HOSTNAMES_IPS_FILE: &str = "hostnames_ips.yml";

const BLOCK_SIZE: u64 = 512;

/// Load a previously written inventory, or an empty one if none exists.
pub fn load_inventory(path: &Path) -> Result<Inventory> {
    if !path.exists() {
        info!("No existing inventory at {:?}, starting from scratch", path);
        return Ok(Inventory::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|source| InventoryError::io(path, source))?;
    let inventory: Inventory = serde_json::from_str(&contents).map_err(|source| InventoryError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Loaded existing inventory with {} hosts", inventory.host_count());
    Ok(inventory)
}

/// Archive entry name of a backup: `<file name>-YYYYMMDD_HHMMSS`.
pub fn backup_name(file_name: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}", file_name, timestamp.format("%Y%m%d_%H%M%S"))
}

/// Append the current inventory file to the backup archive in `dir`.
///
/// Does nothing when `inventory_path` does not exist. Entries already in
/// the archive are kept. Returns the name of the new entry.
pub fn make_backup(dir: &Path, inventory_path: &Path) -> Result<Option<String>> {
    if !inventory_path.exists() {
        debug!("Nothing to back up at {:?}", inventory_path);
        return Ok(None);
    }

    let data = std::fs::read(inventory_path).map_err(|source| InventoryError::io(inventory_path, source))?;
    let file_name = inventory_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(INVENTORY_FILE);
    let now = Utc::now();
    let entry_name = backup_name(file_name, now);

    let archive_path = dir.join(BACKUP_ARCHIVE);
    let io_err = |source| InventoryError::io(&archive_path, source);
    let mut archive_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&archive_path)
        .map_err(io_err)?;

    // Overwrite the end-of-archive marker so the new entry follows the last one
    let end = entries_end(&archive_file).map_err(io_err)?;
    archive_file.set_len(end).map_err(io_err)?;
    archive_file.seek(SeekFrom::Start(end)).map_err(io_err)?;

    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(now.timestamp().max(0) as u64);
    header.set_cksum();

    let mut builder = Builder::new(archive_file);
    builder
        .append_data(&mut header, &entry_name, data.as_slice())
        .map_err(io_err)?;
    builder.finish().map_err(io_err)?;

    info!("Backed up {:?} as {} in {:?}", inventory_path, entry_name, archive_path);
    Ok(Some(entry_name))
}

/// Offset just past the last entry of an archive; 0 for an empty file.
fn entries_end(file: &File) -> std::io::Result<u64> {
    let mut archive = Archive::new(file);
    let mut end = 0;
    for entry in archive.entries()? {
        let entry = entry?;
        let padded = entry.size().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        end = entry.raw_file_position() + padded;
    }
    Ok(end)
}

/// Names of the entries in a backup archive, in archive order.
pub fn backup_entries(archive_path: &Path) -> Result<Vec<String>> {
    let file = File::open(archive_path).map_err(|source| InventoryError::io(archive_path, source))?;
    let mut archive = Archive::new(file);
    let mut names = Vec::new();
    let entries = archive
        .entries()
        .map_err(|source| InventoryError::io(archive_path, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| InventoryError::io(archive_path, source))?;
        let path = entry
            .path()
            .map_err(|source| InventoryError::io(archive_path, source))?;
        names.push(path.to_string_lossy().into_owned());
    }
    Ok(names)
}

/// Render the inventory as pretty JSON with sorted keys.
pub fn inventory_json(inventory: &Inventory) -> std::result::Result<String, serde_json::Error> {
    // Going through Value sorts every object, including `_meta`
    let value = serde_json::to_value(inventory)?;
    serde_json::to_string_pretty(&value)
}

/// Write the inventory to `path` and return the JSON text written.
pub fn save_inventory(inventory: &Inventory, path: &Path) -> Result<String> {
    let json = inventory_json(inventory).map_err(|source| InventoryError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, &json).map_err(|source| InventoryError::io(path, source))?;
    info!("Wrote inventory with {} hosts to {:?}", inventory.host_count(), path);
    Ok(json)
}

/// Write `hostnames_ips.yml` mapping every host to its SSH address.
///
/// Hosts without an address are left out.
pub fn write_hostnames_ips(inventory: &Inventory, dir: &Path) -> Result<BTreeMap<String, String>> {
    let map: BTreeMap<String, String> = inventory
        .hostvars
        .iter()
        .filter_map(|(host, vars)| {
            vars.ansible_ssh_host
                .clone()
                .or_else(|| vars.container_address.clone())
                .map(|address| (host.clone(), address))
        })
        .collect();

    let path = dir.join(HOSTNAMES_IPS_FILE);
    let yaml = serde_yaml::to_string(&map).map_err(|source| InventoryError::Yaml {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, yaml).map_err(|source| InventoryError::io(&path, source))?;
    debug!("Wrote {} host addresses to {:?}", map.len(), path);
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Read;
    use tempfile::TempDir;

    fn sample() -> Inventory {
        let mut inventory = Inventory::default();
        inventory.ensure_group("all");
        inventory.ensure_group("hosts").add_host("aio1");
        inventory.host_vars_mut("aio1").ansible_ssh_host = Some("172.29.236.100".to_string());
        inventory.host_vars_mut("aio1_galera_container-1a2b3c4d").container_name =
            Some("aio1_galera_container-1a2b3c4d".to_string());
        inventory
    }

    #[test]
    fn test_backup_name_format() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(
            backup_name("inventory.json", timestamp),
            "inventory.json-20240307_090501"
        );
    }

    #[test]
    fn test_load_missing_inventory_is_empty() {
        let dir = TempDir::new().unwrap();
        let inventory = load_inventory(&dir.path().join(INVENTORY_FILE)).unwrap();
        assert_eq!(inventory, Inventory::default());
    }

    #[test]
    fn test_load_invalid_inventory_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(INVENTORY_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_inventory(&path), Err(InventoryError::Json { .. })));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(INVENTORY_FILE);
        let json = save_inventory(&sample(), &path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), json);
        assert_eq!(load_inventory(&path).unwrap(), sample());
        let meta = json.find("\"_meta\"").unwrap();
        let all = json.find("\"all\"").unwrap();
        assert!(meta < all);
    }

    #[test]
    fn test_no_backup_without_inventory() {
        let dir = TempDir::new().unwrap();
        let made = make_backup(dir.path(), &dir.path().join(INVENTORY_FILE)).unwrap();
        assert_eq!(made, None);
        assert!(!dir.path().join(BACKUP_ARCHIVE).exists());
    }

    #[test]
    fn test_backups_are_appended() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(INVENTORY_FILE);

        std::fs::write(&path, "{\"first\": {}}").unwrap();
        let first = make_backup(dir.path(), &path).unwrap().unwrap();
        std::fs::write(&path, "{\"second\": {}}").unwrap();
        make_backup(dir.path(), &path).unwrap().unwrap();

        let archive_path = dir.path().join(BACKUP_ARCHIVE);
        let names = backup_entries(&archive_path).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], first);
        assert!(names.iter().all(|name| name.starts_with("inventory.json-")));

        let mut archive = Archive::new(File::open(&archive_path).unwrap());
        let contents: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut text = String::new();
                entry.unwrap().read_to_string(&mut text).unwrap();
                text
            })
            .collect();
        assert_eq!(contents, vec!["{\"first\": {}}", "{\"second\": {}}"]);
    }

    #[test]
    fn test_hostnames_ips() {
        let dir = TempDir::new().unwrap();
        let map = write_hostnames_ips(&sample(), dir.path()).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["aio1"], "172.29.236.100");

        let written = std::fs::read_to_string(dir.path().join(HOSTNAMES_IPS_FILE)).unwrap();
        let parsed: BTreeMap<String, String> = serde_yaml::from_str(&written).unwrap();
        assert_eq!(parsed, map);
    }
}
