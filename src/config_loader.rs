use crate::config::UserConfig;
use crate::error::{InventoryError, Result};
use crate::topology::Skeleton;
use log::{debug, info, warn};
use serde_yaml::Value;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Main user configuration file inside the configuration directory.
pub const USER_CONFIG_FILE: &str = "user_config.yml";

/// Directory of configuration fragments merged over `user_config.yml`.
pub const CONF_D_DIR: &str = "conf.d";

/// Directory of environment skeleton fragments.
pub const ENV_D_DIR: &str = "env.d";

/// Deep-merge `overlay` into `base`.
///
/// Mappings are merged key by key; any other value in `overlay` replaces the
/// one in `base`. Keys already in `base` keep their position.
pub fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parse a single YAML file.
fn read_yaml(path: &Path) -> Result<Value> {
    debug!("Reading {:?}", path);
    let file = File::open(path).map_err(|source| InventoryError::io(path, source))?;
    serde_yaml::from_reader(file).map_err(|source| InventoryError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// `*.yml` and `*.yaml` files of `dir` sorted by file name; empty if `dir` is missing.
fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|source| InventoryError::io(dir, source))? {
        let path = entry.map_err(|source| InventoryError::io(dir, source))?.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext == "yml" || ext == "yaml");
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load `user_config.yml` and merge every `conf.d` fragment over it.
pub fn load_user_configuration(config_dir: &Path) -> Result<UserConfig> {
    let path = config_dir.join(USER_CONFIG_FILE);
    info!("Loading user configuration from {:?}", path);
    let mut merged = read_yaml(&path)?;

    for fragment in yaml_files(&config_dir.join(CONF_D_DIR))? {
        info!("Merging configuration fragment {:?}", fragment);
        let value = read_yaml(&fragment)?;
        if merged.is_null() {
            merged = Value::Mapping(Default::default());
        }
        merge_yaml(&mut merged, value);
    }

    UserConfig::from_value(merged).map_err(|source| InventoryError::Yaml { path, source })
}

/// Load the environment skeleton from the `env.d` fragments.
pub fn load_environment(config_dir: &Path) -> Result<Skeleton> {
    let env_dir = config_dir.join(ENV_D_DIR);
    let files = yaml_files(&env_dir)?;
    if files.is_empty() {
        warn!("No environment fragments found in {:?}", env_dir);
    }

    let mut merged = Value::Mapping(Default::default());
    for fragment in &files {
        debug!("Merging environment fragment {:?}", fragment);
        let value = read_yaml(fragment)?;
        if !value.is_null() {
            merge_yaml(&mut merged, value);
        }
    }

    let skeleton: Skeleton = serde_yaml::from_value(merged).map_err(|source| InventoryError::Yaml {
        path: env_dir.clone(),
        source,
    })?;
    info!(
        "Loaded environment: {} components, {} container groups, {} physical groups",
        skeleton.component_skel.len(),
        skeleton.container_skel.len(),
        skeleton.physical_skel.len()
    );
    Ok(skeleton)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const USER_CONFIG: &str = r#"
cidr_networks:
  container: 172.29.236.0/22
global_overrides:
  internal_lb_vip_address: 172.29.236.100
  provider_networks:
    - network:
        container_bridge: br-mgmt
        ip_from_q: container
        group_binds: [hosts]
infra_hosts:
  aio1:
    ip: 172.29.236.100
"#;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_merge_yaml_is_deep() {
        let mut base: Value = serde_yaml::from_str("a: {b: 1, c: [1, 2]}\nd: x\n").unwrap();
        let overlay: Value = serde_yaml::from_str("a: {c: [3], e: 5}\n").unwrap();
        merge_yaml(&mut base, overlay);

        let expected: Value = serde_yaml::from_str("a: {b: 1, c: [3], e: 5}\nd: x\n").unwrap();
        assert_eq!(base, expected);
    }

    #[test]
    fn test_conf_d_fragments_merge_in_name_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), USER_CONFIG_FILE, USER_CONFIG);
        write(dir.path(), "conf.d/20-storage.yml", "storage_hosts:\n  store1:\n    ip: 172.29.236.110\n");
        write(
            dir.path(),
            "conf.d/10-cidr.yml",
            "cidr_networks:\n  storage: 172.29.244.0/22\n",
        );
        write(dir.path(), "conf.d/notes.txt", "ignored");

        let config = load_user_configuration(dir.path()).unwrap();
        let cidrs = config.cidr_networks.as_ref().unwrap();
        assert_eq!(cidrs.len(), 2);
        assert_eq!(cidrs["container"], "172.29.236.0/22");
        let names: Vec<&str> = config.host_groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["infra_hosts", "storage_hosts"]);
    }

    #[test]
    fn test_missing_user_config_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = load_user_configuration(dir.path()).unwrap_err();
        assert!(matches!(err, InventoryError::Io { .. }));
    }

    #[test]
    fn test_invalid_yaml_names_the_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), USER_CONFIG_FILE, "cidr_networks: [unterminated\n");
        match load_user_configuration(dir.path()) {
            Err(InventoryError::Yaml { path, .. }) => assert!(path.ends_with(USER_CONFIG_FILE)),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_load_environment_merges_fragments() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "env.d/galera.yml",
            "component_skel:\n  galera:\n    belongs_to: [galera_all]\n\
             container_skel:\n  galera_container:\n    belongs_to: [infra_containers]\n    contains: [galera]\n",
        );
        write(
            dir.path(),
            "env.d/shared.yml",
            "physical_skel:\n  infra_containers:\n    belongs_to: [all_containers]\n  infra_hosts:\n    belongs_to: [hosts]\n",
        );

        let skeleton = load_environment(dir.path()).unwrap();
        assert!(skeleton.component_skel.contains_key("galera"));
        assert_eq!(skeleton.container_skel["galera_container"].contains, vec!["galera"]);
        assert_eq!(skeleton.physical_skel.len(), 2);
    }

    #[test]
    fn test_missing_env_d_yields_empty_skeleton() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load_environment(dir.path()).unwrap(), Skeleton::default());
    }
}
