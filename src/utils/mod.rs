//! Shared utilities: address parsing and validation checks.

pub mod ip_utils;
pub mod validation;

pub use ip_utils::{parse_address, parse_used_ip_entry, AddressRange};
pub use validation::{
    check_config_settings, check_host_addresses, check_inventory_addresses,
    check_multiple_ips_to_host, check_same_ip_to_multiple_host,
};
