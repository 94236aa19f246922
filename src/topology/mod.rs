//! Inventory topology module.
//!
//! This module contains the environment skeleton, the synthesis of groups
//! and hosts from it, and the binding of provider networks to hosts.

pub mod skeleton;
pub mod networks;
pub mod synthesizer;

// Re-export key types and functions for easier access
pub use skeleton::{GroupNode, Skeleton};
pub use networks::{bind_provider_networks, net_address_search};
pub use synthesizer::{prepare_registry, synthesize};
