//! IP address allocation and management module.
//!
//! This module hands out collision-free addresses for every network queue
//! declared in `cidr_networks`, tracking what has already been committed in
//! the current run.

pub mod registry;
pub mod allocator;

// Re-export commonly used types
pub use registry::UsedAddressRegistry;
pub use allocator::{AddressAllocator, AddressPool};
