//! pmx-cloudinit: cloud-init documents for pmx-managed VMs.
//!
//! Only the network-config is rendered here. user-data and meta-data are
//! supplied by the caller as-is.

pub mod error;
pub mod network;

pub use error::{NetworkConfigError, Result};
pub use network::{NetworkConfig, NetworkConfigData};
