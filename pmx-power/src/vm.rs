//! VM snapshot as observed on the hypervisor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Observed power status of a VM.
///
/// A single closed set: a VM is never "stopped" and "paused" at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Running,
    Stopped,
    Paused,
    Hibernated,
    Unknown,
}

impl VmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Running => "running",
            VmStatus::Stopped => "stopped",
            VmStatus::Paused => "paused",
            VmStatus::Hibernated => "hibernated",
            VmStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired power state declared by the owning resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerTarget {
    On,
    Off,
}

impl fmt::Display for PowerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerTarget::On => f.write_str("on"),
            PowerTarget::Off => f.write_str("off"),
        }
    }
}

impl FromStr for PowerTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "running" => Ok(PowerTarget::On),
            "off" | "stopped" => Ok(PowerTarget::Off),
            other => Err(format!("invalid power target '{}', expected on or off", other)),
        }
    }
}

/// Read-only snapshot of a hypervisor VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub vmid: u32,
    pub name: Option<String>,
    pub status: VmStatus,
}

impl VirtualMachine {
    pub fn new(vmid: u32, status: VmStatus) -> Self {
        Self {
            vmid,
            name: None,
            status,
        }
    }
}
