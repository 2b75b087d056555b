//! Hypervisor task handles.
//!
//! A task is created by every state-changing hypervisor call. Its lifecycle is
//! resolved elsewhere; this crate only carries the handle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Proxmox unique process id, e.g.
/// `UPID:pve1:0002C0D1:0A3B4C5D:65A1B2C3:qmstart:100:root@pam:`.
///
/// Treated as opaque. The accessors are best-effort and return `None` when
/// the handle does not follow the usual layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Upid(String);

impl Upid {
    pub fn new(upid: impl Into<String>) -> Self {
        Self(upid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    fn field(&self, index: usize) -> Option<&str> {
        let mut parts = self.0.split(':');
        if parts.next() != Some("UPID") {
            return None;
        }
        parts.nth(index).filter(|s| !s.is_empty())
    }

    /// Node the task runs on.
    pub fn node(&self) -> Option<&str> {
        self.field(0)
    }

    /// Task type, e.g. `qmstart` or `qmshutdown`.
    pub fn kind(&self) -> Option<&str> {
        self.field(4)
    }

    /// VM id the task operates on.
    pub fn vmid(&self) -> Option<u32> {
        self.field(5).and_then(|id| id.parse().ok())
    }
}

impl fmt::Display for Upid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Upid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Upid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An in-flight hypervisor operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub upid: Upid,
}

impl Task {
    pub fn new(upid: impl Into<Upid>) -> Self {
        Self { upid: upid.into() }
    }
}
