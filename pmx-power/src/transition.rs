//! Power transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vm::{PowerTarget, VmStatus};

/// A state-changing hypervisor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Resume,
    Start,
    /// Graceful ACPI shutdown, never a hard power cut.
    Shutdown,
}

impl PowerAction {
    pub fn verb(&self) -> &'static str {
        match self {
            PowerAction::Resume => "resume",
            PowerAction::Start => "start",
            PowerAction::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// The corrective action for `status` given `target`, or `None` when the
/// target is already satisfied.
pub fn action_for(target: PowerTarget, status: VmStatus) -> Option<PowerAction> {
    match (target, status) {
        (PowerTarget::On, VmStatus::Running) => None,
        (PowerTarget::On, VmStatus::Paused) => Some(PowerAction::Resume),
        (PowerTarget::On, VmStatus::Stopped | VmStatus::Hibernated | VmStatus::Unknown) => {
            Some(PowerAction::Start)
        }
        (PowerTarget::Off, VmStatus::Stopped) => None,
        (
            PowerTarget::Off,
            VmStatus::Running | VmStatus::Paused | VmStatus::Hibernated | VmStatus::Unknown,
        ) => Some(PowerAction::Shutdown),
    }
}
