//! Error types for power reconciliation.

use thiserror::Error;

use crate::transition::PowerAction;

/// Errors returned from a reconciliation pass.
///
/// Waiting for a network address and an already-satisfied target are not
/// errors; they are reported through the requeue flag alone.
#[derive(Debug, Error)]
pub enum PowerError {
    /// The hypervisor rejected or failed a state-changing call.
    #[error("unable to {action} the virtual machine {vmid}: {source}")]
    Action {
        action: PowerAction,
        vmid: u32,
        #[source]
        source: anyhow::Error,
    },
}

impl PowerError {
    pub fn vmid(&self) -> u32 {
        match self {
            PowerError::Action { vmid, .. } => *vmid,
        }
    }

    pub fn action(&self) -> PowerAction {
        match self {
            PowerError::Action { action, .. } => *action,
        }
    }
}

/// Result type for reconciliation passes. `Ok(true)` asks for another pass.
pub type Result<T> = std::result::Result<T, PowerError>;
