//! Machine state accessor.
//!
//! The accessor is what a reconciliation pass reads its inputs from and
//! writes its results to. The surrounding framework must make sure only one
//! pass at a time holds it for a given VM.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::condition::{Condition, Conditions};
use crate::task::Upid;
use crate::vm::{PowerTarget, VirtualMachine};

/// Read/write view over one managed machine.
pub trait MachineState: Send {
    /// Desired power state.
    fn target(&self) -> PowerTarget;

    /// Last observed VM snapshot.
    fn vm(&self) -> &VirtualMachine;

    /// Whether at least one network address is assigned.
    fn has_network_address(&self) -> bool;

    /// Handle of the task started by an earlier pass, if still outstanding.
    fn task_ref(&self) -> Option<&str>;

    fn set_task_ref(&mut self, upid: Upid);

    fn set_condition(&mut self, condition: Condition);
}

/// Persisted status subdocument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<String>,
    #[serde(default)]
    pub conditions: Conditions,
}

/// In-memory machine, the accessor used by the node driver and in tests.
#[derive(Debug, Clone)]
pub struct Machine {
    pub vm: VirtualMachine,
    pub target: PowerTarget,
    pub addresses: Vec<IpAddr>,
    pub status: MachineStatus,
}

impl Machine {
    pub fn new(vm: VirtualMachine, target: PowerTarget) -> Self {
        Self {
            vm,
            target,
            addresses: Vec::new(),
            status: MachineStatus::default(),
        }
    }

    pub fn with_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.addresses = addresses;
        self
    }

    /// Replace the VM snapshot with a fresh observation.
    pub fn observe(&mut self, vm: VirtualMachine) {
        self.vm = vm;
    }

    /// Called by the task poller once the referenced task finished.
    pub fn clear_task_ref(&mut self) -> Option<String> {
        self.status.task_ref.take()
    }
}

impl MachineState for Machine {
    fn target(&self) -> PowerTarget {
        self.target
    }

    fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    fn has_network_address(&self) -> bool {
        !self.addresses.is_empty()
    }

    fn task_ref(&self) -> Option<&str> {
        self.status.task_ref.as_deref()
    }

    fn set_task_ref(&mut self, upid: Upid) {
        self.status.task_ref = Some(upid.into_inner());
    }

    fn set_condition(&mut self, condition: Condition) {
        self.status.conditions.set(condition);
    }
}
