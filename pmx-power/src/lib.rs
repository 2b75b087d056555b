//! pmx-power: power-state reconciliation for hypervisor VMs.
//!
//! One pass reads the declared target and the observed VM status, issues at
//! most one hypervisor call, records progress as a `VMProvisioned` condition
//! and tells the caller whether to come back later. Waiting on the started
//! task and scheduling the next pass are left to the caller.

pub mod client;
pub mod condition;
pub mod error;
pub mod machine;
pub mod reconciler;
pub mod task;
pub mod transition;
pub mod vm;

pub use client::VmClient;
pub use condition::{
    Condition, ConditionReason, ConditionStatus, ConditionType, Conditions, Severity,
};
pub use error::{PowerError, Result};
pub use machine::{Machine, MachineState, MachineStatus};
pub use reconciler::Reconciler;
pub use reconciler::power::{
    PowerOutcome, PowerPlan, PowerReconciler, reconcile_power_off, reconcile_power_on,
};
pub use task::{Task, Upid};
pub use transition::{PowerAction, action_for};
pub use vm::{PowerTarget, VirtualMachine, VmStatus};
