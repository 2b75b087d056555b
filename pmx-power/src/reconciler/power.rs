//! Power state reconciler - drives a VM toward its on/off target.
//!
//! A pass is split in two:
//! - [`PowerPlan`] is computed from an immutable view of the machine and
//!   carries the in-progress condition plus the action to issue.
//! - [`PowerPlan::execute`] issues that single hypervisor call and returns a
//!   [`PowerOutcome`] delta for the caller to apply.
//!
//! [`reconcile_power_on`] and [`reconcile_power_off`] glue both halves
//! together and write the in-progress condition before the call is made.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::client::VmClient;
use crate::condition::{Condition, ConditionReason, ConditionType, Severity};
use crate::error::{PowerError, Result};
use crate::machine::MachineState;
use crate::task::Upid;
use crate::transition::{PowerAction, action_for};
use crate::vm::{PowerTarget, VirtualMachine};

fn in_progress_reason(target: PowerTarget) -> ConditionReason {
    match target {
        PowerTarget::On => ConditionReason::PoweringOn,
        PowerTarget::Off => ConditionReason::PoweringOff,
    }
}

fn failed_reason(target: PowerTarget) -> ConditionReason {
    match target {
        PowerTarget::On => ConditionReason::PoweringOnFailed,
        PowerTarget::Off => ConditionReason::PoweringOffFailed,
    }
}

/// What a single pass is going to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PowerPlan {
    /// No network address yet. Nothing is written and nothing is called.
    Deferred,
    /// Observed status already matches the target.
    Satisfied { vmid: u32, condition: Condition },
    /// An action is due, but a task from an earlier pass is still referenced.
    Outstanding {
        vmid: u32,
        condition: Condition,
        upid: Upid,
    },
    /// Issue `action` against `vm`.
    Act {
        condition: Condition,
        target: PowerTarget,
        action: PowerAction,
        vm: VirtualMachine,
    },
}

impl PowerPlan {
    /// Plan a pass toward `On`.
    pub fn power_on<M: MachineState + ?Sized>(machine: &M) -> Self {
        let vmid = machine.vm().vmid;
        if !machine.has_network_address() {
            debug!(vmid, "ip address not set for machine");
            return PowerPlan::Deferred;
        }

        debug!(vmid, "ensuring machine is started");
        Self::plan(PowerTarget::On, machine)
    }

    /// Plan a pass toward `Off`.
    pub fn power_off<M: MachineState + ?Sized>(machine: &M) -> Self {
        debug!(vmid = machine.vm().vmid, status = %machine.vm().status, "shutting down machine");
        Self::plan(PowerTarget::Off, machine)
    }

    /// Plan a pass toward the machine's declared target.
    pub fn for_target<M: MachineState + ?Sized>(machine: &M) -> Self {
        match machine.target() {
            PowerTarget::On => Self::power_on(machine),
            PowerTarget::Off => Self::power_off(machine),
        }
    }

    fn plan<M: MachineState + ?Sized>(target: PowerTarget, machine: &M) -> Self {
        let condition = Condition::false_condition(
            ConditionType::VmProvisioned,
            in_progress_reason(target),
            Severity::Info,
            "",
        );
        let vm = machine.vm();

        let Some(action) = action_for(target, vm.status) else {
            return PowerPlan::Satisfied {
                vmid: vm.vmid,
                condition,
            };
        };

        if let Some(upid) = machine.task_ref() {
            return PowerPlan::Outstanding {
                vmid: vm.vmid,
                condition,
                upid: Upid::new(upid),
            };
        }

        PowerPlan::Act {
            condition,
            target,
            action,
            vm: vm.clone(),
        }
    }

    /// Condition to write before [`execute`](Self::execute) runs.
    pub fn condition(&self) -> Option<&Condition> {
        match self {
            PowerPlan::Deferred => None,
            PowerPlan::Satisfied { condition, .. }
            | PowerPlan::Outstanding { condition, .. }
            | PowerPlan::Act { condition, .. } => Some(condition),
        }
    }

    pub fn action(&self) -> Option<PowerAction> {
        match self {
            PowerPlan::Act { action, .. } => Some(*action),
            _ => None,
        }
    }

    /// Issue the planned call, if any. At most one client call is made.
    pub async fn execute<C: VmClient + ?Sized>(self, client: &C) -> PowerOutcome {
        let (target, action, vm) = match self {
            PowerPlan::Deferred => return PowerOutcome::requeue(),
            PowerPlan::Satisfied { vmid, .. } => {
                debug!(vmid, "VM no task");
                return PowerOutcome::done();
            }
            PowerPlan::Outstanding { vmid, upid, .. } => {
                debug!(
                    vmid,
                    %upid,
                    kind = upid.kind().unwrap_or("unknown"),
                    "task still outstanding, not issuing a new action"
                );
                return PowerOutcome::requeue();
            }
            PowerPlan::Act {
                target, action, vm, ..
            } => (target, action, vm),
        };

        let result = match action {
            PowerAction::Resume => client.resume_vm(&vm).await,
            PowerAction::Start => client.start_vm(&vm).await,
            PowerAction::Shutdown => client.shutdown_vm(&vm).await,
        };

        match result {
            Ok(Some(task)) => {
                info!(vmid = vm.vmid, %action, upid = %task.upid, "VM task started");
                PowerOutcome {
                    task_ref: Some(task.upid),
                    requeue: true,
                    ..PowerOutcome::done()
                }
            }
            Ok(None) => {
                debug!(vmid = vm.vmid, %action, "VM no task");
                PowerOutcome::done()
            }
            Err(source) => {
                let error = PowerError::Action {
                    action,
                    vmid: vm.vmid,
                    source,
                };
                warn!(vmid = vm.vmid, %action, error = %error, "VM power action failed");
                let condition = Condition::false_condition(
                    ConditionType::VmProvisioned,
                    failed_reason(target),
                    Severity::Info,
                    error.to_string(),
                );
                PowerOutcome {
                    condition: Some(condition),
                    task_ref: None,
                    requeue: false,
                    error: Some(error),
                }
            }
        }
    }
}

/// Result of executing a [`PowerPlan`].
#[derive(Debug)]
pub struct PowerOutcome {
    /// Failure condition to record.
    pub condition: Option<Condition>,
    /// Handle of the task just started.
    pub task_ref: Option<Upid>,
    pub requeue: bool,
    pub error: Option<PowerError>,
}

impl PowerOutcome {
    fn done() -> Self {
        Self {
            condition: None,
            task_ref: None,
            requeue: false,
            error: None,
        }
    }

    fn requeue() -> Self {
        Self {
            requeue: true,
            ..Self::done()
        }
    }

    /// Write the delta to `machine` and return the pass result.
    pub fn apply<M: MachineState + ?Sized>(self, machine: &mut M) -> Result<bool> {
        if let Some(condition) = self.condition {
            machine.set_condition(condition);
        }
        if let Some(upid) = self.task_ref {
            machine.set_task_ref(upid);
        }
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.requeue),
        }
    }
}

async fn run<C, M>(plan: PowerPlan, client: &C, machine: &mut M) -> Result<bool>
where
    C: VmClient + ?Sized,
    M: MachineState + ?Sized,
{
    if let Some(condition) = plan.condition() {
        machine.set_condition(condition.clone());
    }
    plan.execute(client).await.apply(machine)
}

/// Drive the machine toward `On`.
///
/// Returns `Ok(true)` while waiting for a network address or after a task was
/// started, `Ok(false)` once nothing is left to do.
pub async fn reconcile_power_on<C, M>(client: &C, machine: &mut M) -> Result<bool>
where
    C: VmClient + ?Sized,
    M: MachineState + ?Sized,
{
    let plan = PowerPlan::power_on(&*machine);
    run(plan, client, machine).await
}

/// Drive the machine toward `Off` with a graceful shutdown.
pub async fn reconcile_power_off<C, M>(client: &C, machine: &mut M) -> Result<bool>
where
    C: VmClient + ?Sized,
    M: MachineState + ?Sized,
{
    let plan = PowerPlan::power_off(&*machine);
    run(plan, client, machine).await
}

/// Power reconciler dispatching on the machine's declared target.
pub struct PowerReconciler<C> {
    client: C,
}

impl<C: VmClient> PowerReconciler<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C, M> Reconciler<M> for PowerReconciler<C>
where
    C: VmClient,
    M: MachineState + 'static,
{
    async fn reconcile(&self, machine: &mut M) -> Result<bool> {
        let plan = PowerPlan::for_target(&*machine);
        run(plan, &self.client, machine).await
    }
}
