//! Clients for the hypervisor.
//!
//! - proxmox: Proxmox VE REST API (VM status, power actions, task status)

pub mod proxmox;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use pmx_power::{Upid, VirtualMachine};

pub use proxmox::{ProxmoxClient, ProxmoxConfig};

/// Lifecycle of a hypervisor task as seen by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Succeeded,
    /// Finished with a non-OK exit status.
    Failed(String),
    /// The node has no record of the task.
    Gone,
}

/// Read side of the hypervisor: VM observation and task polling.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Fetch the current VM snapshot.
    async fn current_vm(&self, vmid: u32) -> Result<VirtualMachine>;

    /// Look up the state of a task by UPID.
    async fn task_status(&self, upid: &Upid) -> Result<TaskState>;
}

#[async_trait]
impl<H: Hypervisor + ?Sized> Hypervisor for Arc<H> {
    async fn current_vm(&self, vmid: u32) -> Result<VirtualMachine> {
        (**self).current_vm(vmid).await
    }

    async fn task_status(&self, upid: &Upid) -> Result<TaskState> {
        (**self).task_status(upid).await
    }
}
