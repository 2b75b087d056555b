//! Hypervisor VM client capability.
//!
//! Implementations own transport and authentication. Each call is only valid
//! from the matching pre-state; the reconciler gates on the observed status
//! before calling.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::task::Task;
use crate::vm::VirtualMachine;

/// State-changing VM operations. `Ok(None)` means the hypervisor accepted the
/// call without spawning a task.
#[async_trait]
pub trait VmClient: Send + Sync {
    /// Resume a paused VM.
    async fn resume_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>>;

    /// Start a stopped or hibernated VM.
    async fn start_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>>;

    /// Gracefully shut down a VM.
    async fn shutdown_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>>;
}

#[async_trait]
impl<C: VmClient + ?Sized> VmClient for Arc<C> {
    async fn resume_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        (**self).resume_vm(vm).await
    }

    async fn start_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        (**self).start_vm(vm).await
    }

    async fn shutdown_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        (**self).shutdown_vm(vm).await
    }
}

#[async_trait]
impl<C: VmClient + ?Sized> VmClient for &C {
    async fn resume_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        (**self).resume_vm(vm).await
    }

    async fn start_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        (**self).start_vm(vm).await
    }

    async fn shutdown_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        (**self).shutdown_vm(vm).await
    }
}
