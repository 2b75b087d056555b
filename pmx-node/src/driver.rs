//! Reconcile loop for a single VM.
//!
//! Each pass polls the outstanding task (if any), refreshes the VM snapshot
//! and runs one power reconciliation. The loop owns the machine, so there is
//! never more than one pass in flight for a VM.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pmx_power::{Machine, MachineState, MachineStatus, Reconciler, Upid};
use tracing::{debug, error, info, warn};

use crate::clients::{Hypervisor, TaskState};

/// Loop timing and limits.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Delay before the next pass when the reconciler asks for a requeue.
    pub requeue_after: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    /// Give up after this many passes.
    pub max_passes: Option<u64>,
    /// Where to persist the status subdocument between passes.
    pub status_file: Option<PathBuf>,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverExit {
    Converged { passes: u64 },
    PassLimit { passes: u64 },
    Interrupted,
}

/// Exponential backoff applied after failed passes.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Load a previously persisted status subdocument.
pub async fn load_status(path: &Path) -> Result<Option<MachineStatus>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let status = serde_json::from_slice(&bytes)
                .with_context(|| format!("Invalid status file {}", path.display()))?;
            Ok(Some(status))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

async fn save_status(path: &Path, status: &MachineStatus) -> Result<()> {
    let json = serde_json::to_vec_pretty(status)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Level-triggered driver around a reconciler.
pub struct Driver<H, R> {
    hypervisor: H,
    reconciler: R,
    config: DriverConfig,
}

impl<H, R> Driver<H, R>
where
    H: Hypervisor,
    R: Reconciler<Machine>,
{
    pub fn new(hypervisor: H, reconciler: R, config: DriverConfig) -> Self {
        Self {
            hypervisor,
            reconciler,
            config,
        }
    }

    /// Run passes until the machine converges, the pass limit is hit or
    /// `shutdown` resolves.
    pub async fn run<F>(&self, machine: &mut Machine, shutdown: F) -> Result<DriverExit>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let vmid = machine.vm.vmid;
        let mut backoff = Backoff::new(self.config.backoff_initial, self.config.backoff_max);
        let mut passes = 0u64;

        loop {
            passes += 1;
            let result = self.pass(machine).await;
            self.persist(machine).await?;

            let delay = match result {
                Ok(false) => {
                    info!(vmid, passes, target = %machine.target, "VM power state converged");
                    return Ok(DriverExit::Converged { passes });
                }
                Ok(true) => {
                    backoff.reset();
                    self.config.requeue_after
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    error!(vmid, error = %format!("{:#}", e), retry_in = ?delay, "Reconciliation pass failed");
                    delay
                }
            };

            if self.config.max_passes.is_some_and(|max| passes >= max) {
                warn!(vmid, passes, "Pass limit reached before convergence");
                return Ok(DriverExit::PassLimit { passes });
            }

            debug!(vmid, requeue_after = ?delay, "Requeue");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!(vmid, "Shutdown requested, stopping reconcile loop");
                    return Ok(DriverExit::Interrupted);
                }
            }
        }
    }

    async fn pass(&self, machine: &mut Machine) -> Result<bool> {
        let vmid = machine.vm.vmid;

        // resolve the task first so the snapshot below reflects its effect
        self.poll_task(machine).await;

        let vm = self
            .hypervisor
            .current_vm(vmid)
            .await
            .with_context(|| format!("Failed to get status of VM {}", vmid))?;
        debug!(vmid, status = %vm.status, "Observed VM");
        machine.observe(vm);

        let requeue = self.reconciler.reconcile(machine).await?;
        debug!(
            vmid,
            requeue,
            task_ref = ?machine.task_ref(),
            "Pass finished"
        );
        Ok(requeue)
    }

    /// Drop the task reference once the task is over. A failed lookup keeps
    /// the reference; the pass goes on to observe the VM either way.
    async fn poll_task(&self, machine: &mut Machine) {
        let Some(upid) = machine.task_ref().map(Upid::new) else {
            return;
        };
        let vmid = machine.vm.vmid;

        if upid.vmid().is_some_and(|id| id != vmid) {
            warn!(vmid, %upid, "Task belongs to another VM, dropping it");
            machine.clear_task_ref();
            return;
        }

        match self.hypervisor.task_status(&upid).await {
            Ok(TaskState::Running) => debug!(vmid, %upid, "Task still running"),
            Ok(TaskState::Succeeded) => {
                info!(vmid, %upid, "Task finished");
                machine.clear_task_ref();
            }
            Ok(TaskState::Failed(exit)) => {
                warn!(vmid, %upid, exit = %exit, "Task failed");
                machine.clear_task_ref();
            }
            Ok(TaskState::Gone) => {
                warn!(vmid, %upid, "Task unknown to the node, dropping it");
                machine.clear_task_ref();
            }
            Err(e) => {
                warn!(vmid, %upid, error = %format!("{:#}", e), "Failed to get task status");
            }
        }
    }

    async fn persist(&self, machine: &Machine) -> Result<()> {
        match &self.config.status_file {
            Some(path) => save_status(path, &machine.status).await,
            None => Ok(()),
        }
    }
}
