//! Reconcilers for managed machines.
//!
//! A reconciler compares the desired state with the observed state and takes
//! at most one action to converge. It never waits for that action to finish;
//! `Ok(true)` asks the caller for another pass later.

pub mod power;

use async_trait::async_trait;

use crate::error::Result;
use crate::machine::MachineState;

/// Trait for machine reconcilers.
#[async_trait]
pub trait Reconciler<M: MachineState>: Send + Sync {
    /// Run one reconciliation pass. Returns whether another pass is needed.
    async fn reconcile(&self, machine: &mut M) -> Result<bool>;
}
