//! Power state reconciliation tests against a recording fake hypervisor.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;

use pmx_power::{
    Condition, ConditionReason, ConditionStatus, ConditionType, Machine, MachineState,
    PowerAction, PowerError, PowerReconciler, PowerTarget, Reconciler, Task, Upid,
    VirtualMachine, VmClient, VmStatus, reconcile_power_off, reconcile_power_on,
};

const UPID: &str = "UPID:100:0002C0D1:0A3B4C5D:65A1B2C3:qmstart:100:root@pam:";

#[derive(Clone)]
enum Reply {
    Task(&'static str),
    NoTask,
    Fail(&'static str),
}

/// Fake client that records every call and answers with a fixed reply.
struct FakeClient {
    reply: Reply,
    calls: Mutex<Vec<PowerAction>>,
    events: Option<Arc<Mutex<Vec<String>>>>,
}

impl FakeClient {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            calls: Mutex::new(Vec::new()),
            events: None,
        }
    }

    fn calls(&self) -> Vec<PowerAction> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, action: PowerAction) -> anyhow::Result<Option<Task>> {
        self.calls.lock().unwrap().push(action);
        if let Some(events) = &self.events {
            events.lock().unwrap().push(format!("call:{}", action));
        }
        match &self.reply {
            Reply::Task(upid) => Ok(Some(Task::new(*upid))),
            Reply::NoTask => Ok(None),
            Reply::Fail(msg) => Err(anyhow!("{}", msg)),
        }
    }
}

#[async_trait]
impl VmClient for FakeClient {
    async fn resume_vm(&self, _vm: &VirtualMachine) -> anyhow::Result<Option<Task>> {
        self.answer(PowerAction::Resume)
    }

    async fn start_vm(&self, _vm: &VirtualMachine) -> anyhow::Result<Option<Task>> {
        self.answer(PowerAction::Start)
    }

    async fn shutdown_vm(&self, _vm: &VirtualMachine) -> anyhow::Result<Option<Task>> {
        self.answer(PowerAction::Shutdown)
    }
}

/// Machine accessor that logs condition writes into a shared event list.
struct RecordingMachine {
    inner: Machine,
    events: Arc<Mutex<Vec<String>>>,
}

impl MachineState for RecordingMachine {
    fn target(&self) -> PowerTarget {
        self.inner.target()
    }

    fn vm(&self) -> &VirtualMachine {
        self.inner.vm()
    }

    fn has_network_address(&self) -> bool {
        self.inner.has_network_address()
    }

    fn task_ref(&self) -> Option<&str> {
        self.inner.task_ref()
    }

    fn set_task_ref(&mut self, upid: Upid) {
        self.events.lock().unwrap().push(format!("task:{}", upid));
        self.inner.set_task_ref(upid);
    }

    fn set_condition(&mut self, condition: Condition) {
        let reason = condition.reason.map(|r| r.to_string()).unwrap_or_default();
        self.events
            .lock()
            .unwrap()
            .push(format!("condition:{}", reason));
        self.inner.set_condition(condition);
    }
}

fn machine(status: VmStatus, target: PowerTarget) -> Machine {
    Machine::new(VirtualMachine::new(100, status), target)
        .with_addresses(vec!["192.168.1.100".parse().unwrap()])
}

fn provisioned(machine: &Machine) -> Option<&Condition> {
    machine.status.conditions.get(ConditionType::VmProvisioned)
}

const ALL_STATUSES: [VmStatus; 5] = [
    VmStatus::Running,
    VmStatus::Stopped,
    VmStatus::Paused,
    VmStatus::Hibernated,
    VmStatus::Unknown,
];

#[tokio::test]
async fn test_power_on_running_is_noop() {
    let client = FakeClient::new(Reply::Task(UPID));
    let mut m = machine(VmStatus::Running, PowerTarget::On);

    let requeue = reconcile_power_on(&client, &mut m).await.unwrap();

    assert!(!requeue);
    assert!(client.calls().is_empty());
    assert_eq!(m.task_ref(), None);
    let c = provisioned(&m).unwrap();
    assert_eq!(c.status, ConditionStatus::False);
    assert_eq!(c.reason, Some(ConditionReason::PoweringOn));
}

#[tokio::test]
async fn test_power_off_stopped_is_noop() {
    let client = FakeClient::new(Reply::Task(UPID));
    let mut m = machine(VmStatus::Stopped, PowerTarget::Off);

    let requeue = reconcile_power_off(&client, &mut m).await.unwrap();

    assert!(!requeue);
    assert!(client.calls().is_empty());
    assert_eq!(
        provisioned(&m).unwrap().reason,
        Some(ConditionReason::PoweringOff)
    );
}

#[tokio::test]
async fn test_power_on_without_address_always_requeues() {
    for status in ALL_STATUSES {
        let client = FakeClient::new(Reply::Task(UPID));
        let mut m = Machine::new(VirtualMachine::new(100, status), PowerTarget::On);

        let requeue = reconcile_power_on(&client, &mut m).await.unwrap();

        assert!(requeue, "status {status}");
        assert!(client.calls().is_empty(), "status {status}");
        assert!(m.status.conditions.is_empty(), "status {status}");
        assert_eq!(m.task_ref(), None);
    }
}

#[tokio::test]
async fn test_power_on_paused_resumes() {
    let client = FakeClient::new(Reply::Task(UPID));
    let mut m = machine(VmStatus::Paused, PowerTarget::On);

    let requeue = reconcile_power_on(&client, &mut m).await.unwrap();

    assert!(requeue);
    assert_eq!(client.calls(), vec![PowerAction::Resume]);
    assert_eq!(m.task_ref(), Some(UPID));
}

#[tokio::test]
async fn test_power_on_starts_stopped_hibernated_and_unknown() {
    for status in [VmStatus::Stopped, VmStatus::Hibernated, VmStatus::Unknown] {
        let client = FakeClient::new(Reply::Task(UPID));
        let mut m = machine(status, PowerTarget::On);

        let requeue = reconcile_power_on(&client, &mut m).await.unwrap();

        assert!(requeue, "status {status}");
        assert_eq!(client.calls(), vec![PowerAction::Start], "status {status}");
        assert_eq!(m.task_ref(), Some(UPID));
    }
}

#[tokio::test]
async fn test_power_off_shuts_down_every_non_stopped_status() {
    for status in [
        VmStatus::Running,
        VmStatus::Paused,
        VmStatus::Hibernated,
        VmStatus::Unknown,
    ] {
        let client = FakeClient::new(Reply::Task(UPID));
        let mut m = machine(status, PowerTarget::Off);

        let requeue = reconcile_power_off(&client, &mut m).await.unwrap();

        assert!(requeue, "status {status}");
        assert_eq!(client.calls(), vec![PowerAction::Shutdown], "status {status}");
        assert_eq!(m.task_ref(), Some(UPID));
    }
}

#[tokio::test]
async fn test_call_without_task_is_done() {
    let client = FakeClient::new(Reply::NoTask);
    let mut m = machine(VmStatus::Stopped, PowerTarget::On);

    let requeue = reconcile_power_on(&client, &mut m).await.unwrap();

    assert!(!requeue);
    assert_eq!(client.calls(), vec![PowerAction::Start]);
    assert_eq!(m.task_ref(), None);
}

#[tokio::test]
async fn test_power_on_failure_sets_failed_condition() {
    let client = FakeClient::new(Reply::Fail("permission denied"));
    let mut m = machine(VmStatus::Stopped, PowerTarget::On);

    let err = reconcile_power_on(&client, &mut m).await.unwrap_err();

    assert_eq!(err.vmid(), 100);
    assert_eq!(err.action(), PowerAction::Start);
    let text = err.to_string();
    assert!(text.contains("100"), "{text}");
    assert!(text.contains("permission denied"), "{text}");
    assert_eq!(m.task_ref(), None);

    let c = provisioned(&m).unwrap();
    assert_eq!(c.status, ConditionStatus::False);
    assert_eq!(c.reason, Some(ConditionReason::PoweringOnFailed));
    assert_eq!(c.message, text);
}

#[tokio::test]
async fn test_resume_failure_sets_failed_condition() {
    let client = FakeClient::new(Reply::Fail("VM 100 qmp command 'cont' failed"));
    let mut m = machine(VmStatus::Paused, PowerTarget::On);

    let err = reconcile_power_on(&client, &mut m).await.unwrap_err();

    assert_eq!(err.action(), PowerAction::Resume);
    let text = err.to_string();
    assert!(text.contains("resume"), "{text}");
    assert!(text.contains("'cont' failed"), "{text}");
    assert_eq!(client.calls(), vec![PowerAction::Resume]);
    assert_eq!(m.task_ref(), None);

    let c = provisioned(&m).unwrap();
    assert_eq!(c.reason, Some(ConditionReason::PoweringOnFailed));
    assert_eq!(c.message, text);
}

#[tokio::test]
async fn test_scenario_paused_vm_100_resumes_with_upid() {
    let client = FakeClient::new(Reply::Task(UPID));
    let mut m = machine(VmStatus::Paused, PowerTarget::On);

    let result = reconcile_power_on(&client, &mut m).await;

    assert!(matches!(result, Ok(true)));
    assert_eq!(m.status.task_ref.as_deref(), Some(UPID));
}

#[tokio::test]
async fn test_scenario_shutdown_timeout() {
    let client = FakeClient::new(Reply::Fail("timeout"));
    let mut m = machine(VmStatus::Running, PowerTarget::Off);

    let err = reconcile_power_off(&client, &mut m).await.unwrap_err();

    assert!(matches!(
        err,
        PowerError::Action {
            action: PowerAction::Shutdown,
            vmid: 100,
            ..
        }
    ));
    let text = err.to_string();
    assert!(text.contains("timeout"), "{text}");
    assert!(text.contains("100"), "{text}");
    assert_eq!(
        std::error::Error::source(&err).map(|s| s.to_string()),
        Some("timeout".to_string())
    );
    assert_eq!(client.calls(), vec![PowerAction::Shutdown]);

    let c = provisioned(&m).unwrap();
    assert_eq!(c.reason, Some(ConditionReason::PoweringOffFailed));
    assert!(c.message.contains("timeout"));
}

#[tokio::test]
async fn test_condition_written_before_call() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut client = FakeClient::new(Reply::Task(UPID));
    client.events = Some(Arc::clone(&events));
    let mut m = RecordingMachine {
        inner: machine(VmStatus::Stopped, PowerTarget::On),
        events: Arc::clone(&events),
    };

    reconcile_power_on(&client, &mut m).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "condition:PoweringOn".to_string(),
            "call:start".to_string(),
            format!("task:{}", UPID),
        ]
    );
}

#[tokio::test]
async fn test_outstanding_task_blocks_new_action() {
    let client = FakeClient::new(Reply::Task("UPID:pve1:1:2:3:qmstart:100:root@pam:"));
    let mut m = machine(VmStatus::Stopped, PowerTarget::On);
    m.set_task_ref(Upid::new(UPID));

    let requeue = reconcile_power_on(&client, &mut m).await.unwrap();

    assert!(requeue);
    assert!(client.calls().is_empty());
    assert_eq!(m.task_ref(), Some(UPID));
}

#[tokio::test]
async fn test_reconciler_dispatches_on_target() {
    let client = Arc::new(FakeClient::new(Reply::Task(UPID)));
    let reconciler = PowerReconciler::new(Arc::clone(&client));

    let mut on = machine(VmStatus::Paused, PowerTarget::On);
    assert!(reconciler.reconcile(&mut on).await.unwrap());

    let mut off = machine(VmStatus::Running, PowerTarget::Off);
    assert!(reconciler.reconcile(&mut off).await.unwrap());

    assert_eq!(
        client.calls(),
        vec![PowerAction::Resume, PowerAction::Shutdown]
    );
}

#[tokio::test]
async fn test_converges_after_task_cleared() {
    let client = FakeClient::new(Reply::Task(UPID));
    let mut m = machine(VmStatus::Stopped, PowerTarget::On);

    assert!(reconcile_power_on(&client, &mut m).await.unwrap());

    // poller resolved the task and the VM came up
    m.clear_task_ref();
    m.observe(VirtualMachine::new(100, VmStatus::Running));

    assert!(!reconcile_power_on(&client, &mut m).await.unwrap());
    assert_eq!(client.calls(), vec![PowerAction::Start]);
}

#[tokio::test]
async fn test_outstanding_task_blocks_shutdown() {
    let client = FakeClient::new(Reply::Task("UPID:pve1:1:2:3:qmshutdown:100:root@pam:"));
    let mut m = machine(VmStatus::Running, PowerTarget::Off);
    m.set_task_ref(Upid::new(UPID));

    let requeue = reconcile_power_off(&client, &mut m).await.unwrap();

    assert!(requeue);
    assert!(client.calls().is_empty());
    assert_eq!(m.task_ref(), Some(UPID));
    assert_eq!(
        provisioned(&m).unwrap().reason,
        Some(ConditionReason::PoweringOff)
    );
}
