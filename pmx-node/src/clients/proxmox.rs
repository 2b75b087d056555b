//! Client for the Proxmox VE REST API.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use pmx_power::{Task, Upid, VirtualMachine, VmClient, VmStatus};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{Hypervisor, TaskState};

/// Connection settings for a Proxmox VE cluster.
#[derive(Debug, Clone)]
pub struct ProxmoxConfig {
    /// API base, e.g. `https://pve1:8006/api2/json`.
    pub api_url: String,
    /// Token id in `user@realm!name` form.
    pub token_id: String,
    pub token_secret: String,
    /// Node the managed VMs live on.
    pub node: String,
    pub insecure: bool,
    pub request_timeout: Duration,
}

/// Non-2xx answer from the API.
#[derive(Debug, thiserror::Error)]
#[error("{method} {path}: {status} {body}")]
pub struct ApiError {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub body: String,
}

impl ApiError {
    /// The node has no log for the task, e.g. it was rotated away.
    fn is_missing_task(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
            || self.body.to_ascii_lowercase().contains("no such task")
    }
}

/// Every Proxmox API response wraps its payload in `data`.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CurrentStatus {
    status: String,
    #[serde(default)]
    qmpstatus: Option<String>,
    #[serde(default)]
    lock: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
}

/// Map the raw `status/current` fields onto a single power status.
pub fn vm_status(status: &str, qmpstatus: Option<&str>, lock: Option<&str>) -> VmStatus {
    match (status, qmpstatus, lock) {
        ("running", Some("paused"), _) => VmStatus::Paused,
        ("running", _, _) => VmStatus::Running,
        ("stopped", _, Some("suspended")) => VmStatus::Hibernated,
        ("stopped", _, _) => VmStatus::Stopped,
        _ => VmStatus::Unknown,
    }
}

fn task_state(status: &str, exitstatus: Option<&str>) -> TaskState {
    match (status, exitstatus) {
        ("running", _) => TaskState::Running,
        (_, Some("OK")) => TaskState::Succeeded,
        (_, Some(exit)) => TaskState::Failed(exit.to_string()),
        (_, None) => TaskState::Failed(format!("task {} without exit status", status)),
    }
}

/// Client for a single Proxmox VE node.
pub struct ProxmoxClient {
    http: reqwest::Client,
    base: Url,
    node: String,
}

impl ProxmoxClient {
    pub fn new(config: &ProxmoxConfig) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!(
            "PVEAPIToken={}={}",
            config.token_id, config.token_secret
        ))
        .context("Invalid API token")?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .context("Failed to build HTTP client")?;

        let base = Url::parse(config.api_url.trim_end_matches('/')).context("Invalid API URL")?;
        if base.cannot_be_a_base() {
            bail!("API URL {} cannot be used as a base", config.api_url);
        }

        Ok(Self {
            http,
            base,
            node: config.node.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, segments: &[&str]) -> Result<T> {
        let url = self.url(segments);
        debug!(%method, %url, "Proxmox API request");

        let response = self
            .http
            .request(method.clone(), url.clone())
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url.path()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError {
                method,
                path: url.path().to_string(),
                status,
                body: body.trim().to_string(),
            }
            .into());
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", url.path()))?;
        Ok(body.data)
    }

    async fn change_status(&self, vm: &VirtualMachine, action: &str) -> Result<Option<Task>> {
        let vmid = vm.vmid.to_string();
        let upid: Option<String> = self
            .call(
                Method::POST,
                &["nodes", &self.node, "qemu", &vmid, "status", action],
            )
            .await?;
        Ok(upid.map(Task::new))
    }
}

#[async_trait]
impl VmClient for ProxmoxClient {
    async fn resume_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        self.change_status(vm, "resume").await
    }

    async fn start_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        self.change_status(vm, "start").await
    }

    async fn shutdown_vm(&self, vm: &VirtualMachine) -> Result<Option<Task>> {
        self.change_status(vm, "shutdown").await
    }
}

#[async_trait]
impl Hypervisor for ProxmoxClient {
    async fn current_vm(&self, vmid: u32) -> Result<VirtualMachine> {
        let id = vmid.to_string();
        let current: CurrentStatus = self
            .call(
                Method::GET,
                &["nodes", &self.node, "qemu", &id, "status", "current"],
            )
            .await?;

        Ok(VirtualMachine {
            vmid,
            name: current.name,
            status: vm_status(
                &current.status,
                current.qmpstatus.as_deref(),
                current.lock.as_deref(),
            ),
        })
    }

    async fn task_status(&self, upid: &Upid) -> Result<TaskState> {
        // tasks are only known to the node that ran them
        let node = upid.node().unwrap_or(&self.node);
        let result: Result<TaskStatusResponse> = self
            .call(
                Method::GET,
                &["nodes", node, "tasks", upid.as_str(), "status"],
            )
            .await;

        match result {
            Ok(task) => Ok(task_state(&task.status, task.exitstatus.as_deref())),
            Err(e) if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_missing_task) => {
                Ok(TaskState::Gone)
            }
            Err(e) => Err(e),
        }
    }
}
