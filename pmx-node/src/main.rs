//! pmx-node: power-state agent for Proxmox VMs.
//!
//! This daemon:
//! - Observes a VM on a Proxmox VE node
//! - Runs the power reconciler until the VM matches its declared target
//! - Polls started tasks and persists the machine status between passes
//! - Renders cloud-init network-config documents

use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use pmx_cloudinit::{NetworkConfig, NetworkConfigData};
use pmx_power::{Machine, PowerReconciler, PowerTarget, VirtualMachine, VmStatus};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clients;
mod driver;

use clients::{ProxmoxClient, ProxmoxConfig};
use driver::{Driver, DriverConfig, DriverExit};

/// pmx Node Agent
#[derive(Parser, Debug)]
#[command(name = "pmx-node", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile the power state of a VM until it matches the target
    Power(PowerArgs),

    /// Render a cloud-init network-config from a JSON list of NICs
    NetworkConfig(NetworkConfigArgs),
}

#[derive(Args, Debug)]
struct ProxmoxArgs {
    /// Proxmox API base URL (e.g., https://pve1:8006/api2/json)
    #[arg(long, env = "PMX_API_URL")]
    api_url: String,

    /// API token id (user@realm!name)
    #[arg(long, env = "PMX_TOKEN_ID")]
    token_id: String,

    /// API token secret
    #[arg(long, env = "PMX_TOKEN_SECRET", hide_env_values = true)]
    token_secret: String,

    /// Proxmox node name (defaults to hostname)
    #[arg(long, env = "PMX_NODE")]
    node: Option<String>,

    /// Accept self-signed TLS certificates
    #[arg(long)]
    insecure: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,
}

#[derive(Args, Debug)]
struct PowerArgs {
    #[command(flatten)]
    proxmox: ProxmoxArgs,

    /// VM id
    vmid: u32,

    /// Desired power state (on or off)
    #[arg(long, default_value = "on")]
    target: PowerTarget,

    /// Network address assigned to the machine (repeatable)
    #[arg(long = "address")]
    addresses: Vec<IpAddr>,

    /// Seconds to wait before the next pass while converging
    #[arg(long, default_value = "10")]
    requeue_after: u64,

    /// Initial backoff in seconds after a failed pass
    #[arg(long, default_value = "5")]
    backoff_initial: u64,

    /// Maximum backoff in seconds
    #[arg(long, default_value = "300")]
    backoff_max: u64,

    /// Stop after this many passes
    #[arg(long)]
    max_passes: Option<u64>,

    /// File to persist the machine status (task reference, conditions)
    #[arg(long)]
    status_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct NetworkConfigArgs {
    /// JSON file with a list of NIC descriptions
    #[arg(long)]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pmx_node=info,pmx_power=info,pmx_cloudinit=info,reqwest=warn,hyper=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Power(args) => power(args).await,
        Command::NetworkConfig(args) => network_config(args).await,
    }
}

async fn power(args: PowerArgs) -> Result<()> {
    // Get node name from args or hostname
    let node = args.proxmox.node.unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string())
    });

    info!("Starting pmx-node power agent for VM {} on {}", args.vmid, node);
    info!("API endpoint: {}", args.proxmox.api_url);

    let client = ProxmoxClient::new(&ProxmoxConfig {
        api_url: args.proxmox.api_url,
        token_id: args.proxmox.token_id,
        token_secret: args.proxmox.token_secret,
        node,
        insecure: args.proxmox.insecure,
        request_timeout: Duration::from_secs(args.proxmox.request_timeout),
    })?;

    // the two halves share one connection pool
    let client = std::sync::Arc::new(client);

    let mut machine = Machine::new(VirtualMachine::new(args.vmid, VmStatus::Unknown), args.target)
        .with_addresses(args.addresses);
    if let Some(path) = &args.status_file {
        if let Some(status) = driver::load_status(path).await? {
            info!(task_ref = ?status.task_ref, "Restored machine status from {}", path.display());
            machine.status = status;
        }
    }

    let driver = Driver::new(
        std::sync::Arc::clone(&client),
        PowerReconciler::new(client),
        DriverConfig {
            requeue_after: Duration::from_secs(args.requeue_after),
            backoff_initial: Duration::from_secs(args.backoff_initial),
            backoff_max: Duration::from_secs(args.backoff_max),
            max_passes: args.max_passes,
            status_file: args.status_file,
        },
    );

    let shutdown = shutdown_signal(tokio::signal::ctrl_c());

    match driver.run(&mut machine, shutdown).await? {
        DriverExit::Converged { passes } => {
            info!("VM {} is {} after {} passes", args.vmid, args.target, passes);
            Ok(())
        }
        DriverExit::Interrupted => Ok(()),
        DriverExit::PassLimit { passes } => {
            bail!("VM {} did not converge after {} passes", args.vmid, passes)
        }
    }
}

/// Resolves once `signal` fires. When the handler cannot be installed this
/// never resolves, so the loop keeps running until it converges.
async fn shutdown_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            warn!(error = %e, "Failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    }
}

async fn network_config(args: NetworkConfigArgs) -> Result<()> {
    let input = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let nics: Vec<NetworkConfigData> =
        serde_json::from_slice(&input).context("Invalid NIC description")?;

    let rendered = NetworkConfig::new(nics).render()?;

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, &rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote network-config to {}", path.display());
        }
        None => {
            use tokio::io::AsyncWriteExt;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&rendered).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}
