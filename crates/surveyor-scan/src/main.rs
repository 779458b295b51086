//! CLI entry point for the surveyor-scan orchestrator.

use std::net::IpAddr;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use surveyor_core::{Address, JobHandle};
use surveyor_store::{Inventory, JobQueue, MemoryInventory, MemoryJobQueue, StoreError};

use surveyor_scan::config::ScanConfig;
use surveyor_scan::{Orchestrator, PluginRegistry};

#[derive(Parser)]
#[command(name = "surveyor-scan")]
#[command(about = "Queue scans of addresses, networks, data centers, or worker queues")]
struct Cli {
    /// Scan the specified networks (names or CIDR ranges).
    #[arg(short, long)]
    networks: bool,

    /// Scan all networks in the specified data centers.
    #[arg(short = 'c', long)]
    data_centers: bool,

    /// Scan all networks that use the specified worker queues.
    #[arg(short, long)]
    queues: bool,

    /// Comma separated plugin ids (default: all configured plugins).
    #[arg(short, long, value_delimiter = ',')]
    plugins: Vec<String>,

    /// Config file prefix (default: surveyor).
    #[arg(long, default_value = "surveyor")]
    config: String,

    /// Addresses, or names when a selection flag is given.
    targets: Vec<String>,
}

enum Selection {
    Addresses(Vec<IpAddr>),
    Networks(Vec<String>),
    DataCenters(Vec<String>),
    Queues(Vec<String>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let selection = parse_selection(&cli)?;

    let config = ScanConfig::load(&cli.config)?;
    let inventory = Arc::new(MemoryInventory::new());
    config.seed(&inventory).await?;
    let queue = Arc::new(MemoryJobQueue::new());

    let orchestrator = Orchestrator::new(
        &config,
        PluginRegistry::with_builtins(),
        inventory.clone(),
        queue.clone(),
    );
    let pool = orchestrator.start_workers(&config.queue_names());

    let handles = dispatch(&orchestrator, inventory.as_ref(), selection, &cli.plugins).await?;
    tracing::info!(jobs = handles.len(), "Waiting for scans to complete");
    queue.wait_idle().await;

    for handle in &handles {
        let report = match queue.fetch(handle.id).await {
            Ok(job) => json!({
                "job_id": job.id,
                "queue": job.queue,
                "address": job.payload.address,
                "state": job.state,
                "failure": job.failure,
                "progress": job.progress,
            }),
            Err(StoreError::JobNotFound(id)) => json!({
                "job_id": id,
                "queue": handle.queue,
                "state": "superseded",
            }),
            Err(e) => return Err(e.into()),
        };
        println!("{report}");
    }

    pool.shutdown().await;
    Ok(())
}

fn parse_selection(cli: &Cli) -> anyhow::Result<Selection> {
    let flags = [cli.networks, cli.data_centers, cli.queues];
    if flags.iter().filter(|f| **f).count() > 1 {
        anyhow::bail!("You can't mix networks, data centers and queues.");
    }
    if cli.targets.is_empty() {
        anyhow::bail!("Please specify the addresses to scan.");
    }

    let targets = cli.targets.clone();
    Ok(if cli.networks {
        Selection::Networks(targets)
    } else if cli.data_centers {
        Selection::DataCenters(targets)
    } else if cli.queues {
        Selection::Queues(targets)
    } else {
        let addresses = targets
            .iter()
            .map(|t| {
                t.parse::<IpAddr>()
                    .map_err(|_| anyhow::anyhow!("Invalid address: {t}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Selection::Addresses(addresses)
    })
}

/// Resolve every target first so a bad name queues nothing.
async fn dispatch(
    orchestrator: &Orchestrator,
    inventory: &dyn Inventory,
    selection: Selection,
    plugins: &[String],
) -> anyhow::Result<Vec<JobHandle>> {
    let dispatcher = orchestrator.dispatcher();
    let mut handles = Vec::new();

    match selection {
        Selection::Addresses(ips) => {
            let mut addresses = Vec::new();
            for ip in ips {
                addresses.push(inventory.address(ip).await?.unwrap_or_else(|| Address::new(ip)));
            }
            for address in &addresses {
                handles.push(dispatcher.dispatch(address, plugins, None).await?);
            }
        }
        Selection::Networks(specs) => {
            let mut networks = Vec::new();
            for spec in &specs {
                networks.push(inventory.find_network(spec).await?);
            }
            for network in &networks {
                handles.extend(dispatcher.dispatch_network(network, plugins).await?);
            }
        }
        Selection::DataCenters(names) => {
            for name in &names {
                inventory.data_center(name).await?;
            }
            for name in &names {
                handles.extend(dispatcher.dispatch_data_center(name, plugins).await?);
            }
        }
        Selection::Queues(names) => {
            for name in &names {
                if !inventory.queue_exists(name).await? {
                    anyhow::bail!("Unknown queue: {name}");
                }
            }
            for name in &names {
                handles.extend(dispatcher.dispatch_queue(name, plugins).await?);
            }
        }
    }

    Ok(handles)
}
