use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_console::config::ConfigStore;
use fleet_console::db::{self, ActivityRepo, DiscoveryRepo};
use fleet_console::discovery::{self, DiscoveryEngine, DiscoveryRequest, SupervisorProber};
use fleet_console::nodes::{Credentials, Fleet, monitor, state_label};
use fleet_console::{Config, Daemon, fleet};

/// Fleet - operations console for process-supervisor fleets
#[derive(Parser)]
#[command(name = "fleet", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "FLEET_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Check a CIDR range and print its host count
    ValidateCidr {
        /// Range to check, e.g. 192.168.1.0/24
        cidr: String,
    },
    /// Print every process on the configured nodes, grouped by name
    Processes,
    /// Scan a range for supervisor daemons and print what answered
    Scan {
        /// Range to scan
        cidr: String,
        /// Candidate supervisor port
        #[arg(short, long, default_value = "9001")]
        port: u16,
        /// Username to authenticate probes with
        #[arg(short, long)]
        username: String,
        /// Password to authenticate probes with
        #[arg(long, env = "FLEET_SCAN_PASSWORD", hide_env_values = true, default_value = "")]
        password: String,
        /// Per-probe timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Concurrent probes
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,fleet_console=info",
        1 => "info,fleet_console=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::ValidateCidr { cidr } => validate_cidr(&cidr),
            Command::Processes => processes().await,
            Command::Scan {
                cidr,
                port,
                username,
                password,
                timeout,
                workers,
            } => {
                let request = DiscoveryRequest {
                    cidr,
                    port,
                    credentials: Credentials::new(username, password),
                    timeout_seconds: timeout,
                    max_workers: workers,
                    created_by: "cli".to_string(),
                };
                scan(request).await
            }
        };
    }

    let config = Config::load()?;
    let port = cli.port.unwrap_or(config.api_server.port);
    tracing::info!(port, nodes = config.nodes.len(), "starting fleet console");
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config, port)?;
    daemon.run().await?;

    Ok(())
}

fn validate_cidr(cidr: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let summary = discovery::validate_cidr(cidr, config.settings.max_hosts_per_scan)?;
    println!("{}: {} hosts", summary.cidr, summary.host_count);
    Ok(())
}

async fn processes() -> anyhow::Result<()> {
    let config = Config::load()?;
    if config.nodes.is_empty() {
        println!("No nodes configured.");
        return Ok(());
    }

    let nodes = Fleet::from_config(&config.nodes)?;
    let connected = monitor::check_all(&nodes).await;
    println!("{connected}/{} nodes reachable\n", nodes.len());

    let aggregated = fleet::sorted_processes(fleet::aggregate(&nodes.list()).await);
    if aggregated.is_empty() {
        println!("No processes found.");
        return Ok(());
    }

    println!(
        "{:<32} {:>7} {:>7} {:>7}",
        "PROCESS", "TOTAL", "RUNNING", "STOPPED"
    );
    for process in &aggregated {
        println!(
            "{:<32} {:>7} {:>7} {:>7}",
            process.name,
            process.total_instances,
            process.running_instances,
            process.stopped_instances
        );
        for instance in &process.instances {
            println!(
                "  {:<30} {:<10} pid {:<8} up {}s",
                instance.node_name,
                state_label(instance.state),
                instance.pid,
                instance.uptime_secs
            );
        }
    }
    Ok(())
}

async fn scan(request: DiscoveryRequest) -> anyhow::Result<()> {
    let config = Config::load()?;
    let pool = db::init_memory()?;
    let engine = Arc::new(DiscoveryEngine::new(
        DiscoveryRepo::new(pool.clone()),
        ActivityRepo::new(pool),
        Arc::new(SupervisorProber::new()),
        Arc::new(ConfigStore::new(config.settings)),
    ));

    let task = engine.start(request)?;
    println!(
        "Scanning {} port {} ({} hosts, {} workers)...",
        task.cidr, task.port, task.total_ips, task.max_workers
    );

    let mut last_scanned = 0;
    let task = loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let current = engine.get(&task.id)?;
        if current.scanned_ips != last_scanned {
            last_scanned = current.scanned_ips;
            tracing::info!(
                scanned = current.scanned_ips,
                total = current.total_ips,
                found = current.found_nodes,
                "scan progress"
            );
        }
        if current.status.is_terminal() {
            break current;
        }
    };

    println!(
        "\n{}: scanned {}/{}, found {}, failed {}",
        task.status, task.scanned_ips, task.total_ips, task.found_nodes, task.failed_ips
    );
    if let Some(error) = &task.error {
        println!("error: {error}");
    }
    for result in engine.results(&task.id)? {
        println!(
            "  {:<40} {}:{} {}",
            result.node_name,
            result.ip,
            result.port,
            result.version.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
