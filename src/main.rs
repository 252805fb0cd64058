use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyclaw::config::Config;
use skyclaw::coordinator::ClientConfig;
use skyclaw::models::{AutomatonRunPayload, JobPayload, ShellPayload};

mod commands;

#[derive(Parser)]
#[command(
    name = "skyclaw",
    version,
    about = "Lease-based compute job coordinator and worker host",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a coordinator node
    Coordinator {
        /// Bind port
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Node id reported to peers
        #[arg(long)]
        node_id: Option<String>,

        /// Peer coordinator URL (repeatable)
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Minimum replica count including this node
        #[arg(long)]
        min_replicas: Option<usize>,

        /// Disable per-request logging
        #[arg(long, default_value = "false")]
        no_request_logging: bool,
    },

    /// Run a worker host
    Host {
        /// Coordinator URL
        #[arg(long)]
        coordinator_url: Option<String>,

        /// Host name
        #[arg(long)]
        name: Option<String>,

        /// Capability tags (comma separated)
        #[arg(long, value_delimiter = ',')]
        capabilities: Option<Vec<String>>,

        /// Concurrent jobs
        #[arg(long)]
        max_parallel: Option<u32>,
    },

    /// Enqueue a shell job
    EnqueueShell {
        /// Command to run
        command: String,

        /// Command arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Extra required capabilities (comma separated)
        #[arg(long, value_delimiter = ',')]
        require: Vec<String>,

        /// Working directory on the host
        #[arg(long)]
        cwd: Option<String>,

        /// Per-job timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Enqueue an automaton run
    EnqueueAutomaton {
        /// Automaton arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Automaton working directory on the host
        #[arg(long)]
        dir: Option<String>,

        /// Extra required capabilities (comma separated)
        #[arg(long, value_delimiter = ',')]
        require: Vec<String>,

        /// Per-job timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print the coordinator state as JSON
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    // Initialize tracing/logging
    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Coordinator {
            port,
            db_path,
            node_id,
            peers,
            min_replicas,
            no_request_logging,
        } => {
            let coordinator = &mut config.coordinator;
            if let Some(port) = port {
                coordinator.bind_address.set_port(port);
            }
            if db_path.is_some() {
                coordinator.db_path = db_path;
            }
            if node_id.is_some() {
                coordinator.node_id = node_id;
            }
            if !peers.is_empty() {
                coordinator.peer_urls = peers;
            }
            if min_replicas.is_some() {
                coordinator.min_replicas = min_replicas;
            }
            if no_request_logging {
                coordinator.enable_request_logging = false;
            }

            tracing::info!(
                bind = %coordinator.bind_address,
                peers = coordinator.peer_urls.len(),
                "Starting coordinator command"
            );
            commands::coordinator_server(config.coordinator).await?;
        }

        Commands::Host {
            coordinator_url,
            name,
            capabilities,
            max_parallel,
        } => {
            let host = &mut config.host;
            if let Some(url) = coordinator_url {
                host.coordinator_url = url;
            }
            if let Some(name) = name {
                host.host_name = name;
            }
            if let Some(capabilities) = capabilities {
                host.capabilities = capabilities;
            }
            if let Some(n) = max_parallel {
                host.max_parallel = n;
            }

            tracing::info!(coordinator = %host.coordinator_url, "Starting host command");
            commands::host_agent(config.host).await?;
        }

        Commands::EnqueueShell {
            command,
            args,
            require,
            cwd,
            timeout_ms,
        } => {
            let payload = JobPayload::Shell(ShellPayload {
                command,
                args,
                cwd,
                timeout_ms,
                ..Default::default()
            });
            let required = with_default_tag("shell", require);
            commands::enqueue(client_config(&config), payload, required).await?;
        }

        Commands::EnqueueAutomaton {
            args,
            dir,
            require,
            timeout_ms,
        } => {
            let payload = JobPayload::AutomatonRun(AutomatonRunPayload {
                args,
                automaton_dir: dir,
                timeout_ms,
                ..Default::default()
            });
            let required = with_default_tag("automaton", require);
            commands::enqueue(client_config(&config), payload, required).await?;
        }

        Commands::State => {
            commands::state(client_config(&config)).await?;
        }
    }

    Ok(())
}

fn client_config(config: &Config) -> ClientConfig {
    ClientConfig::new(&config.host.coordinator_url)
        .with_token(config.host.token.clone())
        .with_timeout(config.host.request_timeout())
        .with_retry_count(0)
}

fn with_default_tag(tag: &str, mut extra: Vec<String>) -> Vec<String> {
    extra.insert(0, tag.to_string());
    extra
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("skyclaw=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("skyclaw={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
