use anyhow::{Context, Result};

use skyclaw::host::{HostAgent, HostConfig};

/// Run the host agent until Ctrl+C
pub async fn host_agent(config: HostConfig) -> Result<()> {
    if let Err(e) = skyclaw::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    println!("Starting Host Agent");
    println!("===================");
    println!("  Coordinator: {}", config.coordinator_url);
    println!("  Name: {}", config.host_name);
    println!("  Capabilities: {}", config.capabilities.join(", "));
    println!("  Max Parallel: {}", config.max_parallel);
    println!(
        "  Allowed Commands: {}",
        config.execution.allowed_commands.join(", ")
    );
    println!();

    let agent = HostAgent::new(config).context("Failed to create host agent")?;
    let handle = agent
        .start()
        .await
        .context("Failed to register with coordinator")?;

    if let Some(host) = agent.state().await.host {
        println!("Registered as {} ({})", host.id, host.name);
    }
    println!("Press Ctrl+C to stop.\n");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to wait for Ctrl+C: {}", e);
    }

    tracing::info!("Shutdown signal received, waiting for running jobs");
    handle.shutdown().await;

    let state = agent.state().await;
    println!(
        "Host agent stopped. succeeded={} failed={}",
        state.jobs_succeeded, state.jobs_failed
    );
    Ok(())
}
