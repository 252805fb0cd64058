use anyhow::{Context, Result};

use skyclaw::coordinator::{CoordinatorConfig, CoordinatorServer};

/// Start the coordinator server
pub async fn coordinator_server(config: CoordinatorConfig) -> Result<()> {
    if let Err(e) = skyclaw::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let server = CoordinatorServer::new(config.clone()).context(
        "Failed to create coordinator server (a single node needs SKYCLAW_MIN_REPLICAS=1)",
    )?;

    println!("{}", server.info().display());
    println!();
    println!("API Endpoints:");
    println!("  GET  /health                   - Health check");
    println!("  GET  /metrics                  - Prometheus metrics endpoint");
    println!("  GET  /v1/state                 - Full snapshot");
    println!("  POST /v1/replicate/snapshot    - Merge a peer snapshot");
    println!("  POST /v1/hosts/register        - Register a host");
    println!("  POST /v1/hosts/{{id}}/heartbeat  - Host heartbeat");
    println!("  POST /v1/hosts/{{id}}/claim      - Lease the next matching job");
    println!("  POST /v1/jobs                  - Enqueue a job");
    println!("  POST /v1/jobs/{{id}}/complete    - Report a job outcome");
    println!();
    println!(
        "Coordinator server listening on http://{}",
        config.bind_address
    );
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Coordinator server stopped.");
    Ok(())
}
