use anyhow::{Context, Result};

use skyclaw::coordinator::{ClientConfig, CoordinatorClient};
use skyclaw::models::{EnqueueJobRequest, RequirementInput};

/// Submit a job and print its id
pub async fn enqueue(
    client_config: ClientConfig,
    payload: skyclaw::models::JobPayload,
    required: Vec<String>,
) -> Result<()> {
    let client = CoordinatorClient::new(client_config)?;
    let request = EnqueueJobRequest {
        payload,
        requirement: Some(RequirementInput {
            required_capabilities: required,
        }),
    };

    let job = client
        .enqueue(&request)
        .await
        .context("Failed to enqueue job")?;

    tracing::info!(job_id = %job.id, kind = job.payload.kind(), "Job enqueued");
    println!("{}", job.id);
    Ok(())
}

/// Print the coordinator snapshot as JSON
pub async fn state(client_config: ClientConfig) -> Result<()> {
    let client = CoordinatorClient::new(client_config)?;
    let snapshot = client
        .state()
        .await
        .context("Failed to fetch coordinator state")?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
