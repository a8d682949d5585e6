use crate::{api::ApiConfig, host};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub api_url: String,
    pub timeout: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the API URL is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        port = args.port,
        api_url = %args.api_url,
        timeout = args.timeout,
        "Starting host"
    );

    let config = ApiConfig::new(&args.api_url)
        .context("invalid TOLLGATE_API_URL")?
        .with_timeout(Duration::from_secs(args.timeout));

    host::new(args.port, config).await
}
