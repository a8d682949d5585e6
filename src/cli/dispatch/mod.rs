use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let api_url = matches
        .get_one::<String>("api-url")
        .cloned()
        .context("missing required argument: --api-url")?;
    let timeout = matches.get_one::<u64>("timeout").copied().unwrap_or(10);

    Ok(Action::Server(Args {
        port,
        api_url,
        timeout,
    }))
}
