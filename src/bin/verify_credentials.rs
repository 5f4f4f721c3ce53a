use anyhow::Result;
use clap::Parser;
use reply_agent::clients::{ContentFetcher, HttpContentFetcher};
use reply_agent::config;
use reply_agent::error::UpstreamError;
use reply_agent::model::OperationClass;
use reply_agent::rotator::CredentialSet;
use std::path::PathBuf;
use std::time::Duration;

/// Probe every configured fetch credential set against one known item.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Item id every valid credential set can read
    #[arg(long, default_value = "20")]
    item: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let fetcher = HttpContentFetcher::new(
        &cfg.upstream.content_base_url,
        Duration::from_secs(cfg.retry.request_timeout_secs),
    )?;

    if cfg.credentials.fetch.is_empty() {
        println!("No fetch credentials configured.");
        return Ok(());
    }

    let mut valid = 0;
    for (index, cred) in cfg.credentials.fetch.iter().enumerate() {
        let set = CredentialSet::new(OperationClass::Fetch, index, cred.bearer_token.clone());
        let verdict = match fetcher.fetch(&args.item, &set).await {
            Ok(_) => {
                valid += 1;
                "valid".to_string()
            }
            // Rate limited means the token authenticated.
            Err(UpstreamError::RateLimited { .. }) => {
                valid += 1;
                "valid (rate limited)".to_string()
            }
            Err(e) => format!("invalid: {}", e),
        };
        println!("fetch[{}]: {}", index, verdict);
    }
    println!(
        "{}/{} fetch credential sets valid",
        valid,
        cfg.credentials.fetch.len()
    );
    Ok(())
}
