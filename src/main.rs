use anyhow::{Context, Result};
use clap::Parser;
use reply_agent::actions::QueueActions;
use reply_agent::api::{build_router, AppState};
use reply_agent::clients::{HttpContentFetcher, HttpPaymentVerifier, HttpPublisher, HttpReplyGenerator};
use reply_agent::executor::RetryExecutor;
use reply_agent::journal::Journal;
use reply_agent::pipeline::{BatchManager, Pipeline};
use reply_agent::quota::{PaymentGate, QuotaGate};
use reply_agent::{config, db};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print an example config and exit
    #[arg(long)]
    print_example_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if args.print_example_config {
        print!("{}", config::example());
        return Ok(());
    }
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let cleared = db::clear_claims(&pool).await?;
    if cleared > 0 {
        info!(cleared, "released publish claims left by a previous process");
    }

    let timeout = Duration::from_secs(cfg.retry.request_timeout_secs);
    let executor = Arc::new(RetryExecutor::from_config(&cfg));
    let journal = Journal::new(pool.clone());

    let mut quota = QuotaGate::new(pool.clone(), cfg.quota.daily_publish_cap);
    if cfg.payment.enabled {
        let url = cfg.payment.verifier_url.as_deref().unwrap_or_default();
        let verifier = HttpPaymentVerifier::new(url, timeout)?;
        quota = quota.with_payment(PaymentGate::new(Arc::new(verifier), cfg.payment.requirements.clone()));
    }
    let quota = Arc::new(quota);

    let pipeline = Pipeline::new(
        pool.clone(),
        Arc::clone(&executor),
        Arc::new(HttpContentFetcher::new(&cfg.upstream.content_base_url, timeout)?),
        Arc::new(HttpReplyGenerator::new(
            &cfg.upstream.generator_base_url,
            cfg.upstream.generator_model.clone(),
            timeout,
        )?),
        journal.clone(),
    )
    .with_item_pause(Duration::from_millis(cfg.retry.item_pause_ms));
    let batches = BatchManager::new(pipeline, Arc::clone(&quota));
    let actions = QueueActions::new(
        pool.clone(),
        executor,
        Arc::new(HttpPublisher::new(&cfg.upstream.content_base_url, timeout)?),
        quota,
        journal,
    );

    let state = AppState::new(batches.clone(), actions, cfg.app.log_poll_limit);
    let listener = tokio::net::TcpListener::bind(&cfg.app.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.bind))?;
    info!(bind = %cfg.app.bind, "listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested; stopping active runs");
            batches.stop_all();
        })
        .await?;
    Ok(())
}
