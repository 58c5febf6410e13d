use augur::services::{jobs, SqlitePriceLookup};
use augur::{CancelFlag, Config, SignalAnalytics, SqliteStore};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "augur=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    config.validate()?;
    info!(
        "Starting Augur worker {} on {}",
        config.worker_id, config.database_path
    );

    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    let prices = Arc::new(SqlitePriceLookup::new(store.clone(), config.price_tolerance));
    let analytics = SignalAnalytics::new(store.clone(), prices, &config);

    if let Some(ref redis_url) = config.redis_url {
        analytics.connect_redis(redis_url).await;
    }

    let summary = analytics.get_tracking_summary()?;
    info!(
        "Outcomes: {} total, {} pending, {} partial, {} complete, {} stale",
        summary.total, summary.pending, summary.partial, summary.complete, summary.stale
    );

    let cancel = CancelFlag::new();

    let tracker_task = tokio::spawn(jobs::run_tracker(
        analytics.tracker().clone(),
        config.jobs.clone(),
        cancel.clone(),
    ));
    let cluster_task = tokio::spawn(jobs::run_cluster_rebuild(
        analytics.clusterer().clone(),
        config.jobs.cluster_rebuild_interval,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for in-flight batches");
    cancel.cancel();

    for (name, task) in [("tracker", tracker_task), ("cluster rebuild", cluster_task)] {
        if let Err(e) = task.await {
            error!("{} job ended abnormally: {}", name, e);
        }
    }

    info!("Augur stopped");
    Ok(())
}
