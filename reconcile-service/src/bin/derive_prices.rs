use anyhow::Result;
use reconcile_service::{config::AppConfig, observability, Reconciler};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let reconciler = Reconciler::new(cfg);

    let derivation = reconciler.derive_prices().await?;
    tracing::info!(
        records = derivation.records.len(),
        join_gaps = derivation.join_gaps.len(),
        "retail price series rewritten"
    );
    reconciler.log_summaries().await?;

    Ok(())
}
