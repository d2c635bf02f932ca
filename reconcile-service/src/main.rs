use anyhow::Result;
use reconcile_service::{config::AppConfig, metrics_server, observability, Reconciler};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    Reconciler::new(cfg).run_all().await?;

    Ok(())
}
