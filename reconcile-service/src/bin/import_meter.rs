use anyhow::{bail, Result};
use reconcile_service::{config::AppConfig, observability, Reconciler};
use std::{env, path::PathBuf};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        bail!("usage: import_meter <device> <csv_path>");
    }
    let device = &args[1];
    let path = PathBuf::from(&args[2]);

    let cfg = AppConfig::load()?;
    if cfg.meters.find(device).is_none() {
        tracing::warn!(%device, "device is not configured; it will not be part of the household series");
    }

    let reconciler = Reconciler::new(cfg);
    let summary = reconciler.import_meter_file(device, path).await?;
    for reason in &summary.rejected {
        tracing::warn!(%reason, "meter input rejected");
    }
    if summary.accepted == 0 && !summary.rejected.is_empty() {
        bail!("nothing imported from {}", args[2]);
    }
    reconciler.update_household().await?;

    Ok(())
}
