use anyhow::{bail, Context, Result};
use reconcile_service::{config::AppConfig, observability, Reconciler};
use std::env;
use time::{macros::format_description, Date, OffsetDateTime};

fn parse_date(arg: &str) -> Result<Date> {
    Date::parse(arg, format_description!("[year]-[month]-[day]"))
        .with_context(|| format!("invalid date '{arg}', expected YYYY-MM-DD"))
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() > 3 {
        bail!("usage: backfill_prices [start YYYY-MM-DD] [end YYYY-MM-DD]");
    }

    let cfg = AppConfig::load()?;
    let start = match args.get(1) {
        Some(arg) => parse_date(arg)?,
        None => cfg.pricing.data_start,
    };
    let end = match args.get(2) {
        Some(arg) => parse_date(arg)?,
        None => OffsetDateTime::now_utc().date().next_day().unwrap_or(Date::MAX),
    };

    let report = Reconciler::new(cfg).backfill_prices(start, end).await?;
    for (date, error) in &report.failed {
        tracing::error!(%date, %error, "price file not fetched");
    }
    if !report.failed.is_empty() {
        bail!("{} price files failed to download", report.failed.len());
    }

    Ok(())
}
