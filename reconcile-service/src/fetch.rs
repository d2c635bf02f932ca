//! HTTP retrieval of raw inputs: day-ahead price files and metering device
//! exports.

use std::time::Duration;

use time::Date;

use crate::{pipeline::PipelineError, sources::day_ahead_price};

const USER_AGENT: &str = concat!("reconcile-service/", env!("CARGO_PKG_VERSION"));

/// Device response while another download of the same export is running.
const TRANSFER_BUSY: &str = "Another file transfer is in progress!";

/// Produces the raw bytes of a dated input.
///
/// `Ok(None)` means the input is not published (yet); the date stays missing
/// and is tried again on the next run.
#[async_trait::async_trait]
pub trait RawFetcher: Send + Sync {
    async fn fetch(&self, date: Date) -> Result<Option<Vec<u8>>, PipelineError>;
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| PipelineError::Source(format!("failed to build HTTP client: {e}")))
}

fn failure(target: &str, detail: impl Into<String>) -> PipelineError {
    PipelineError::FetchFailure {
        target: target.to_string(),
        detail: detail.into(),
    }
}

pub struct DayAheadPriceFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl DayAheadPriceFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    pub fn url(&self, date: Date) -> String {
        format!("{}{}", self.base_url, day_ahead_price::file_name(date))
    }
}

#[async_trait::async_trait]
impl RawFetcher for DayAheadPriceFetcher {
    async fn fetch(&self, date: Date) -> Result<Option<Vec<u8>>, PipelineError> {
        let url = self.url(date);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| failure(&url, format!("request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(failure(&url, format!("status {}", response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| failure(&url, format!("failed to read body: {e}")))?;
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            tracing::debug!(%date, "price file not published yet");
            return Ok(None);
        }
        Ok(Some(body.to_vec()))
    }
}

/// Downloads the energy export of one metering device channel.
pub struct MeterDeviceFetcher {
    client: reqwest::Client,
    origin: String,
}

impl MeterDeviceFetcher {
    pub fn new(origin: impl Into<String>, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_client(timeout)?,
            origin: origin.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, channel: u8) -> String {
        format!("{}/emeter/{channel}/em_data.csv", self.origin)
    }

    pub async fn fetch_export(&self, channel: u8) -> Result<Vec<u8>, PipelineError> {
        let url = self.url(channel);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| failure(&url, format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(failure(&url, format!("status {}", response.status())));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| failure(&url, format!("failed to read body: {e}")))?;
        check_export_body(&url, &body)?;
        Ok(body.to_vec())
    }
}

fn check_export_body(url: &str, body: &[u8]) -> Result<(), PipelineError> {
    if String::from_utf8_lossy(body).contains(TRANSFER_BUSY) {
        return Err(failure(url, "device busy with another transfer"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn price_url_appends_file_name() {
        let f = DayAheadPriceFetcher::new("https://prices.example/download?filename=", Duration::from_secs(5)).unwrap();
        assert_eq!(
            f.url(date!(2024 - 04 - 01)),
            "https://prices.example/download?filename=marginalpdbcpt_20240401.1"
        );
    }

    #[test]
    fn meter_url_uses_channel() {
        let f = MeterDeviceFetcher::new("http://10.0.0.5/", Duration::from_secs(5)).unwrap();
        assert_eq!(f.url(1), "http://10.0.0.5/emeter/1/em_data.csv");
    }

    #[test]
    fn busy_device_is_a_fetch_failure() {
        let err = check_export_body("u", b"Another file transfer is in progress!").unwrap_err();
        assert!(matches!(err, PipelineError::FetchFailure { .. }));
        assert!(check_export_body("u", b"Date/time UTC,a,b,c,d\n").is_ok());
    }
}
