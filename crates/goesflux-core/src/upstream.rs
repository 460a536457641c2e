//! Read-only access to the NOAA SWPC GOES X-ray flux feeds.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::error::MalformedSeriesError;
use crate::types::{Channel, FluxSample, QualityFlag, RawFluxSeries};

#[derive(Debug, Error)]
pub enum UpstreamFetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("malformed upstream row: {0}")]
    MalformedRow(#[from] MalformedSeriesError),

    #[error("no published feed covers {0} days")]
    UnsupportedWindow(u32),
}

#[async_trait]
pub trait FluxProvider: Send + Sync {
    /// Fetches at least `days` worth of samples for both channels.
    async fn fetch_flux_series(&self, days: u32) -> Result<RawFluxSeries, UpstreamFetchError>;
}

/// One row of the SWPC `xrays-N-day.json` feed.
#[derive(Debug, Clone, Deserialize)]
pub struct SwpcFluxRow {
    pub time_tag: String,
    #[serde(default)]
    pub satellite: Option<u32>,
    pub flux: Option<f64>,
    pub energy: String,
    // the feed spells this field without the second "i"
    #[serde(default, alias = "electron_contaminaton")]
    pub electron_contamination: Option<bool>,
}

impl SwpcFluxRow {
    /// `Ok(None)` for rows the feed publishes without a flux value.
    pub fn into_sample(self) -> Result<Option<FluxSample>, MalformedSeriesError> {
        let channel = Channel::from_energy_band(&self.energy)
            .ok_or_else(|| MalformedSeriesError::UnknownEnergyBand(self.energy.clone()))?;
        let timestamp = parse_time_tag(&self.time_tag)?;
        let Some(flux) = self.flux else {
            return Ok(None);
        };
        let quality_flag = if self.electron_contamination.unwrap_or(false) {
            QualityFlag::ElectronContaminated
        } else {
            QualityFlag::Nominal
        };
        Ok(Some(FluxSample {
            timestamp,
            channel,
            flux,
            quality_flag,
        }))
    }
}

pub fn parse_time_tag(value: &str) -> Result<DateTime<Utc>, MalformedSeriesError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| MalformedSeriesError::InvalidTimestamp(value.to_string()))
}

/// Converts decoded feed rows to a raw series, preserving upstream order.
pub fn rows_to_series(rows: Vec<SwpcFluxRow>) -> Result<RawFluxSeries, MalformedSeriesError> {
    let mut samples = Vec::with_capacity(rows.len());
    let mut missing_flux = 0usize;
    for row in rows {
        match row.into_sample()? {
            Some(sample) => samples.push(sample),
            None => missing_flux += 1,
        }
    }
    if missing_flux > 0 {
        warn!(rows = missing_flux, "dropped upstream rows without a flux value");
    }
    Ok(RawFluxSeries::new(samples))
}

/// Smallest published feed span covering `days`.
pub fn feed_days(days: u32) -> Result<u32, UpstreamFetchError> {
    match days {
        1 => Ok(1),
        2..=3 => Ok(3),
        4..=7 => Ok(7),
        other => Err(UpstreamFetchError::UnsupportedWindow(other)),
    }
}

#[derive(Debug, Clone)]
pub struct SwpcClient {
    client: reqwest::Client,
    base_url: String,
    satellite: String,
}

impl SwpcClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamFetchError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .connect_timeout(StdDuration::from_secs(10))
            .build()
            .map_err(|source| UpstreamFetchError::Transport {
                url: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            satellite: config.satellite.clone(),
        })
    }

    pub fn feed_url(&self, days: u32) -> Result<String, UpstreamFetchError> {
        let span = feed_days(days)?;
        Ok(format!(
            "{}/json/goes/{}/xrays-{}-day.json",
            self.base_url, self.satellite, span
        ))
    }
}

#[async_trait]
impl FluxProvider for SwpcClient {
    async fn fetch_flux_series(&self, days: u32) -> Result<RawFluxSeries, UpstreamFetchError> {
        let url = self.feed_url(days)?;
        debug!(%url, "fetching GOES XRS feed");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| UpstreamFetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamFetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let rows: Vec<SwpcFluxRow> = response
            .json()
            .await
            .map_err(|err| UpstreamFetchError::Decode {
                url: url.clone(),
                message: err.to_string(),
            })?;

        let series = rows_to_series(rows)?;
        info!(%url, samples = series.len(), "fetched GOES XRS feed");
        Ok(series)
    }
}
