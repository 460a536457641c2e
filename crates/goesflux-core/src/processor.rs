use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::config::{ConfigError, DetectionSettings};
use crate::error::MalformedSeriesError;
use crate::flare_detector::{detect_flares, DetectionConfig, DetectionOutcome, OngoingRun};
use crate::normalize::{normalize_channel, normalize_window};
use crate::types::{Channel, FlareEvent, RawFluxSeries, StorableSeries};

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFlux {
    pub storable: StorableSeries,
    pub flares: Vec<FlareEvent>,
}

/// Per-channel detection result for callers that tolerate one bad channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFlares {
    pub channel: Channel,
    pub outcome: DetectionOutcome,
}

/// Turns a freshly fetched raw series into a storable window plus detected flares.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxSeriesProcessor {
    storage_window: Duration,
    lookback: Duration,
    detection: DetectionConfig,
}

impl FluxSeriesProcessor {
    pub fn new(storage_window: Duration, lookback: Duration, detection: DetectionConfig) -> Self {
        Self {
            storage_window,
            lookback,
            detection,
        }
    }

    pub fn from_settings(settings: &DetectionSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(
            settings.storage_window(),
            settings.lookback(),
            settings.detection_config()?,
        ))
    }

    /// Whole days the upstream fetch must span to cover the storage window.
    pub fn storage_days(&self) -> u32 {
        whole_days(self.storage_window)
    }

    /// Whole days the upstream fetch must span to cover the lookback window.
    pub fn lookback_days(&self) -> u32 {
        whole_days(self.lookback)
    }

    /// Normalizes `raw` into the trailing storage window ending at `now`.
    pub fn normalize(
        &self,
        raw: &RawFluxSeries,
        now: DateTime<Utc>,
    ) -> Result<StorableSeries, MalformedSeriesError> {
        normalize_window(raw, now - self.storage_window, now)
    }

    /// Runs detection for a single channel over the lookback window ending at `now`.
    pub fn process_channel(
        &self,
        raw: &RawFluxSeries,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<ChannelFlares, MalformedSeriesError> {
        let samples = normalize_channel(raw, channel, now - self.lookback, now)?;
        let outcome = detect_flares(&samples, channel, &self.detection);
        Ok(ChannelFlares { channel, outcome })
    }

    pub fn detect(
        &self,
        raw: &RawFluxSeries,
        now: DateTime<Utc>,
    ) -> Result<Vec<FlareEvent>, MalformedSeriesError> {
        let mut flares = Vec::new();
        for channel in Channel::ALL {
            flares.extend(self.process_channel(raw, channel, now)?.outcome.events);
        }
        sort_events(&mut flares);
        Ok(flares)
    }

    /// Storage series for the trailing window plus flares from the (longer) lookback window.
    pub fn process(
        &self,
        raw: &RawFluxSeries,
        now: DateTime<Utc>,
    ) -> Result<ProcessedFlux, MalformedSeriesError> {
        let storable = self.normalize(raw, now)?;
        let flares = self.detect(raw, now)?;
        info!(
            short_samples = storable.short.len(),
            long_samples = storable.long.len(),
            flares = flares.len(),
            "processed flux series"
        );
        Ok(ProcessedFlux { storable, flares })
    }
}

impl Default for FluxSeriesProcessor {
    fn default() -> Self {
        Self::new(
            Duration::hours(24),
            Duration::days(7),
            DetectionConfig::default(),
        )
    }
}

fn whole_days(window: Duration) -> u32 {
    let hours = window.num_hours().max(1);
    ((hours + 23) / 24) as u32
}

pub fn sort_events(events: &mut [FlareEvent]) {
    events.sort_by(|a, b| {
        a.start_ts
            .cmp(&b.start_ts)
            .then_with(|| a.channel.cmp(&b.channel))
    });
}

pub fn ongoing_runs(channels: &[ChannelFlares]) -> Vec<OngoingRun> {
    channels
        .iter()
        .filter_map(|c| c.outcome.ongoing.clone())
        .collect()
}
