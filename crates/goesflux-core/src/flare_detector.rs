use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;
use crate::types::{Channel, FlareEvent, FluxSample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassBand {
    pub label: String,
    /// Lower bound of the band in W/m^2.
    pub floor: f64,
}

impl ClassBand {
    pub fn new(label: impl Into<String>, floor: f64) -> Self {
        Self {
            label: label.into(),
            floor,
        }
    }
}

/// Ordered severity breakpoints used to tag a flare by its peak flux.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationTable {
    bands: Vec<ClassBand>,
}

impl ClassificationTable {
    pub fn new(bands: Vec<ClassBand>) -> Result<Self, ConfigError> {
        if bands.is_empty() {
            return Err(ConfigError::Invalid(
                "classification table must contain at least one band".into(),
            ));
        }
        for band in &bands {
            if !(band.floor.is_finite() && band.floor > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "class band '{}' has non-positive floor {}",
                    band.label, band.floor
                )));
            }
        }
        if bands.windows(2).any(|pair| pair[1].floor <= pair[0].floor) {
            return Err(ConfigError::Invalid(
                "classification bands must be strictly ascending by floor".into(),
            ));
        }
        Ok(Self { bands })
    }

    /// The GOES A/B/C/M/X scale.
    pub fn goes_standard() -> Self {
        Self {
            bands: default_class_bands(),
        }
    }

    pub fn bands(&self) -> &[ClassBand] {
        &self.bands
    }

    /// Label of the highest band whose floor is at or below `peak_flux`, followed by the
    /// multiple of that floor truncated to one decimal (`2.5e-5` -> `M2.5`, `9.96e-6` -> `C9.9`).
    /// Peaks under the lowest floor use the lowest band.
    pub fn classify(&self, peak_flux: f64) -> String {
        let band = self
            .bands
            .iter()
            .rev()
            .find(|band| band.floor <= peak_flux)
            .unwrap_or(&self.bands[0]);
        format!("{}{:.1}", band.label, truncate_tenths(peak_flux / band.floor))
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self::goes_standard()
    }
}

/// Truncates to one decimal; the epsilon absorbs representation error such as `3e-4 / 1e-4`.
fn truncate_tenths(ratio: f64) -> f64 {
    (ratio * 10.0 + 1e-9).floor() / 10.0
}

pub fn default_class_bands() -> Vec<ClassBand> {
    vec![
        ClassBand::new("A", 1e-8),
        ClassBand::new("B", 1e-7),
        ClassBand::new("C", 1e-6),
        ClassBand::new("M", 1e-5),
        ClassBand::new("X", 1e-4),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub short_threshold: f64,
    pub long_threshold: f64,
    /// Minimum `end_ts - start_ts` for a run to count as a flare.
    pub min_duration: Duration,
    pub classes: ClassificationTable,
}

impl DetectionConfig {
    pub fn threshold(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Short => self.short_threshold,
            Channel::Long => self.long_threshold,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            short_threshold: 1e-7,
            long_threshold: 1e-6,
            min_duration: Duration::minutes(3),
            classes: ClassificationTable::goes_standard(),
        }
    }
}

/// A run that was still above threshold when the series ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OngoingRun {
    pub channel: Channel,
    pub start_ts: DateTime<Utc>,
    pub peak_ts: DateTime<Utc>,
    pub peak_flux: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionOutcome {
    pub events: Vec<FlareEvent>,
    /// Not emitted as an event until a later fetch sees it close.
    pub ongoing: Option<OngoingRun>,
    /// Closed runs dropped for being shorter than `min_duration`.
    pub discarded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DetectorState {
    Quiet,
    InFlare { start: FluxSample, peak: FluxSample },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ClosedRun {
    start: FluxSample,
    peak: FluxSample,
    end: FluxSample,
}

impl DetectorState {
    /// Quiet -> InFlare on the first sample strictly above threshold.
    /// InFlare -> Quiet on the first sample at or below threshold; that sample is the run's end.
    fn step(self, sample: FluxSample, threshold: f64) -> (DetectorState, Option<ClosedRun>) {
        let above = sample.flux > threshold;
        match self {
            DetectorState::Quiet if above => (
                DetectorState::InFlare {
                    start: sample,
                    peak: sample,
                },
                None,
            ),
            DetectorState::Quiet => (DetectorState::Quiet, None),
            DetectorState::InFlare { start, peak } if above => {
                // strict comparison keeps the earliest sample on ties
                let peak = if sample.flux > peak.flux { sample } else { peak };
                (DetectorState::InFlare { start, peak }, None)
            }
            DetectorState::InFlare { start, peak } => (
                DetectorState::Quiet,
                Some(ClosedRun {
                    start,
                    peak,
                    end: sample,
                }),
            ),
        }
    }
}

/// Finds flare runs for `channel` in `samples`, which must be sorted ascending by timestamp.
/// Samples from the other channel are ignored.
pub fn detect_flares(
    samples: &[FluxSample],
    channel: Channel,
    config: &DetectionConfig,
) -> DetectionOutcome {
    let threshold = config.threshold(channel);
    let mut state = DetectorState::Quiet;
    let mut outcome = DetectionOutcome::default();

    for sample in samples.iter().filter(|s| s.channel == channel) {
        let (next, closed) = state.step(*sample, threshold);
        state = next;

        let Some(run) = closed else {
            continue;
        };

        if run.end.timestamp - run.start.timestamp < config.min_duration {
            debug!(
                channel = %channel,
                start = %run.start.timestamp,
                end = %run.end.timestamp,
                "discarding flare run shorter than minimum duration"
            );
            outcome.discarded += 1;
            continue;
        }

        outcome.events.push(FlareEvent {
            channel,
            start_ts: run.start.timestamp,
            peak_ts: run.peak.timestamp,
            end_ts: run.end.timestamp,
            peak_flux: run.peak.flux,
            classification_tag: config.classes.classify(run.peak.flux),
        });
    }

    if let DetectorState::InFlare { start, peak } = state {
        debug!(
            channel = %channel,
            start = %start.timestamp,
            "flare run still open at end of series; not emitting"
        );
        outcome.ongoing = Some(OngoingRun {
            channel,
            start_ts: start.timestamp,
            peak_ts: peak.timestamp,
            peak_flux: peak.flux,
        });
    }

    outcome
}
