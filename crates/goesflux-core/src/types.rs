use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// GOES XRS wavelength band. The two channels share a timestamp axis but are processed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// 0.05-0.4 nm (XRS-A).
    Short,
    /// 0.1-0.8 nm (XRS-B).
    Long,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Short, Channel::Long];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Short => "short",
            Channel::Long => "long",
        }
    }

    pub fn energy_band(&self) -> &'static str {
        match self {
            Channel::Short => "0.05-0.4nm",
            Channel::Long => "0.1-0.8nm",
        }
    }

    pub fn instrument_label(&self) -> &'static str {
        match self {
            Channel::Short => "goes xrsa",
            Channel::Long => "goes xrsb",
        }
    }

    pub fn from_energy_band(band: &str) -> Option<Self> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.energy_band() == band)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    #[default]
    Nominal,
    ElectronContaminated,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Nominal => "nominal",
            QualityFlag::ElectronContaminated => "electron_contaminated",
        }
    }

    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "electron_contaminated" => QualityFlag::ElectronContaminated,
            _ => QualityFlag::Nominal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxSample {
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    /// Irradiance in W/m^2.
    pub flux: f64,
    pub quality_flag: QualityFlag,
}

impl FluxSample {
    pub fn new(timestamp: DateTime<Utc>, channel: Channel, flux: f64) -> Self {
        Self {
            timestamp,
            channel,
            flux,
            quality_flag: QualityFlag::Nominal,
        }
    }
}

/// Samples exactly as fetched, in upstream order. May hold duplicates and out-of-window rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFluxSeries {
    pub samples: Vec<FluxSample>,
}

impl RawFluxSeries {
    pub fn new(samples: Vec<FluxSample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.samples.iter().any(|sample| sample.channel == channel)
    }
}

/// Deduplicated, windowed, per-channel sorted samples ready for the time-series sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorableSeries {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub short: Vec<FluxSample>,
    pub long: Vec<FluxSample>,
}

impl StorableSeries {
    pub fn len(&self) -> usize {
        self.short.len() + self.long.len()
    }

    pub fn is_empty(&self) -> bool {
        self.short.is_empty() && self.long.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FluxSample> {
        self.short.iter().chain(self.long.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlareEvent {
    pub channel: Channel,
    pub start_ts: DateTime<Utc>,
    pub peak_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub peak_flux: f64,
    pub classification_tag: String,
}
