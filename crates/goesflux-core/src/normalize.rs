use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::MalformedSeriesError;
use crate::types::{Channel, FluxSample, RawFluxSeries, StorableSeries};

/// Restricts `raw` to `[window_start, window_end]` (both inclusive) and deduplicates each channel.
///
/// Each channel in `raw` must be non-decreasing in time. When several samples share a
/// `(timestamp, channel)` the one appearing later in `raw` wins, matching how re-fetched rows
/// supersede earlier transmissions. Both channels must be present somewhere in `raw`; a channel
/// with no samples inside the window yields an empty vector.
pub fn normalize_window(
    raw: &RawFluxSeries,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<StorableSeries, MalformedSeriesError> {
    let short = normalize_channel(raw, Channel::Short, window_start, window_end)?;
    let long = normalize_channel(raw, Channel::Long, window_start, window_end)?;

    Ok(StorableSeries {
        window_start,
        window_end,
        short,
        long,
    })
}

/// Single-channel form of [`normalize_window`], so callers can recover per channel.
pub fn normalize_channel(
    raw: &RawFluxSeries,
    channel: Channel,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<FluxSample>, MalformedSeriesError> {
    if !raw.has_channel(channel) {
        return Err(MalformedSeriesError::MissingChannel(channel));
    }

    let mut by_timestamp: BTreeMap<DateTime<Utc>, FluxSample> = BTreeMap::new();
    let mut previous: Option<DateTime<Utc>> = None;
    for sample in raw.samples.iter().filter(|s| s.channel == channel) {
        if previous.is_some_and(|prev| sample.timestamp < prev) {
            return Err(MalformedSeriesError::NonMonotonic {
                channel,
                timestamp: sample.timestamp,
            });
        }
        previous = Some(sample.timestamp);

        if sample.timestamp < window_start || sample.timestamp > window_end {
            continue;
        }
        validate_flux(sample)?;
        by_timestamp.insert(sample.timestamp, *sample);
    }

    Ok(by_timestamp.into_values().collect())
}

fn validate_flux(sample: &FluxSample) -> Result<(), MalformedSeriesError> {
    if sample.flux.is_finite() && sample.flux >= 0.0 {
        Ok(())
    } else {
        Err(MalformedSeriesError::InvalidFlux {
            channel: sample.channel,
            timestamp: sample.timestamp,
            value: sample.flux,
        })
    }
}
