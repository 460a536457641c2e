use chrono::{Duration, TimeZone, Utc};

use goesflux_core::error::MalformedSeriesError;
use goesflux_core::normalize::normalize_window;
use goesflux_core::types::{Channel, FluxSample, RawFluxSeries};

fn base() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap()
}

#[test]
fn window_bounds_are_inclusive_and_outside_rows_dropped() {
    let start = base();
    let end = start + Duration::hours(1);
    let raw = RawFluxSeries::new(vec![
        FluxSample::new(start - Duration::minutes(1), Channel::Short, 1e-8),
        FluxSample::new(start, Channel::Short, 2e-8),
        FluxSample::new(end, Channel::Short, 3e-8),
        FluxSample::new(end + Duration::minutes(1), Channel::Short, 4e-8),
        FluxSample::new(start + Duration::minutes(30), Channel::Long, 1e-7),
    ]);

    let series = normalize_window(&raw, start, end).unwrap();
    let short: Vec<_> = series.short.iter().map(|s| s.timestamp).collect();
    assert_eq!(short, vec![start, end]);
    assert_eq!(series.long.len(), 1);
    assert_eq!(series.window_start, start);
    assert_eq!(series.window_end, end);
}

#[test]
fn duplicate_timestamps_keep_the_later_row() {
    let t = base() + Duration::minutes(5);
    let raw = RawFluxSeries::new(vec![
        FluxSample::new(t, Channel::Long, 1e-6),
        FluxSample::new(t, Channel::Short, 1e-8),
        FluxSample::new(t, Channel::Long, 2e-6),
    ]);

    let series = normalize_window(&raw, base(), base() + Duration::hours(1)).unwrap();
    assert_eq!(series.long.len(), 1);
    assert_eq!(series.long[0].flux, 2e-6);
}

#[test]
fn backwards_timestamp_within_a_channel_is_malformed() {
    let raw = RawFluxSeries::new(vec![
        FluxSample::new(base() + Duration::minutes(3), Channel::Short, 3e-8),
        FluxSample::new(base() + Duration::minutes(1), Channel::Short, 1e-8),
        FluxSample::new(base() + Duration::minutes(1), Channel::Long, 1e-7),
    ]);

    let err = normalize_window(&raw, base(), base() + Duration::hours(1)).unwrap_err();
    assert_eq!(
        err,
        MalformedSeriesError::NonMonotonic {
            channel: Channel::Short,
            timestamp: base() + Duration::minutes(1),
        }
    );
}

#[test]
fn channels_are_ordered_independently() {
    // long restarts at an earlier time than the last short row; each channel is still ordered
    let raw = RawFluxSeries::new(vec![
        FluxSample::new(base() + Duration::minutes(1), Channel::Short, 1e-8),
        FluxSample::new(base() + Duration::minutes(2), Channel::Short, 2e-8),
        FluxSample::new(base() + Duration::minutes(1), Channel::Long, 1e-7),
        FluxSample::new(base() + Duration::minutes(2), Channel::Long, 2e-7),
    ]);

    let series = normalize_window(&raw, base(), base() + Duration::hours(1)).unwrap();
    assert_eq!(series.short.len(), 2);
    assert_eq!(series.long.len(), 2);
}

#[test]
fn normalization_is_idempotent() {
    let start = base();
    let end = start + Duration::hours(2);
    let mut samples = Vec::new();
    for minute in (0..180).step_by(7) {
        let ts = start - Duration::minutes(30) + Duration::minutes(minute);
        samples.push(FluxSample::new(ts, Channel::Short, 1e-8 * (minute + 1) as f64));
        samples.push(FluxSample::new(ts, Channel::Long, 1e-7 * (minute + 1) as f64));
    }
    // re-fetched row for an existing timestamp
    samples.push(FluxSample::new(start + Duration::minutes(5), Channel::Long, 9e-6));
    samples.sort_by_key(|s| s.timestamp);

    let once = normalize_window(&RawFluxSeries::new(samples), start, end).unwrap();
    let again = normalize_window(
        &RawFluxSeries::new(once.iter().copied().collect()),
        start,
        end,
    )
    .unwrap();
    assert_eq!(once, again);
}

#[test]
fn missing_channel_is_malformed() {
    let raw = RawFluxSeries::new(vec![FluxSample::new(base(), Channel::Short, 1e-8)]);
    let err = normalize_window(&raw, base(), base() + Duration::hours(1)).unwrap_err();
    assert_eq!(err, MalformedSeriesError::MissingChannel(Channel::Long));
}

#[test]
fn invalid_flux_outside_window_is_ignored() {
    let raw = RawFluxSeries::new(vec![
        FluxSample::new(base() - Duration::days(1), Channel::Long, f64::NAN),
        FluxSample::new(base(), Channel::Short, 1e-8),
        FluxSample::new(base() + Duration::minutes(1), Channel::Long, 1e-6),
    ]);
    let series = normalize_window(&raw, base(), base() + Duration::hours(1)).unwrap();
    assert_eq!(series.len(), 2);
}
