use chrono::{DateTime, Duration, TimeZone, Utc};

use goesflux_core::error::MalformedSeriesError;
use goesflux_core::flare_detector::DetectionConfig;
use goesflux_core::processor::FluxSeriesProcessor;
use goesflux_core::types::{Channel, FluxSample, RawFluxSeries};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
}

fn background(hours: i64) -> Vec<FluxSample> {
    let mut samples = Vec::new();
    for minute in (0..hours * 60).step_by(15) {
        let ts = now() - Duration::hours(hours) + Duration::minutes(minute);
        samples.push(FluxSample::new(ts, Channel::Short, 5e-8));
        samples.push(FluxSample::new(ts, Channel::Long, 5e-7));
    }
    samples
}

/// Inserts a four-sample flare and keeps `samples` in time order.
fn flare(samples: &mut Vec<FluxSample>, channel: Channel, start: DateTime<Utc>, peak: f64) {
    let quiet = match channel {
        Channel::Short => 5e-8,
        Channel::Long => 5e-7,
    };
    for (minute, flux) in [(1, peak * 0.6), (2, peak), (3, peak * 0.6), (4, quiet)] {
        samples.push(FluxSample::new(start + Duration::minutes(minute), channel, flux));
    }
    samples.sort_by_key(|s| s.timestamp);
}

#[test]
fn storage_window_and_lookback_are_independent() {
    let mut samples = background(72);
    // two days ago: outside storage, inside lookback
    flare(&mut samples, Channel::Long, now() - Duration::days(2), 4e-5);
    // an hour ago, on both channels
    flare(&mut samples, Channel::Long, now() - Duration::hours(1), 2e-6);
    flare(&mut samples, Channel::Short, now() - Duration::hours(1), 3e-6);

    let processor = FluxSeriesProcessor::default();
    let processed = processor.process(&RawFluxSeries::new(samples), now()).unwrap();

    let window_start = now() - Duration::hours(24);
    assert!(processed
        .storable
        .iter()
        .all(|s| s.timestamp >= window_start && s.timestamp <= now()));

    let tags: Vec<(Channel, &str)> = processed
        .flares
        .iter()
        .map(|f| (f.channel, f.classification_tag.as_str()))
        .collect();
    assert_eq!(
        tags,
        vec![
            (Channel::Long, "M4.0"),
            (Channel::Short, "C3.0"),
            (Channel::Long, "C2.0"),
        ]
    );
    assert!(processed
        .flares
        .windows(2)
        .all(|pair| pair[0].start_ts <= pair[1].start_ts));
}

#[test]
fn peak_flux_is_the_run_maximum() {
    let mut samples = background(24);
    flare(&mut samples, Channel::Long, now() - Duration::hours(3), 7e-5);

    let flares = FluxSeriesProcessor::default()
        .detect(&RawFluxSeries::new(samples.clone()), now())
        .unwrap();
    let event = &flares[0];
    let max_in_run = samples
        .iter()
        .filter(|s| s.channel == Channel::Long)
        .filter(|s| s.timestamp >= event.start_ts && s.timestamp <= event.end_ts)
        .map(|s| s.flux)
        .fold(f64::MIN, f64::max);
    assert_eq!(event.peak_flux, max_in_run);
    assert!(event.start_ts <= event.peak_ts && event.peak_ts <= event.end_ts);
}

#[test]
fn missing_channel_fails_processing() {
    let long_only: Vec<FluxSample> = background(24)
        .into_iter()
        .filter(|s| s.channel == Channel::Long)
        .collect();

    let err = FluxSeriesProcessor::default()
        .process(&RawFluxSeries::new(long_only), now())
        .unwrap_err();
    assert_eq!(err, MalformedSeriesError::MissingChannel(Channel::Short));
}

#[test]
fn lookback_rounds_up_to_whole_days() {
    let processor = FluxSeriesProcessor::new(
        Duration::hours(24),
        Duration::hours(49),
        DetectionConfig::default(),
    );
    assert_eq!(processor.lookback_days(), 3);
    assert_eq!(processor.storage_days(), 1);

    let defaults = FluxSeriesProcessor::default();
    assert_eq!(defaults.lookback_days(), 7);
    assert_eq!(defaults.storage_days(), 1);
}
