use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use goesflux_bucket::BucketStore;
use polars::df;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::SinkWriteError;
use crate::types::{Channel, FluxSample, QualityFlag, StorableSeries};

const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteReceipt {
    pub objects_written: Vec<String>,
    pub samples_written: usize,
}

#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    /// Writes are last-write-wins per `(timestamp, channel)`, so replays are safe.
    async fn write(&self, series: &StorableSeries) -> Result<WriteReceipt, SinkWriteError>;
}

/// Stores each channel as one parquet object per UTC day, merging with what is already there.
pub struct BucketTimeSeriesSink {
    store: Arc<dyn BucketStore>,
    prefix: String,
}

impl BucketTimeSeriesSink {
    pub fn new(store: Arc<dyn BucketStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn partition_key(&self, channel: Channel, date: NaiveDate) -> String {
        format!(
            "timeseries/{}/{}/{}.parquet",
            self.prefix,
            channel.as_str(),
            date.format("%Y-%m-%d")
        )
    }

    pub async fn read_partition(
        &self,
        channel: Channel,
        date: NaiveDate,
    ) -> Result<Vec<FluxSample>, SinkWriteError> {
        let key = self.partition_key(channel, date);
        match self.store.get_object_opt(&key).await? {
            Some(bytes) => Ok(decode_partition(&bytes, channel)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl TimeSeriesSink for BucketTimeSeriesSink {
    async fn write(&self, series: &StorableSeries) -> Result<WriteReceipt, SinkWriteError> {
        let mut partitions: BTreeMap<(Channel, NaiveDate), Vec<FluxSample>> = BTreeMap::new();
        for sample in series.iter() {
            partitions
                .entry((sample.channel, sample.timestamp.date_naive()))
                .or_default()
                .push(*sample);
        }

        let mut receipt = WriteReceipt::default();
        for ((channel, date), incoming) in partitions {
            let existing = self.read_partition(channel, date).await?;
            let merged = merge_samples(existing, &incoming);
            let bytes = encode_partition(&merged)?;
            let key = self.partition_key(channel, date);

            debug!(%key, samples = merged.len(), "writing flux partition");
            self.store
                .put_object(&key, Bytes::from(bytes), PARQUET_CONTENT_TYPE)
                .await?;

            receipt.samples_written += incoming.len();
            receipt.objects_written.push(key);
        }

        info!(
            objects = receipt.objects_written.len(),
            samples = receipt.samples_written,
            "wrote flux series to bucket"
        );
        Ok(receipt)
    }
}

/// Union of both inputs keyed by timestamp; `incoming` wins on collisions.
pub fn merge_samples(existing: Vec<FluxSample>, incoming: &[FluxSample]) -> Vec<FluxSample> {
    let mut by_ts: BTreeMap<DateTime<Utc>, FluxSample> =
        existing.into_iter().map(|s| (s.timestamp, s)).collect();
    for sample in incoming {
        by_ts.insert(sample.timestamp, *sample);
    }
    by_ts.into_values().collect()
}

pub fn encode_partition(samples: &[FluxSample]) -> PolarsResult<Vec<u8>> {
    let timestamps: Vec<i64> = samples
        .iter()
        .map(|s| s.timestamp.timestamp_micros())
        .collect();
    let channels: Vec<&str> = samples.iter().map(|s| s.channel.as_str()).collect();
    let flux: Vec<f64> = samples.iter().map(|s| s.flux).collect();
    let quality: Vec<&str> = samples.iter().map(|s| s.quality_flag.as_str()).collect();

    let mut frame = df![
        "timestamp_utc" => timestamps,
        "channel" => channels,
        "flux_w_m2" => flux,
        "quality_flag" => quality,
    ]?;

    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Zstd(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut frame)?;
    }
    Ok(buffer)
}

pub fn decode_partition(bytes: &[u8], channel: Channel) -> PolarsResult<Vec<FluxSample>> {
    let frame = ParquetReader::new(Cursor::new(bytes.to_vec())).finish()?;

    let timestamps = frame.column("timestamp_utc")?.i64()?;
    let flux = frame.column("flux_w_m2")?.f64()?;
    let quality = frame.column("quality_flag")?.str()?;

    let mut samples = Vec::with_capacity(frame.height());
    for idx in 0..frame.height() {
        let (Some(micros), Some(value)) = (timestamps.get(idx), flux.get(idx)) else {
            continue;
        };
        let Some(timestamp) = DateTime::<Utc>::from_timestamp_micros(micros) else {
            continue;
        };
        samples.push(FluxSample {
            timestamp,
            channel,
            flux: value,
            quality_flag: quality
                .get(idx)
                .map(QualityFlag::from_str_lossy)
                .unwrap_or_default(),
        });
    }
    Ok(samples)
}

/// Keeps everything in memory; used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryTimeSeriesSink {
    points: Mutex<HashMap<(Channel, DateTime<Utc>), FluxSample>>,
    writes: AtomicUsize,
}

impl MemoryTimeSeriesSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, channel: Channel) -> Vec<FluxSample> {
        let points = self
            .points
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut samples: Vec<FluxSample> = points
            .values()
            .filter(|s| s.channel == channel)
            .copied()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }
}

#[async_trait]
impl TimeSeriesSink for MemoryTimeSeriesSink {
    async fn write(&self, series: &StorableSeries) -> Result<WriteReceipt, SinkWriteError> {
        let mut points = self
            .points
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for sample in series.iter() {
            points.insert((sample.channel, sample.timestamp), *sample);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteReceipt {
            objects_written: Vec::new(),
            samples_written: series.len(),
        })
    }
}
