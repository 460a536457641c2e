use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use goesflux_bucket::{S3BucketStore, S3Config};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::annotations::{annotations_for_events, AnnotationSink, GrafanaAnnotationSink};
use crate::config::AppConfig;
use crate::dispatcher::ScheduledTask;
use crate::error::{ExecutionError, Result};
use crate::invocation::Payload;
use crate::processor::{ongoing_runs, sort_events, FluxSeriesProcessor};
use crate::secrets::{require_field, CredentialProvider};
use crate::timeseries_sink::{BucketTimeSeriesSink, TimeSeriesSink};
use crate::types::Channel;
use crate::upstream::{FluxProvider, SwpcClient};

pub const IMPORT_TIMESERIES_TASK: &str = "import_goes_xrs_timeseries";
pub const CREATE_ANNOTATIONS_TASK: &str = "create_goes_flare_annotations";

/// Collaborators shared by every task. Built once per process and read-only afterwards.
pub struct TaskContext {
    pub provider: Arc<dyn FluxProvider>,
    pub timeseries: Arc<dyn TimeSeriesSink>,
    pub annotations: Option<Arc<dyn AnnotationSink>>,
    pub processor: FluxSeriesProcessor,
    pub annotation_tags: Vec<String>,
    pub clock: fn() -> DateTime<Utc>,
}

impl TaskContext {
    pub fn new(
        provider: Arc<dyn FluxProvider>,
        timeseries: Arc<dyn TimeSeriesSink>,
        processor: FluxSeriesProcessor,
    ) -> Self {
        Self {
            provider,
            timeseries,
            annotations: None,
            processor,
            annotation_tags: vec!["GOES XRS".to_string()],
            clock: Utc::now,
        }
    }

    pub fn with_annotations(mut self, sink: Arc<dyn AnnotationSink>) -> Self {
        self.annotations = Some(sink);
        self
    }

    pub fn with_annotation_tags(mut self, tags: Vec<String>) -> Self {
        self.annotation_tags = tags;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Wires the production adapters. Credentials are read once here; if they cannot be loaded
    /// the context is still built, without an annotation sink.
    pub async fn from_config(
        config: &AppConfig,
        credentials: &dyn CredentialProvider,
    ) -> Result<Self> {
        let processor = FluxSeriesProcessor::from_settings(&config.detection)?;
        let provider = SwpcClient::new(&config.upstream)?;

        let bucket = S3BucketStore::new(S3Config {
            bucket: config.storage.bucket.clone(),
            region: config.storage.region.clone(),
            endpoint: config.storage.endpoint.clone(),
            force_path_style: config.storage.force_path_style,
            ..S3Config::default()
        })
        .await
        .map_err(|err| ExecutionError::Configuration(err.to_string()))?;
        let timeseries = BucketTimeSeriesSink::new(Arc::new(bucket), config.storage.prefix.clone());

        let context = Self::new(Arc::new(provider), Arc::new(timeseries), processor)
            .with_annotation_tags(config.annotations.tags.clone());

        let Some(grafana_url) = config.annotations.grafana_url.as_deref() else {
            warn!("no annotation backend configured; annotation tasks will fail");
            return Ok(context);
        };

        let field = config.secrets.api_key_field.as_str();
        let reference = config.secrets.secret_reference.as_deref().unwrap_or(field);
        let api_key = match credentials.get_secret(reference).await {
            Ok(secret) => require_field(&secret, reference, field).map(str::to_string),
            Err(err) => Err(err),
        };

        match api_key {
            Ok(api_key) => {
                let sink = GrafanaAnnotationSink::new(&config.annotations, grafana_url, api_key)?;
                info!("annotation backend credentials loaded");
                Ok(context.with_annotations(Arc::new(sink)))
            }
            Err(err) => {
                error!(error = %err, "failed to load annotation backend credentials");
                Ok(context)
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TaskPayload {
    #[serde(default)]
    now: Option<DateTime<Utc>>,
    #[serde(default)]
    event: Option<ScheduledEvent>,
}

#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    #[serde(default)]
    time: Option<DateTime<Utc>>,
}

/// Window end for this run: an explicit `now`, else the scheduled event's time, else the clock.
fn resolve_now(context: &TaskContext, payload: &Payload) -> Result<DateTime<Utc>> {
    let parsed: TaskPayload = serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|err| ExecutionError::InvalidPayload(err.to_string()))?;
    Ok(parsed
        .now
        .or_else(|| parsed.event.and_then(|event| event.time))
        .unwrap_or_else(context.clock))
}

/// Fetches the latest feed and stores the trailing window in the time-series sink.
pub struct ImportTimeseriesTask;

#[async_trait]
impl ScheduledTask for ImportTimeseriesTask {
    fn code_identifier(&self) -> &'static str {
        IMPORT_TIMESERIES_TASK
    }

    fn description(&self) -> &'static str {
        "Store the trailing GOES XRS window in the time-series store"
    }

    async fn run(&self, context: &TaskContext, payload: &Payload) -> Result<Value> {
        let now = resolve_now(context, payload)?;
        let processor = &context.processor;

        let raw = context
            .provider
            .fetch_flux_series(processor.storage_days())
            .await?;
        let storable = processor.normalize(&raw, now)?;
        let receipt = context.timeseries.write(&storable).await?;

        info!(
            short = storable.short.len(),
            long = storable.long.len(),
            "imported GOES XRS window"
        );

        Ok(json!({
            "window_start": storable.window_start,
            "window_end": storable.window_end,
            "short_samples": storable.short.len(),
            "long_samples": storable.long.len(),
            "objects_written": receipt.objects_written,
        }))
    }
}

/// Detects flares over the lookback window and publishes them as dashboard annotations.
pub struct CreateAnnotationsTask;

#[async_trait]
impl ScheduledTask for CreateAnnotationsTask {
    fn code_identifier(&self) -> &'static str {
        CREATE_ANNOTATIONS_TASK
    }

    fn description(&self) -> &'static str {
        "Detect GOES XRS flares and write them as dashboard annotations"
    }

    async fn run(&self, context: &TaskContext, payload: &Payload) -> Result<Value> {
        let now = resolve_now(context, payload)?;
        let sink = context.annotations.as_ref().ok_or_else(|| {
            ExecutionError::Configuration("no annotation backend is configured".into())
        })?;
        let processor = &context.processor;

        let raw = context
            .provider
            .fetch_flux_series(processor.lookback_days())
            .await?;

        let mut detected = Vec::new();
        let mut skipped: Vec<Channel> = Vec::new();
        let mut last_error = None;
        for channel in Channel::ALL {
            match processor.process_channel(&raw, channel, now) {
                Ok(result) => detected.push(result),
                Err(err) => {
                    warn!(%channel, error = %err, "skipping channel");
                    skipped.push(channel);
                    last_error = Some(err);
                }
            }
        }
        if detected.is_empty() {
            if let Some(err) = last_error {
                return Err(err.into());
            }
        }

        let mut events: Vec<_> = detected
            .iter()
            .flat_map(|c| c.outcome.events.iter().cloned())
            .collect();
        sort_events(&mut events);

        let annotations = annotations_for_events(&events, &context.annotation_tags);
        let written = sink.write_annotations(&annotations).await?;

        info!(events = events.len(), written, "created flare annotations");

        Ok(json!({
            "events": events,
            "annotations_written": written,
            "skipped_channels": skipped,
            "ongoing": ongoing_runs(&detected),
        }))
    }
}

static TASK_IMPLEMENTATIONS: Lazy<Vec<Arc<dyn ScheduledTask>>> = Lazy::new(|| {
    vec![
        Arc::new(ImportTimeseriesTask) as Arc<dyn ScheduledTask>,
        Arc::new(CreateAnnotationsTask) as Arc<dyn ScheduledTask>,
    ]
});

pub fn all_tasks() -> &'static [Arc<dyn ScheduledTask>] {
    TASK_IMPLEMENTATIONS.as_slice()
}
