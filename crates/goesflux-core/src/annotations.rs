//! Flare annotations and the dashboard backends that display them.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::AnnotationConfig;
use crate::error::SinkWriteError;
use crate::types::{Channel, FlareEvent};

pub const FLARE_TAG: &str = "flare";
pub const PEAK_TAG: &str = "peak";

/// One dashboard marker per flare: a start/end span with the peak instant called out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub channel: Channel,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub peak: DateTime<Utc>,
    pub text: String,
    pub tags: Vec<String>,
}

impl Annotation {
    pub fn from_event(event: &FlareEvent, base_tags: &[String]) -> Self {
        let mut tags: Vec<String> = base_tags.to_vec();
        tags.push(FLARE_TAG.to_string());
        tags.push(event.channel.instrument_label().to_string());
        tags.push(event.classification_tag.clone());
        Self {
            channel: event.channel,
            start: event.start_ts,
            end: event.end_ts,
            peak: event.peak_ts,
            text: event.classification_tag.clone(),
            tags,
        }
    }

    /// Tags shared by every flare annotation on this channel; used to find ones to overwrite.
    pub fn identity_tags(&self, base_tags: &[String]) -> Vec<String> {
        let mut tags = base_tags.to_vec();
        tags.push(FLARE_TAG.to_string());
        tags.push(self.channel.instrument_label().to_string());
        tags
    }
}

pub fn annotations_for_events(events: &[FlareEvent], base_tags: &[String]) -> Vec<Annotation> {
    events
        .iter()
        .map(|event| Annotation::from_event(event, base_tags))
        .collect()
}

#[async_trait]
pub trait AnnotationSink: Send + Sync {
    /// Writes each annotation, replacing any existing one for the same channel and span.
    /// Returns how many annotations were written.
    async fn write_annotations(&self, annotations: &[Annotation]) -> Result<usize, SinkWriteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PanelTarget<'a> {
    dashboard_uid: &'a str,
    panel_id: i64,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    uid: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExistingAnnotation {
    id: i64,
}

/// Writes annotations through the Grafana HTTP annotations API.
#[derive(Debug, Clone)]
pub struct GrafanaAnnotationSink {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    dashboard_name: String,
    panel_name: String,
    base_tags: Vec<String>,
}

impl GrafanaAnnotationSink {
    pub fn new(
        config: &AnnotationConfig,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, SinkWriteError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            dashboard_name: config.dashboard_name.clone(),
            panel_name: config.panel_name.clone(),
            base_tags: config.tags.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, SinkWriteError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        Self::check(response).await?.json().await.map_err(Into::into)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkWriteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkWriteError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn resolve_dashboard_uid(&self) -> Result<String, SinkWriteError> {
        let hits = self
            .get_json(
                "/api/search",
                &[
                    ("query", self.dashboard_name.clone()),
                    ("type", "dash-db".to_string()),
                ],
            )
            .await?;
        let hits: Vec<SearchHit> = serde_json::from_value(hits)
            .map_err(|err| SinkWriteError::UnexpectedResponse(format!("dashboard search: {err}")))?;
        hits.into_iter()
            .find(|hit| hit.title == self.dashboard_name)
            .map(|hit| hit.uid)
            .ok_or_else(|| {
                SinkWriteError::TargetNotFound(format!("dashboard '{}'", self.dashboard_name))
            })
    }

    async fn resolve_panel_id(&self, dashboard_uid: &str) -> Result<i64, SinkWriteError> {
        let body = self
            .get_json(&format!("/api/dashboards/uid/{dashboard_uid}"), &[])
            .await?;
        let panels = body
            .pointer("/dashboard/panels")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        find_panel_id(panels, &self.panel_name).ok_or_else(|| {
            SinkWriteError::TargetNotFound(format!(
                "panel '{}' on dashboard '{}'",
                self.panel_name, self.dashboard_name
            ))
        })
    }

    async fn delete_existing(
        &self,
        target: PanelTarget<'_>,
        annotation: &Annotation,
    ) -> Result<usize, SinkWriteError> {
        let mut query = vec![
            ("dashboardUID", target.dashboard_uid.to_string()),
            ("panelId", target.panel_id.to_string()),
            ("from", annotation.start.timestamp_millis().to_string()),
            ("to", annotation.end.timestamp_millis().to_string()),
        ];
        for tag in annotation.identity_tags(&self.base_tags) {
            query.push(("tags", tag));
        }
        let existing = self.get_json("/api/annotations", &query).await?;
        let existing: Vec<ExistingAnnotation> = serde_json::from_value(existing)
            .map_err(|err| SinkWriteError::UnexpectedResponse(format!("annotation listing: {err}")))?;

        for item in &existing {
            let response = self
                .client
                .delete(self.url(&format!("/api/annotations/{}", item.id)))
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            Self::check(response).await?;
        }
        Ok(existing.len())
    }

    async fn post(&self, body: Value) -> Result<(), SinkWriteError> {
        let response = self
            .client
            .post(self.url("/api/annotations"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl AnnotationSink for GrafanaAnnotationSink {
    async fn write_annotations(&self, annotations: &[Annotation]) -> Result<usize, SinkWriteError> {
        if annotations.is_empty() {
            return Ok(0);
        }

        let dashboard_uid = self.resolve_dashboard_uid().await?;
        let panel_id = self.resolve_panel_id(&dashboard_uid).await?;
        let target = PanelTarget {
            dashboard_uid: &dashboard_uid,
            panel_id,
        };
        debug!(%dashboard_uid, panel_id, "resolved annotation target");

        for annotation in annotations {
            let replaced = self.delete_existing(target, annotation).await?;
            if replaced > 0 {
                debug!(replaced, start = %annotation.start, "replaced existing annotations");
            }
            for body in grafana_payloads(target.dashboard_uid, target.panel_id, annotation) {
                self.post(body).await?;
            }
        }

        info!(count = annotations.len(), "wrote flare annotations");
        Ok(annotations.len())
    }
}

/// Region annotation for the span plus a point annotation tagged `peak`.
fn grafana_payloads(dashboard_uid: &str, panel_id: i64, annotation: &Annotation) -> [Value; 2] {
    let mut peak_tags = annotation.tags.clone();
    peak_tags.push(PEAK_TAG.to_string());
    [
        json!({
            "dashboardUID": dashboard_uid,
            "panelId": panel_id,
            "time": annotation.start.timestamp_millis(),
            "timeEnd": annotation.end.timestamp_millis(),
            "tags": annotation.tags,
            "text": annotation.text,
        }),
        json!({
            "dashboardUID": dashboard_uid,
            "panelId": panel_id,
            "time": annotation.peak.timestamp_millis(),
            "tags": peak_tags,
            "text": annotation.text,
        }),
    ]
}

/// Depth-first search through panels and collapsed rows.
fn find_panel_id(panels: &[Value], title: &str) -> Option<i64> {
    for panel in panels {
        if panel.get("title").and_then(Value::as_str) == Some(title) {
            if let Some(id) = panel.get("id").and_then(Value::as_i64) {
                return Some(id);
            }
        }
        if let Some(nested) = panel.get("panels").and_then(Value::as_array) {
            if let Some(id) = find_panel_id(nested, title) {
                return Some(id);
            }
        }
    }
    None
}

/// Keeps annotations in memory keyed by channel and start, mirroring the overwrite behaviour.
#[derive(Debug, Default)]
pub struct MemoryAnnotationSink {
    annotations: Mutex<BTreeMap<(Channel, DateTime<Utc>), Annotation>>,
}

impl MemoryAnnotationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Annotation> {
        self.annotations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AnnotationSink for MemoryAnnotationSink {
    async fn write_annotations(&self, annotations: &[Annotation]) -> Result<usize, SinkWriteError> {
        let mut stored = self
            .annotations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for annotation in annotations {
            stored.insert((annotation.channel, annotation.start), annotation.clone());
        }
        Ok(annotations.len())
    }
}
