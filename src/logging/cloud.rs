use crate::app::AppUpdate;
use crate::ecg::screening::ScreeningReport;
use crate::errors::AppError;
use crate::monitor::HeartRateStatus;
use crate::patients::PatientTag;
use crate::settings::CloudSettings;

use super::SessionStats;

use http::{header, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver as BReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) struct CloudSyncActor {
    settings: CloudSettings,
    patient: PatientTag,
    session_id: Uuid,
    stats: SessionStats,
    built_url: String,
    client: Client,
    batch: Vec<Value>,
    last_rr: Duration,
}

impl CloudSyncActor {
    pub(super) fn build(
        patient: PatientTag,
        session_id: Uuid,
        settings: CloudSettings,
    ) -> Result<Self, AppError> {
        if settings.endpoint.is_empty() {
            return Err(AppError::CloudEndpoint);
        }
        let built_url = {
            let mut url = if settings.endpoint.contains("://") {
                settings.endpoint.to_owned()
            } else {
                format!("https://{}", settings.endpoint)
            };
            if url.ends_with('/') {
                url.pop();
            }
            url
        };

        let mut headers = header::HeaderMap::new();
        headers.insert(
            HeaderName::from_str("x-project-id")?,
            HeaderValue::from_str(&settings.project_id)?,
        );
        headers.insert(
            HeaderName::from_str("x-api-key")?,
            HeaderValue::from_str(&settings.api_key)?,
        );
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            settings,
            patient,
            session_id,
            stats: SessionStats::new(),
            built_url,
            client,
            batch: Vec::new(),
            last_rr: Duration::from_secs(0),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}/documents", self.built_url, collection)
    }

    // Backend unreachable is never fatal for the monitor itself;
    // failures are logged and the payload is dropped.
    async fn post_document(&self, collection: &str, document: Value) {
        let url = self.collection_url(collection);
        match self.client.post(&url).json(&document).send().await {
            Ok(response) if !response.status().is_success() => {
                error!("Cloud rejected document ({}): {}", url, response.status());
            }
            Ok(_) => debug!("Posted document to {collection}"),
            Err(e) => error!("Error POSTing document to {collection}: {e}"),
        }
    }

    async fn open_session(&self) {
        let document = json!({
            "session_id": self.session_id,
            "patient_id": self.patient.id,
            "patient_label": self.patient.label.clone(),
            "started_at": self.stats.started_at.to_rfc3339(),
        });
        self.post_document(&self.settings.sessions_collection, document)
            .await;
    }

    async fn close_session(&mut self) {
        self.flush_samples().await;
        let url = format!(
            "{}/collections/{}/documents/{}",
            self.built_url, self.settings.sessions_collection, self.session_id
        );
        let document = json!({
            "ended_at": chrono::Local::now().to_rfc3339(),
            "updates": self.stats.updates,
            "min_bpm": self.stats.min_bpm,
            "avg_bpm": self.stats.avg_bpm(),
            "max_bpm": self.stats.max_bpm,
            "flags_seen": self.stats.flags_seen.clone(),
        });
        match self.client.patch(&url).json(&document).send().await {
            Ok(response) if !response.status().is_success() => {
                error!("Cloud rejected session update: {}", response.status());
            }
            Ok(_) => info!("Session document finalized"),
            Err(e) => error!("Error finalizing session document: {e}"),
        }
    }

    async fn flush_samples(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let document = json!({
            "session_id": self.session_id,
            "samples": std::mem::take(&mut self.batch),
        });
        self.post_document(&self.settings.samples_collection, document)
            .await;
    }

    pub(super) async fn rx_loop(
        &mut self,
        broadcast_rx: &mut BReceiver<AppUpdate>,
        cancel_token: CancellationToken,
    ) -> Result<(), AppError> {
        self.open_session().await;
        loop {
            tokio::select! {
                update = broadcast_rx.recv() => {
                    match update {
                        Ok(AppUpdate::HeartRateStatus(status)) => {
                            self.handle_data(status).await;
                        }
                        Ok(AppUpdate::Screening(report)) => {
                            self.handle_report(report).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Closed) => {
                            warn!("Cloud sync: Channel closed");
                            break;
                        }
                        Err(RecvError::Lagged(count)) => {
                            warn!("Cloud sync: Lagged! Missed {count} messages");
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Cloud sync thread shutting down");
                    break;
                }
            }
        }
        self.close_session().await;
        Ok(())
    }

    async fn handle_data(&mut self, heart_rate_status: HeartRateStatus) {
        if heart_rate_status.heart_rate_bpm == 0 {
            return;
        }
        self.stats.update(heart_rate_status.heart_rate_bpm);
        let reported_rr = heart_rate_status
            .rr_intervals
            .last()
            .copied()
            .unwrap_or(self.last_rr);
        self.batch.push(json!({
            "timestamp": heart_rate_status.timestamp.to_rfc3339(),
            "bpm": heart_rate_status.heart_rate_bpm,
            "rr_ms": reported_rr.as_millis() as u64,
            "battery": u8::from(heart_rate_status.battery_level),
        }));
        self.last_rr = reported_rr;

        let batch_size = self.settings.sample_batch_size.max(1) as usize;
        if self.batch.len() >= batch_size {
            self.flush_samples().await;
        }
        // flush_samples keeps nothing on failure, so the backlog is
        // bounded by a single batch
    }

    async fn handle_report(&mut self, report: ScreeningReport) {
        self.stats.note_flags(&report.flags_label());
        let document = json!({
            "session_id": self.session_id,
            "patient_id": self.patient.id,
            "timestamp": report.timestamp.to_rfc3339(),
            "rr_count": report.rr_count,
            "mean_bpm": report.stats.map(|s| s.mean_bpm()),
            "rmssd_ms": report.stats.map(|s| s.rmssd_ms),
            "sdrr_ms": report.stats.map(|s| s.sdrr_ms),
            "pnn50_pct": report.stats.map(|s| s.pnn50_pct),
            "quality": report.quality.map(|q| q.score),
            "flags": report.flags.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
        });
        self.post_document(&self.settings.reports_collection, document)
            .await;
    }
}
