use crate::app::{AppAlert, AppUpdate};
use crate::broadcast;
use crate::patients::PatientTag;
use crate::settings::{CloudSettings, MiscSettings};

use chrono::{DateTime, Local};
use cloud::CloudSyncActor;
use file::FileLoggingActor;
use tokio::sync::broadcast::{Receiver as BReceiver, Sender as BSender};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

mod cloud;
mod file;

/// Rolling min/avg/max bookkeeping for one recording session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started_at: DateTime<Local>,
    pub updates: u64,
    pub min_bpm: u16,
    pub max_bpm: u16,
    sum_bpm: u64,
    pub flags_seen: Vec<String>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            updates: 0,
            min_bpm: u16::MAX,
            max_bpm: 0,
            sum_bpm: 0,
            flags_seen: Vec::new(),
        }
    }

    pub fn update(&mut self, bpm: u16) {
        if bpm == 0 {
            return;
        }
        self.updates += 1;
        self.min_bpm = self.min_bpm.min(bpm);
        self.max_bpm = self.max_bpm.max(bpm);
        self.sum_bpm += bpm as u64;
    }

    pub fn note_flags(&mut self, label: &str) {
        if label != "ok" && !self.flags_seen.iter().any(|seen| seen == label) {
            self.flags_seen.push(label.to_string());
        }
    }

    pub fn avg_bpm(&self) -> u16 {
        if self.updates == 0 {
            0
        } else {
            (self.sum_bpm / self.updates) as u16
        }
    }

    pub fn summary(&self) -> String {
        if self.updates == 0 {
            return "no heart rate data recorded".to_string();
        }
        let duration = Local::now().signed_duration_since(self.started_at);
        format!(
            "{} updates over {}s | bpm min/avg/max {}/{}/{} | flags: {}",
            self.updates,
            duration.num_seconds(),
            self.min_bpm,
            self.avg_bpm(),
            self.max_bpm,
            if self.flags_seen.is_empty() {
                "none".to_string()
            } else {
                self.flags_seen.join(", ")
            }
        )
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn file_logging_thread(
    mut broadcast_rx: BReceiver<AppUpdate>,
    broadcast_tx: BSender<AppUpdate>,
    patient: PatientTag,
    session_id: Uuid,
    misc_settings: MiscSettings,
    cancel_token: CancellationToken,
) {
    if !misc_settings.log_sessions_to_csv && !misc_settings.write_bpm_to_file {
        info!("No file logging was enabled! Shutting down thread.");
        return;
    }

    let mut logging = match FileLoggingActor::build(patient, session_id, misc_settings).await {
        Ok(actor) => actor,
        Err(e) => {
            let message = "Failed to create session log files.";
            broadcast!(broadcast_tx, AppAlert::detailed(message, e));
            return;
        }
    };

    info!("Logging thread started!");

    if let Err(e) = logging.rx_loop(&mut broadcast_rx, cancel_token).await {
        error!("File Logging error: {e}");
        let message = "File Logging error.";
        broadcast!(broadcast_tx, AppAlert::detailed(message, e));
    }
}

pub async fn cloud_sync_thread(
    mut broadcast_rx: BReceiver<AppUpdate>,
    broadcast_tx: BSender<AppUpdate>,
    patient: PatientTag,
    session_id: Uuid,
    cloud_settings: CloudSettings,
    cancel_token: CancellationToken,
) {
    if !cloud_settings.enabled {
        info!("Cloud sync wasn't enabled! Shutting down thread");
        return;
    }

    let mut sync = match CloudSyncActor::build(patient, session_id, cloud_settings) {
        Ok(actor) => actor,
        Err(e) => {
            let message = "Failed to build cloud sync client";
            broadcast!(broadcast_tx, AppAlert::detailed(message, e));
            return;
        }
    };

    info!("Cloud sync thread started!");

    if let Err(e) = sync.rx_loop(&mut broadcast_rx, cancel_token).await {
        error!("Cloud sync error: {e}");
        let message = "Cloud sync error:";
        broadcast!(broadcast_tx, AppAlert::detailed(message, e));
    }
}
