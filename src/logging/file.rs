use crate::app::AppUpdate;
use crate::errors::AppError;
use crate::monitor::{BatteryLevel, HeartRateStatus};
use crate::patients::PatientTag;
use crate::settings::MiscSettings;

use super::SessionStats;

use csv_async::AsyncSerializer;
use serde_derive::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{create_dir, File};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver as BReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CSV_FILE_PREFIX: &str = "cw-";

#[allow(non_snake_case)]
#[derive(Debug, Serialize)]
struct CsvData {
    Timestamp: String,
    BPM: u16,
    RR: u16,
    Battery: u8,
    Quality: String,
    Flags: String,
}

// The first few RR intervals after a reconnect can carry garbage;
// repeat the last known value instead.
const RR_IGNORE_COUNT: usize = 5;

pub(super) struct FileLoggingActor {
    misc_settings: MiscSettings,
    session_id: Uuid,
    stats: SessionStats,
    last_rr: Duration,
    rr_cooldown: usize,
    latest_quality: String,
    latest_flags: String,
    csv_writer: Option<AsyncSerializer<File>>,
    txt_writer: Option<BufWriter<File>>,
}

impl FileLoggingActor {
    pub(super) async fn build(
        patient: PatientTag,
        session_id: Uuid,
        misc_settings: MiscSettings,
    ) -> Result<Self, AppError> {
        let mut csv_writer = None;
        if misc_settings.log_sessions_to_csv {
            let csv_folder = PathBuf::from(&misc_settings.log_sessions_csv_path);
            if !csv_folder.exists() {
                create_dir(&csv_folder)
                    .await
                    .map_err(|e| AppError::CreateDir {
                        path: csv_folder.clone(),
                        source: e,
                    })?;
            }
            let csv_file_name = format!(
                "{}{}-{}.csv",
                CSV_FILE_PREFIX,
                patient.label,
                chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
            );
            let csv_file_path = csv_folder.join(csv_file_name);
            let file = File::create(&csv_file_path)
                .await
                .map_err(|e| AppError::CreateFile {
                    path: csv_file_path.clone(),
                    source: e,
                })?;
            info!("Recording session to {}", csv_file_path.display());
            csv_writer = Some(AsyncSerializer::from_writer(file));
        }

        let mut txt_writer = None;
        if misc_settings.write_bpm_to_file {
            let txt_path = PathBuf::from(&misc_settings.bpm_file_path);
            let file = File::create(&txt_path)
                .await
                .map_err(|e| AppError::CreateFile {
                    path: txt_path.clone(),
                    source: e,
                })?;
            txt_writer = Some(BufWriter::new(file));
        }

        Ok(Self {
            misc_settings,
            session_id,
            stats: SessionStats::new(),
            last_rr: Duration::from_secs(0),
            rr_cooldown: 0,
            latest_quality: String::new(),
            latest_flags: "ok".to_string(),
            csv_writer,
            txt_writer,
        })
    }

    pub(super) async fn rx_loop(
        &mut self,
        broadcast_rx: &mut BReceiver<AppUpdate>,
        cancel_token: CancellationToken,
    ) -> Result<(), AppError> {
        loop {
            tokio::select! {
                update = broadcast_rx.recv() => {
                    match update {
                        Ok(AppUpdate::HeartRateStatus(status)) => {
                            self.handle_data(status).await?;
                        }
                        Ok(AppUpdate::Screening(report)) => {
                            self.latest_flags = report.flags_label();
                            self.latest_quality = report
                                .quality
                                .map(|q| format!("{:.2}", q.score))
                                .unwrap_or_default();
                            self.stats.note_flags(&self.latest_flags);
                        }
                        Ok(_) => {}
                        Err(RecvError::Closed) => {
                            warn!("File Logging: Channel closed");
                            break;
                        }
                        Err(RecvError::Lagged(count)) => {
                            warn!("File Logging: Lagged! Missed {count} messages");
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Logging thread shutting down");
                    break;
                }
            }
        }
        self.finish().await
    }

    async fn handle_data(&mut self, heart_rate_status: HeartRateStatus) -> Result<(), AppError> {
        if heart_rate_status.heart_rate_bpm == 0 {
            self.rr_cooldown = RR_IGNORE_COUNT;
            return Ok(());
        }
        debug!("{:?}", heart_rate_status);
        self.stats.update(heart_rate_status.heart_rate_bpm);
        let reported_rr = if self.rr_cooldown == 0 {
            heart_rate_status.rr_intervals.last().unwrap_or(&self.last_rr)
        } else {
            self.rr_cooldown -= 1;
            &self.last_rr
        };
        let reported_rr = *reported_rr;
        if let Some(csv_writer) = &mut self.csv_writer {
            let csv_data = CsvData {
                Timestamp: heart_rate_status
                    .timestamp
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                BPM: heart_rate_status.heart_rate_bpm,
                RR: reported_rr.as_millis() as u16,
                Battery: match heart_rate_status.battery_level {
                    BatteryLevel::Level(battery) => battery,
                    _ => 0,
                },
                Quality: self.latest_quality.clone(),
                Flags: self.latest_flags.clone(),
            };
            csv_writer.serialize(csv_data).await?;
            csv_writer.flush().await?;
        }
        if let Some(txt_writer) = &mut self.txt_writer {
            let txt_output = if self.misc_settings.write_rr_to_file {
                format!(
                    "{}\n{}\n",
                    heart_rate_status.heart_rate_bpm,
                    reported_rr.as_millis()
                )
            } else {
                format!("{}\n", heart_rate_status.heart_rate_bpm)
            };
            txt_writer.seek(tokio::io::SeekFrom::Start(0)).await?;
            txt_writer.write_all(txt_output.as_bytes()).await?;
            txt_writer.flush().await?;
        }
        self.last_rr = reported_rr;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), AppError> {
        if let Some(csv_writer) = &mut self.csv_writer {
            csv_writer.flush().await?;
        }
        if let Some(txt_writer) = &mut self.txt_writer {
            txt_writer.flush().await?;
        }
        info!(
            "Session {} closed: {}",
            self.session_id,
            self.stats.summary()
        );
        Ok(())
    }
}
