use crate::app::{AppAlert, AppUpdate};
use crate::broadcast;
use crate::errors::AppError;
use crate::settings::FeedSettings;

use serde_json::json;
use std::net::{SocketAddr, SocketAddrV4};
use std::str::FromStr;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{Receiver as BReceiver, Sender as BSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio_websockets::{Message, ServerBuilder};

struct FeedActor {
    listener: TcpListener,
}

impl FeedActor {
    async fn build(feed_settings: &FeedSettings) -> Result<(Self, SocketAddr), AppError> {
        let host_addr = SocketAddrV4::from_str(&format!("0.0.0.0:{}", feed_settings.port))?;

        let listener = TcpListener::bind(host_addr).await?;

        let local_addr = listener.local_addr()?;

        Ok((Self { listener }, local_addr))
    }

    async fn server_loop(
        &mut self,
        broadcast_rx: &mut BReceiver<AppUpdate>,
        cancel_token: CancellationToken,
    ) -> Result<(), AppError> {
        'server: loop {
            info!("Feed server waiting for a viewer...");
            let connection: tokio::net::TcpStream;
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((conn, peer)) => {
                            info!("Viewer connected from {peer}");
                            connection = conn;
                        }
                        Err(err) => {
                            error!("Feed accept failed: {err:?}");
                            continue 'server;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Shutting down Feed thread!");
                    return Ok(());
                }
            }
            let mut stream = match ServerBuilder::new().accept(connection).await {
                Ok(stream) => stream,
                Err(err) => {
                    error!("Feed handshake failed: {err:?}");
                    continue 'server;
                }
            };
            debug!("Feed handshake complete, starting tx loop.");
            'sending: loop {
                tokio::select! {
                    update = broadcast_rx.recv() => {
                        let message = match update {
                            Ok(update) => feed_message(&update),
                            Err(RecvError::Closed) => {
                                warn!("Feed: Channel closed");
                                return Ok(());
                            }
                            Err(RecvError::Lagged(count)) => {
                                warn!("Feed: Lagged! Missed {count} messages");
                                None
                            }
                        };
                        if let Some(message) = message {
                            if let Err(e) = stream.send(Message::text(message)).await {
                                info!("Viewer dropped: {e}");
                                break 'sending;
                            }
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        info!("Shutting down Feed thread!");
                        stream.close().await?;
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn feed_message(update: &AppUpdate) -> Option<String> {
    let value = match update {
        AppUpdate::HeartRateStatus(status) => json!({
            "type": "heart_rate",
            "bpm": status.heart_rate_bpm,
            "rr_ms": status
                .rr_intervals
                .iter()
                .map(|rr| rr.as_millis() as u64)
                .collect::<Vec<_>>(),
            "battery": u8::from(status.battery_level),
            "contact": format!("{:?}", status.contact),
            "timestamp": status.timestamp.to_rfc3339(),
        }),
        AppUpdate::Screening(report) => json!({
            "type": "screening",
            "rr_count": report.rr_count,
            "mean_bpm": report.stats.map(|s| s.mean_bpm()),
            "rmssd_ms": report.stats.map(|s| s.rmssd_ms),
            "quality": report.quality.map(|q| q.score),
            "flags": report.flags.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
            "timestamp": report.timestamp.to_rfc3339(),
        }),
        AppUpdate::PatientSelected(patient) => json!({
            "type": "patient",
            "id": patient.id,
            "label": patient.label.clone(),
        }),
        _ => return None,
    };
    Some(value.to_string())
}

pub async fn feed_thread(
    mut broadcast_rx: BReceiver<AppUpdate>,
    broadcast_tx: BSender<AppUpdate>,
    feed_settings: FeedSettings,
    cancel_token: CancellationToken,
) {
    let (mut feed, local_addr) = match FeedActor::build(&feed_settings).await {
        Ok((feed, addr)) => (feed, addr),
        Err(e) => {
            let message = "Failed to build feed server.";
            broadcast!(broadcast_tx, AppAlert::detailed(message, e));
            return;
        }
    };

    match local_ip_address::local_ip() {
        Ok(ip) => info!("Feed listening on ws://{}:{}", ip, local_addr.port()),
        Err(_) => info!("Feed listening on ws://{local_addr}"),
    }

    // Sharing the URL with the rest of the app
    broadcast!(broadcast_tx, local_addr);

    if let Err(e) = feed.server_loop(&mut broadcast_rx, cancel_token).await {
        error!("Feed server error: {e}");
        let message = "Feed server error";
        broadcast!(broadcast_tx, AppAlert::detailed(message, e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecg::screening::ScreeningReport;
    use crate::monitor::{BatteryLevel, ContactStatus, HeartRateStatus};
    use std::time::Duration;

    #[test]
    fn heart_rate_updates_serialize_with_type_tag() {
        let status = HeartRateStatus {
            heart_rate_bpm: 72,
            rr_intervals: vec![Duration::from_millis(833)],
            battery_level: BatteryLevel::Level(90),
            contact: ContactStatus::Contact,
            timestamp: chrono::Local::now(),
        };
        let message = feed_message(&AppUpdate::HeartRateStatus(status)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "heart_rate");
        assert_eq!(value["bpm"], 72);
        assert_eq!(value["rr_ms"][0], 833);
        assert_eq!(value["battery"], 90);
    }

    #[test]
    fn screening_and_alerts() {
        let report = ScreeningReport {
            timestamp: chrono::Local::now(),
            stats: None,
            quality: None,
            rr_count: 0,
            flags: Vec::new(),
        };
        let message = feed_message(&AppUpdate::Screening(report)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["type"], "screening");
        assert!(value["mean_bpm"].is_null());

        // Alerts and internal bookkeeping stay off the feed
        let alert = AppUpdate::Error(AppAlert::Intermittent("nope".into()));
        assert!(feed_message(&alert).is_none());
    }
}
