use crate::app::{AppAlert, DeviceUpdate};
use crate::monitor::ble::HEART_RATE_SERVICE_UUID;
use crate::structs::DeviceInfo;
use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral, PeripheralProperties, ScanFilter,
};
use btleplug::platform::Manager;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scans for devices advertising the Heart Rate Service and sends them to
/// the provided `mpsc::Sender`. The scan can be paused by setting the
/// `pause_signal` to `true`.
pub async fn bluetooth_event_thread(
    tx: mpsc::Sender<DeviceUpdate>,
    mut restart_signal: mpsc::Receiver<()>,
    pause_signal: Arc<AtomicBool>,
    cancel_token: CancellationToken,
) {
    // If no event is heard in this period,
    // the manager and adapter will be recreated
    // (if the scan isn't paused)
    let duration = Duration::from_secs(30);

    'adapter: loop {
        info!("Bluetooth CentralEvent thread started!");
        if cancel_token.is_cancelled() {
            info!("Shutting down Bluetooth CentralEvent thread!");
            break 'adapter;
        }
        let manager = match Manager::new().await {
            Ok(manager) => manager,
            Err(e) => {
                error!("Failed to create manager: {}", e);
                tx.send(DeviceUpdate::Error(AppAlert::Critical(format!(
                    "Failed to create manager: {}",
                    e
                ))))
                .await
                .expect("Failed to send error message");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue 'adapter;
            }
        };
        let central = match manager.adapters().await.and_then(|adapters| {
            adapters
                .into_iter()
                .next()
                .ok_or(btleplug::Error::DeviceNotFound)
        }) {
            Ok(central) => central,
            Err(_) => {
                error!("No Bluetooth adapters found!");
                tx.send(DeviceUpdate::Error(AppAlert::Critical(
                    "No Bluetooth adapters found! Make sure it's plugged in and enabled."
                        .to_string(),
                )))
                .await
                .expect("Failed to send error message");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue 'adapter;
            }
        };

        if let Err(e) = central.start_scan(ScanFilter::default()).await {
            error!("Scanning failure: {}", e);
            tx.send(DeviceUpdate::Error(AppAlert::Critical(format!(
                "Scanning failure: {}",
                e
            ))))
            .await
            .expect("Failed to send error message");
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue 'adapter;
        }
        let mut events = match central.events().await {
            Ok(e) => e,
            Err(e) => {
                error!("BLE failure: {}", e);
                tx.send(DeviceUpdate::Error(AppAlert::Critical(format!(
                    "BLE failure: {}",
                    e
                ))))
                .await
                .expect("Failed to send error message");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue 'adapter;
            }
        };
        debug!("Inital scanning started!");
        let mut scanning = true;

        'events: loop {
            if pause_signal.load(Ordering::SeqCst) {
                if scanning {
                    info!("Pausing scan");
                    central.stop_scan().await.expect("Failed to stop scan!");
                    scanning = false;
                }
            } else if !scanning {
                info!("Resuming scan");
                if let Err(e) = central.start_scan(ScanFilter::default()).await {
                    error!("Failed to resume scanning: {}", e);
                    tx.send(DeviceUpdate::Error(AppAlert::Critical(format!(
                        "Failed to resume scanning: {}",
                        e
                    ))))
                    .await
                    .expect("Failed to send error message");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue 'events;
                }
                scanning = true;
            }
            tokio::select! {
                Some(event) = events.next() => {
                    match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            if let Ok(device) = central.peripheral(&id).await {
                                let properties = device
                                    .properties()
                                    .await
                                    .unwrap()
                                    .unwrap_or(PeripheralProperties::default());

                                // Only heart-rate capable devices are interesting here
                                if !properties.services.contains(&HEART_RATE_SERVICE_UUID) {
                                    continue 'events;
                                }

                                // Add the device's information to the discovered list
                                let device = DeviceInfo::new(
                                    device.id().to_string(),
                                    properties.local_name,
                                    properties.tx_power_level,
                                    properties.address.to_string(),
                                    properties.rssi,
                                    properties.manufacturer_data,
                                    properties.services,
                                    properties.service_data,
                                    device.clone(),
                                );

                                // Send a clone of the accumulated device information so far
                                if tx.send(DeviceUpdate::DeviceInfo(device)).await.is_err() {
                                    error!("Couldn't send device info update!");
                                    break 'adapter;
                                }
                            }
                        }
                        CentralEvent::DeviceDisconnected(id) => {
                            warn!("Device disconnected: {}", id);
                            if tx.send(DeviceUpdate::DisconnectedEvent(id.to_string())).await.is_err() {
                                error!("Couldn't send DisconnectedEvent!");
                                break 'adapter;
                            }
                        }
                        CentralEvent::DeviceConnected(id) => {
                            info!("Device connected: {}", id);
                            if tx.send(DeviceUpdate::ConnectedEvent(id.to_string())).await.is_err() {
                                error!("Couldn't send ConnectedEvent!");
                                break 'adapter;
                            }
                        }
                        _ => {}
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Shutting down Bluetooth CentralEvent thread!");
                    break 'adapter;
                }
                _ = tokio::time::sleep(duration) => {
                    debug!("CentralEvent timeout");
                    if !pause_signal.load(Ordering::SeqCst) {
                        warn!("Restarting manager and adapter!");
                        break 'events;
                    }
                }
                _ = restart_signal.recv() => {
                    warn!("Got signal to restart BLE manager and adapter!");
                    pause_signal.store(false, Ordering::SeqCst);
                    break 'events;
                }
            }
        }
    }
}
