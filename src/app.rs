use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::{self, Receiver as BReceiver, Sender as BSender};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::args::{SubCommands, TopLevelCmd};
use crate::broadcast;
use crate::ecg::analyzer_thread;
use crate::ecg::screening::ScreeningReport;
use crate::errors::AppError;
use crate::feed::feed_thread;
use crate::logging::{cloud_sync_thread, file_logging_thread};
use crate::monitor::ble::start_notification_thread;
use crate::monitor::simulator::simulator_thread;
use crate::monitor::{EcgChunk, HeartRateStatus};
use crate::patients::{PatientTag, Patients};
use crate::scan::bluetooth_event_thread;
use crate::settings::Settings;
use crate::structs::DeviceInfo;

const CONFIG_FILE_NAME: &str = "cardiowatch.toml";
const BROADCAST_CAPACITY: usize = 64;

/// Operator-facing alerts. In headless mode `Critical`/`Fatal` stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAlert {
    Intermittent(String),
    Critical(String),
    Fatal(String),
}

impl AppAlert {
    pub fn detailed(message: &str, error: AppError) -> Self {
        AppAlert::Critical(format!("{message} {error}"))
    }
}

/// Messages on the application-wide broadcast bus.
#[derive(Debug, Clone)]
pub enum AppUpdate {
    HeartRateStatus(HeartRateStatus),
    EcgChunk(EcgChunk),
    Screening(ScreeningReport),
    PatientSelected(PatientTag),
    FeedAddress(SocketAddr),
    Error(AppAlert),
}

impl From<HeartRateStatus> for AppUpdate {
    fn from(status: HeartRateStatus) -> Self {
        AppUpdate::HeartRateStatus(status)
    }
}
impl From<EcgChunk> for AppUpdate {
    fn from(chunk: EcgChunk) -> Self {
        AppUpdate::EcgChunk(chunk)
    }
}
impl From<ScreeningReport> for AppUpdate {
    fn from(report: ScreeningReport) -> Self {
        AppUpdate::Screening(report)
    }
}
impl From<PatientTag> for AppUpdate {
    fn from(tag: PatientTag) -> Self {
        AppUpdate::PatientSelected(tag)
    }
}
impl From<SocketAddr> for AppUpdate {
    fn from(addr: SocketAddr) -> Self {
        AppUpdate::FeedAddress(addr)
    }
}
impl From<AppAlert> for AppUpdate {
    fn from(alert: AppAlert) -> Self {
        AppUpdate::Error(alert)
    }
}

/// Events from the scan thread.
pub enum DeviceUpdate {
    DeviceInfo(DeviceInfo),
    ConnectedEvent(String),
    DisconnectedEvent(String),
    Error(AppAlert),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorSource {
    Ble,
    Simulator,
}

pub enum AppRx {
    Broadcast(Result<AppUpdate, RecvError>),
    Device(Option<DeviceUpdate>),
}

pub struct App {
    pub settings: Settings,
    pub config_path: PathBuf,
    pub patients: Patients,
    pub error_message: Option<String>,
    pub cancel_app: CancellationToken,
    pub cancel_actors: CancellationToken,

    broadcast_tx: BSender<AppUpdate>,
    broadcast_rx: BReceiver<AppUpdate>,
    ble_tx: Sender<DeviceUpdate>,
    ble_rx: Receiver<DeviceUpdate>,
    ble_restart_tx: Sender<()>,
    ble_restart_rx: Option<Receiver<()>>,
    ble_scan_paused: Arc<AtomicBool>,

    chosen_source: MonitorSource,
    address_override: Option<String>,
    connected_device_id: Option<String>,
    no_save: bool,
    patient_tag: PatientTag,
    pub session_id: Uuid,
    threads: Vec<JoinHandle<()>>,
}

impl App {
    pub fn build(arg_config: &TopLevelCmd, parent_token: Option<CancellationToken>) -> Self {
        let mut error_message = None;

        let config_path = arg_config
            .config_override
            .clone()
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

        let settings = match Settings::new(&config_path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Invalid config: {e}");
                if arg_config.config_required {
                    panic!();
                }
                error_message = Some(format!("Invalid config: {e}"));
                Settings::default()
            }
        };

        let (chosen_source, address_override) = match &arg_config.subcommands {
            Some(SubCommands::Ble(cmd)) => (MonitorSource::Ble, cmd.address.clone()),
            Some(SubCommands::Sim(_)) => (MonitorSource::Simulator, None),
            None if settings.simulator.enabled => (MonitorSource::Simulator, None),
            None => (MonitorSource::Ble, None),
        };

        let cancel_app = parent_token
            .map(|token| token.child_token())
            .unwrap_or_default();
        let cancel_actors = cancel_app.child_token();

        let (broadcast_tx, broadcast_rx) = broadcast::channel(BROADCAST_CAPACITY);
        let (ble_tx, ble_rx) = mpsc::channel(BROADCAST_CAPACITY);
        let (ble_restart_tx, ble_restart_rx) = mpsc::channel(4);

        let patients = Patients::new(&settings.patients.roster_path);

        Self {
            patients,
            settings,
            config_path,
            error_message,
            cancel_app,
            cancel_actors,
            broadcast_tx,
            broadcast_rx,
            ble_tx,
            ble_rx,
            ble_restart_tx,
            ble_restart_rx: Some(ble_restart_rx),
            ble_scan_paused: Arc::new(AtomicBool::default()),
            chosen_source,
            address_override,
            connected_device_id: None,
            no_save: arg_config.no_save,
            patient_tag: PatientTag::unassigned(),
            session_id: Uuid::new_v4(),
            threads: Vec::new(),
        }
    }

    pub async fn init(&mut self, arg_config: &TopLevelCmd) {
        if !self.no_save {
            if let Err(e) = self.settings.save(&self.config_path) {
                warn!("Couldn't save config: {e}");
            }
        }

        let remember_last = self.settings.patients.remember_last;
        if let Err(e) = self.patients.load(remember_last).await {
            self.handle_alert(AppAlert::detailed("Failed to load patient roster.", e));
            return;
        }
        if let Some(query) = &arg_config.patient {
            match self.patients.select(query) {
                Ok(id) => info!("Selected patient {id}"),
                Err(e) => {
                    self.handle_alert(AppAlert::Critical(e.to_string()));
                    return;
                }
            }
        }
        self.patient_tag = self.patients.selected_tag();
        info!(
            "Session {} recording for patient \"{}\"",
            self.session_id, self.patient_tag.label
        );
        if !self.no_save {
            if let Err(e) = self.patients.save().await {
                warn!("Couldn't save patient roster: {e}");
            }
        }

        self.spawn_workers();

        broadcast!(self.broadcast_tx, self.patient_tag.clone());
    }

    fn spawn_workers(&mut self) {
        let analyzer = analyzer_thread(
            self.broadcast_tx.subscribe(),
            self.broadcast_tx.clone(),
            self.settings.analysis.clone(),
            self.cancel_actors.child_token(),
        );
        self.threads.push(tokio::spawn(analyzer));

        let file_logging = file_logging_thread(
            self.broadcast_tx.subscribe(),
            self.broadcast_tx.clone(),
            self.patient_tag.clone(),
            self.session_id,
            self.settings.misc.clone(),
            self.cancel_actors.child_token(),
        );
        self.threads.push(tokio::spawn(file_logging));

        let cloud_sync = cloud_sync_thread(
            self.broadcast_tx.subscribe(),
            self.broadcast_tx.clone(),
            self.patient_tag.clone(),
            self.session_id,
            self.settings.cloud.clone(),
            self.cancel_actors.child_token(),
        );
        self.threads.push(tokio::spawn(cloud_sync));

        if self.settings.feed.enabled {
            let feed = feed_thread(
                self.broadcast_tx.subscribe(),
                self.broadcast_tx.clone(),
                self.settings.feed.clone(),
                self.cancel_actors.child_token(),
            );
            self.threads.push(tokio::spawn(feed));
        }

        match self.chosen_source {
            MonitorSource::Simulator => {
                info!("Starting simulated source");
                let simulator = simulator_thread(
                    self.broadcast_tx.clone(),
                    self.settings.simulator.clone(),
                    self.cancel_actors.child_token(),
                );
                self.threads.push(tokio::spawn(simulator));
            }
            MonitorSource::Ble => {
                info!("Starting Bluetooth scan");
                let scan = bluetooth_event_thread(
                    self.ble_tx.clone(),
                    self.ble_restart_rx
                        .take()
                        .expect("BLE scan started twice?"),
                    Arc::clone(&self.ble_scan_paused),
                    self.cancel_actors.child_token(),
                );
                self.threads.push(tokio::spawn(scan));
            }
        }
    }

    pub async fn app_receivers(&mut self) -> AppRx {
        tokio::select! {
            update = self.broadcast_rx.recv() => AppRx::Broadcast(update),
            device = self.ble_rx.recv() => AppRx::Device(device),
        }
    }

    pub async fn app_handlers(&mut self, data: AppRx) {
        match data {
            AppRx::Broadcast(Ok(update)) => self.handle_broadcast(update),
            AppRx::Broadcast(Err(RecvError::Closed)) => {
                error!("App: broadcast channel closed");
                self.cancel_actors.cancel();
            }
            AppRx::Broadcast(Err(RecvError::Lagged(count))) => {
                warn!("App: Lagged! Missed {count} messages");
            }
            AppRx::Device(Some(update)) => self.handle_device_update(update),
            AppRx::Device(None) => {
                if !self.cancel_actors.is_cancelled() {
                    error!("App: device channel closed");
                    self.cancel_actors.cancel();
                }
            }
        }
    }

    fn handle_broadcast(&mut self, update: AppUpdate) {
        match update {
            AppUpdate::HeartRateStatus(status) => {
                debug!(
                    "HR {} bpm ({} RR intervals)",
                    status.heart_rate_bpm,
                    status.rr_intervals.len()
                );
            }
            AppUpdate::Error(alert) => self.handle_alert(alert),
            AppUpdate::FeedAddress(addr) => info!("Feed bound to {addr}"),
            _ => {}
        }
    }

    fn handle_device_update(&mut self, update: DeviceUpdate) {
        match update {
            DeviceUpdate::DeviceInfo(device) => {
                if self.connected_device_id.is_some() || !self.is_target_device(&device) {
                    return;
                }
                info!(
                    "Connecting to \"{}\" ({})",
                    device.name, device.address
                );
                self.ble_scan_paused.store(true, Ordering::SeqCst);
                self.connected_device_id = Some(device.id.clone());
                self.remember_device(&device);
                let monitor = start_notification_thread(
                    self.broadcast_tx.clone(),
                    self.ble_restart_tx.clone(),
                    device,
                    self.settings.ble.rr_ignore_after_empty as usize,
                    self.cancel_actors.child_token(),
                );
                self.threads.push(tokio::spawn(monitor));
            }
            DeviceUpdate::ConnectedEvent(id) => {
                debug!("Link up: {id}");
            }
            DeviceUpdate::DisconnectedEvent(id) => {
                if self.connected_device_id.as_deref() == Some(id.as_str()) {
                    // The monitor actor reconnects on its own; just surface it
                    warn!("Monitor link lost: {id}");
                }
            }
            DeviceUpdate::Error(alert) => self.handle_alert(alert),
        }
    }

    fn is_target_device(&self, device: &DeviceInfo) -> bool {
        if let Some(address) = &self.address_override {
            return device.address.eq_ignore_ascii_case(address) || device.id == *address;
        }
        if let Some(patient) = self
            .patients
            .current
            .and_then(|id| self.patients.get(&id))
        {
            if !patient.device_address.is_empty() {
                return device.address.eq_ignore_ascii_case(&patient.device_address);
            }
        }
        if !self.settings.ble.saved_address.is_empty() {
            return device.address.eq_ignore_ascii_case(&self.settings.ble.saved_address);
        }
        if !self.settings.ble.saved_name.is_empty() {
            return device.name == self.settings.ble.saved_name;
        }
        // No preference: first heart-rate advertiser wins
        true
    }

    fn remember_device(&mut self, device: &DeviceInfo) {
        if self.no_save || !self.settings.ble.saved_address.is_empty() {
            return;
        }
        self.settings.ble.saved_address = device.address.clone();
        self.settings.ble.saved_name = device.name.clone();
        if let Err(e) = self.settings.save(&self.config_path) {
            warn!("Couldn't save config: {e}");
        }
    }

    fn handle_alert(&mut self, alert: AppAlert) {
        match alert {
            AppAlert::Intermittent(message) => warn!("{message}"),
            AppAlert::Critical(message) => {
                error!("{message}");
                self.error_message = Some(message);
                self.cancel_actors.cancel();
            }
            AppAlert::Fatal(message) => {
                error!("{message}");
                self.error_message = Some(message);
                self.cancel_app.cancel();
            }
        }
    }

    pub async fn join_threads(&mut self) {
        self.cancel_actors.cancel();
        for handle in self.threads.drain(..) {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {e}");
            }
        }
    }
}
