use config::{Config, ConfigError, File as ConfigFile};
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MiscSettings {
    log_level: String,
    pub write_bpm_to_file: bool,
    pub write_rr_to_file: bool,
    pub bpm_file_path: String,
    pub log_sessions_to_csv: bool,
    pub log_sessions_csv_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BLESettings {
    pub saved_name: String,
    pub saved_address: String,
    pub rr_ignore_after_empty: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SimulatorSettings {
    // When enabled, the BLE source is not started
    pub enabled: bool,
    pub low_bpm: u16,
    pub high_bpm: u16,
    pub bpm_speed: f32,
    pub sample_rate_hz: u16,
    pub loops_before_dc: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AnalysisSettings {
    pub window_secs: u16,
    pub screening_interval_secs: u16,
    pub smoothing_window: u16,
    pub peak_threshold_factor: f32,
    pub refractory_ms: u16,
    pub brady_bpm: u16,
    pub tachy_bpm: u16,
    pub rmssd_irregular_ms: f64,
    pub pnn50_irregular_pct: f64,
    pub min_quality: f32,
    pub min_rr_count: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PatientSettings {
    pub roster_path: String,
    pub remember_last: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FeedSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CloudSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub sessions_collection: String,
    pub reports_collection: String,
    pub samples_collection: String,
    pub sample_batch_size: u16,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Settings {
    pub ble: BLESettings,
    pub simulator: SimulatorSettings,
    pub analysis: AnalysisSettings,
    pub patients: PatientSettings,
    pub feed: FeedSettings,
    pub cloud: CloudSettings,
    pub misc: MiscSettings,
}

impl Settings {
    pub fn new(config_path: &Path) -> Result<Self, ConfigError> {
        let default_log_level = if cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        };

        let s = Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(ConfigFile::from(config_path.to_owned()).required(false))
            .set_default("ble.saved_address", "")?
            .set_default("ble.saved_name", "")?
            .set_default("ble.rr_ignore_after_empty", 0)?
            .set_default("simulator.enabled", false)?
            .set_default("simulator.low_bpm", 50)?
            .set_default("simulator.high_bpm", 120)?
            .set_default("simulator.bpm_speed", 1.5)?
            .set_default("simulator.sample_rate_hz", 250)?
            .set_default("simulator.loops_before_dc", 0)?
            .set_default("analysis.window_secs", 30)?
            .set_default("analysis.screening_interval_secs", 10)?
            .set_default("analysis.smoothing_window", 5)?
            .set_default("analysis.peak_threshold_factor", 2.0)?
            .set_default("analysis.refractory_ms", 250)?
            .set_default("analysis.brady_bpm", 50)?
            .set_default("analysis.tachy_bpm", 110)?
            .set_default("analysis.rmssd_irregular_ms", 120.0)?
            .set_default("analysis.pnn50_irregular_pct", 40.0)?
            .set_default("analysis.min_quality", 0.35)?
            .set_default("analysis.min_rr_count", 8)?
            .set_default("patients.roster_path", "patients.toml")?
            .set_default("patients.remember_last", true)?
            .set_default("feed.enabled", false)?
            .set_default("feed.port", 5566)?
            .set_default("cloud.enabled", false)?
            .set_default("cloud.endpoint", "")?
            .set_default("cloud.project_id", "")?
            .set_default("cloud.api_key", "")?
            .set_default("cloud.sessions_collection", "sessions")?
            .set_default("cloud.reports_collection", "screening_reports")?
            .set_default("cloud.samples_collection", "samples")?
            .set_default("cloud.sample_batch_size", 30)?
            .set_default("misc.log_level", default_log_level)?
            .set_default("misc.write_bpm_to_file", false)?
            .set_default("misc.write_rr_to_file", false)?
            .set_default("misc.bpm_file_path", "bpm.txt")?
            .set_default("misc.log_sessions_to_csv", false)?
            .set_default("misc.log_sessions_csv_path", "session_logs")?
            .build()?;

        s.try_deserialize()
    }
    pub fn save(&self, config_path: &Path) -> Result<(), std::io::Error> {
        let toml_string = toml::to_string(self).expect("Failed to serialize config");

        let mut file = File::create(config_path)?;
        file.write_all(toml_string.as_bytes())?;

        Ok(())
    }
    pub fn get_log_level(&self) -> LevelFilter {
        match self.misc.log_level.to_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        }
    }
}
