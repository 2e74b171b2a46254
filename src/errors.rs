use std::path::PathBuf;

use thiserror::Error;

/// Represents all possible errors that can occur during the app's lifecycle
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to create directory \"{path}\": {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create file \"{path}\": {source}")]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing IP Address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Websocket Error: {0}")]
    Ws(#[from] tokio_websockets::Error),
    #[error("Bluetooth Error: {0}")]
    Bt(#[from] btleplug::Error),
    #[error("TOML Serialization Error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("TOML Parse Error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),
    #[error("Invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),
    // My errors
    #[error("Failed to get working directory")]
    WorkDir,
    #[error("No patient matched \"{0}\"")]
    UnknownPatient(String),
    #[error("Cloud endpoint is not configured")]
    CloudEndpoint,
}
