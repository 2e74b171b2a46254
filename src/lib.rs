#![deny(unused_must_use)]

use args::TopLevelCmd;
use errors::AppError;
use std::path::PathBuf;
use tokio::fs::create_dir;
use tokio_util::sync::CancellationToken;

use crate::app::App;

use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use tracing::info;
use tracing_subscriber::{filter, prelude::*};
use tracing_subscriber::{fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(any(debug_assertions, feature = "portable")))]
use directories::BaseDirs;

pub mod args;
pub mod errors;

pub mod ecg;
pub mod monitor;

mod app;
mod feed;
mod logging;
mod macros;
mod patients;
mod scan;
mod settings;
mod structs;

/// Application result type.
pub type AppResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

pub async fn run(mut arg_config: TopLevelCmd) -> AppResult<()> {
    let working_directory = determine_working_directory().ok_or(AppError::WorkDir)?;
    arg_config.config_override = arg_config.config_override.map(|p| {
        p.canonicalize()
            .expect("Failed to build full supplied config path")
    });
    if !working_directory.exists() {
        create_dir(&working_directory)
            .await
            .map_err(|e| AppError::CreateDir {
                path: working_directory.clone(),
                source: e,
            })?;
    }
    std::env::set_current_dir(&working_directory).expect("Failed to change working directory");
    let log_name = std::env::current_exe()?
        .with_extension("log")
        .file_name()
        .expect("Couldn't build log path!")
        .to_owned();
    let file_appender = BasicRollingFileAppender::new(
        log_name,
        RollingConditionBasic::new().max_size(1024 * 1024 * 5),
        2,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let time_fmt = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_owned());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_file(false)
        .with_ansi(false)
        .with_target(true)
        .with_timer(time_fmt)
        .with_line_number(true)
        .with_filter(filter::LevelFilter::DEBUG);
    let (fmt_layer, reload_handle) = tracing_subscriber::reload::Layer::new(fmt_layer);
    // btleplug still logs through the `log` facade
    tracing_log::LogTracer::init()?;
    let env_filter = tracing_subscriber::EnvFilter::new("trace");
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    let mut app = App::build(&arg_config, None);

    info!("Starting app... v{}", env!("CARGO_PKG_VERSION"));

    // Starting off at DEBUG, and setting to whatever user has defined
    reload_handle.modify(|layer| *layer.filter_mut() = app.settings.get_log_level())?;

    if let Some(message) = app.error_message.take() {
        return Err(message.into());
    }

    app.init(&arg_config).await;

    while !app.cancel_app.is_cancelled() && !app.cancel_actors.is_cancelled() {
        tokio::select! {
            data = app.app_receivers() => app.app_handlers(data).await,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                app.cancel_app.cancel();
            }
        }
    }
    // After while loop closes
    app.join_threads().await;

    info!("Shutting down gracefully...");

    if let Some(message) = app.error_message {
        return Err(message.into());
    }
    Ok(())
}

pub async fn run_headless(
    arg_config: TopLevelCmd,
    parent_token: CancellationToken,
) -> Result<(), AppError> {
    let mut app = App::build(&arg_config, Some(parent_token));

    assert_eq!(app.error_message, None);

    info!("Loaded config from: {}", app.config_path.display());

    info!("Starting app... v{}", env!("CARGO_PKG_VERSION"));

    app.init(&arg_config).await;

    // Since there's no UI to dismiss errors, just close the app
    // if the actors aren't happy
    while !app.cancel_app.is_cancelled() && !app.cancel_actors.is_cancelled() {
        assert_eq!(app.error_message, None);
        tokio::select! {
            data = app.app_receivers() => app.app_handlers(data).await
        }
    }
    info!("Joining...");
    // After while loop closes
    app.join_threads().await;

    info!("Shutting down gracefully...");

    Ok(())
}

/// Returns the directory that logs, config, and other files should be placed in by default.
// The rules for how it determines the directory is as follows:
// If the app is built with the portable feature, it will just return it's parent directory.
// If there is a config file present adjacent to the executable, the executable's parent path is returned.
// Otherwise, it will return the `directories` `config_dir` output.
//
// Debug builds are always portable. Release builds can optionally have the "portable" feature enabled.
fn determine_working_directory() -> Option<PathBuf> {
    let portable = is_portable();
    let exe_path = std::env::current_exe().expect("Failed to get executable path");
    let exe_parent = exe_path
        .parent()
        .expect("Couldn't get parent dir of executable")
        .to_path_buf();
    let config_path = exe_path.with_extension("toml");

    if portable || config_path.exists() {
        Some(exe_parent)
    } else {
        get_user_dir()
    }
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn is_portable() -> bool {
    true
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn is_portable() -> bool {
    false
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn get_user_dir() -> Option<PathBuf> {
    None
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn get_user_dir() -> Option<PathBuf> {
    if let Some(base_dirs) = BaseDirs::new() {
        let mut config_dir = base_dirs.config_dir().to_owned();
        config_dir.push(env!("CARGO_PKG_NAME"));
        Some(config_dir)
    } else {
        None
    }
}
