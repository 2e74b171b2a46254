use std::{thread::sleep, time::Duration};

use cardiowatch::args::TopLevelCmd;
use tokio_util::sync::CancellationToken;

use futures_util::SinkExt;
use futures_util::StreamExt;
use http::Uri;
use tokio_websockets::ClientBuilder;

use ntest::timeout;

use common::headless_thread;
mod common;

#[tokio::test]
#[ignore = "can't be concurrent"]
#[timeout(10000)] // 10s timeout
async fn feed_streams_simulated_heart_rate() -> Result<(), cardiowatch::errors::AppError> {
    let parent_token = CancellationToken::new();

    let arg_config = TopLevelCmd {
        config_override: Some("tests/test_configs/feed_stream.toml".into()),
        config_required: true,
        no_save: true,
        patient: None,
        subcommands: None,
    };

    let parent_clone = parent_token.clone();
    let app_thread = std::thread::spawn(move || headless_thread(arg_config, parent_clone));
    let addr = "ws://127.0.0.1:5577";
    let uri = Uri::from_maybe_shared(addr).expect("Invalid URI supplied!");
    sleep(Duration::from_millis(250));
    println!("App running");
    let (mut client, _) = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        ClientBuilder::from_uri(uri).connect(),
    )
    .await
    .expect("Connecting to feed server timed out!")
    .expect("Failed to connect to feed server!");
    println!("Feed connected");

    // The simulator sweeps between 60 and 80 bpm; wait for a reading
    let mut seen_bpm = None;
    while seen_bpm.is_none() {
        let message = tokio::time::timeout(Duration::from_secs(3), client.next())
            .await
            .expect("No feed message arrived in time!")
            .expect("Feed closed early!")
            .expect("Feed errored!");
        if !message.is_text() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(message.as_text().unwrap()).expect("Feed sent invalid JSON!");
        match value["type"].as_str() {
            Some("heart_rate") => {
                seen_bpm = value["bpm"].as_u64();
            }
            Some("patient") => {
                assert_eq!(value["label"], "unassigned");
            }
            _ => {}
        }
    }
    let bpm = seen_bpm.unwrap();
    assert!(
        (59..=81).contains(&bpm),
        "simulated bpm out of range: {bpm}"
    );

    println!("Shutting down, all ok");

    parent_token.cancel();
    client.close().await?;
    let _ = app_thread.join();
    Ok(())
}
