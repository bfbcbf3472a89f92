//! Publish/subscribe between two brokers.
//!
//! This example demonstrates:
//! - Publishing before anyone subscribes (the value is cached)
//! - A late subscriber receiving the cached value on subscribe
//! - Live publishes forwarded to the subscriber
//!
//! ```bash
//! RUST_LOG=ipcbus=debug cargo run --example pubsub
//! ```

use std::time::Duration;

use ipcbus::{Broker, EndpointState, Payload};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let mut weather = Broker::new();
    weather.start("weather", &[]).await;
    weather.publish("temp", Some(json!(19.5)));

    let mut display = Broker::new();
    display.start("display", &["weather"]).await;

    let Some(endpoint) = display.endpoint("weather") else {
        return;
    };
    endpoint.wait_for_state(EndpointState::Connected).await;
    endpoint.subscribe("temp", |name: &str, payload: Option<&Payload>| {
        tracing::info!("{} = {}", name, payload.cloned().unwrap_or_default());
    });

    for reading in [20.0, 20.5, 21.0] {
        tokio::time::sleep(Duration::from_millis(200)).await;
        weather.publish("temp", Some(json!(reading)));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    display.stop().await;
    weather.stop().await;
}
