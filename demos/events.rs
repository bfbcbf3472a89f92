//! Indications - fire-and-forget progress events.
//!
//! A worker reports progress to a monitor with `Endpoint::indication`.
//! Nothing is acknowledged; indications sent while disconnected are dropped.
//!
//! ```bash
//! cargo run --example events
//! ```

use std::sync::Arc;
use std::time::Duration;

use ipcbus::codec::JsonCodec;
use ipcbus::{Broker, EndpointState, Payload};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Progress event structure.
#[derive(Serialize, Deserialize, Debug)]
struct ProgressEvent {
    percent: u32,
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut monitor = Broker::new();
    monitor.start("monitor", &[]).await;
    monitor.on_indication(Arc::new(|name: &str, payload: Option<&Payload>| {
        match JsonCodec::decode::<ProgressEvent>(payload) {
            Ok(event) => tracing::info!("{}: {}% {}", name, event.percent, event.message),
            Err(_) => tracing::info!("{}", name),
        }
    }));

    let mut worker = Broker::new();
    worker.start("worker", &["monitor"]).await;

    if let Some(endpoint) = worker.endpoint("monitor") {
        endpoint.wait_for_state(EndpointState::Connected).await;

        let steps = 5;
        for step in 1..=steps {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let event = ProgressEvent {
                percent: step * 100 / steps,
                message: format!("Step {} of {}", step, steps),
            };
            endpoint.indication("progress", Some(JsonCodec::encode(&event)?));
        }
        endpoint.indication("done", None);
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    worker.stop().await;
    monitor.stop().await;
    Ok(())
}
