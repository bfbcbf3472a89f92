//! Echo service - simple request/response example.
//!
//! This example demonstrates:
//! - Registering a request callback with `Broker::on_request`
//! - Decoding and encoding typed payloads with `JsonCodec`
//! - Awaiting the response with `Endpoint::call`
//!
//! ```bash
//! cargo run --example echo
//! ```

use std::sync::Arc;
use std::time::Duration;

use ipcbus::codec::JsonCodec;
use ipcbus::{Broker, EndpointState, Payload, Responder};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Input structure for the echo request.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo request.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut service = Broker::new();
    service.start("echo", &[]).await;
    service.on_request(Arc::new(
        |name: &str, payload: Option<&Payload>, responder: Responder| {
            if name != "echo" {
                return;
            }
            match JsonCodec::decode::<EchoInput>(payload) {
                Ok(input) => {
                    let _ = responder.respond_json(&EchoOutput { echo: input.message });
                }
                Err(e) => tracing::warn!("Bad echo payload: {}", e),
            }
        },
    ));

    let mut app = Broker::new();
    app.start("app", &["echo"]).await;

    if let Some(endpoint) = app.endpoint("echo") {
        endpoint.wait_for_state(EndpointState::Connected).await;

        let input = JsonCodec::encode(&EchoInput {
            message: "hello".to_string(),
        })?;
        let response = tokio::time::timeout(Duration::from_secs(5), endpoint.call("echo", Some(input))).await??;
        let output: EchoOutput = JsonCodec::decode(response.as_ref())?;
        tracing::info!("Got {:?}", output);
    }

    app.stop().await;
    service.stop().await;
    Ok(())
}
