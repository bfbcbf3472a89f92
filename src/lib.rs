//! # ipcbus
//!
//! Local inter-process message bus over Unix domain sockets (Windows named pipes).
//!
//! Every process runs one [`Broker`] under a unique name. The broker listens
//! on a well-known socket derived from that name and connects out to the
//! peers it names, keeping one [`Endpoint`] per peer.
//!
//! ## Messaging patterns
//!
//! - **Publish/subscribe**: `Broker::publish` caches the latest value per topic
//!   and forwards it to subscribed peers; a late subscriber gets the cached value.
//! - **Request/response**: `Endpoint::request` / `Endpoint::call`, answered by
//!   callbacks registered with `Broker::on_request`.
//! - **Indications**: fire-and-forget via `Endpoint::indication`, received by
//!   `Broker::on_indication` callbacks.
//!
//! ## Wire format
//!
//! Each message is a JSON object framed as `[GLS]{...}[GLE]`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ipcbus::{Broker, Payload, Responder};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Broker::new();
//!     server.start("math", &[]).await;
//!     server.on_request(Arc::new(|_name: &str, payload: Option<&Payload>, responder: Responder| {
//!         let _ = responder.respond(payload.cloned());
//!     }));
//!
//!     let mut client = Broker::new();
//!     client.start("app", &["math"]).await;
//!
//!     let math = client.endpoint("math").unwrap();
//!     math.wait_for_state(ipcbus::EndpointState::Connected).await;
//!     let echoed = math.call("echo", Some(json!([1, 2]))).await.unwrap();
//!     assert_eq!(echoed, Some(json!([1, 2])));
//!
//!     client.stop().await;
//!     server.stop().await;
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod broker;
mod connection;
mod endpoint;

pub use broker::{Broker, BrokerBuilder};
pub use config::BrokerConfig;
pub use connection::{Connection, ConnectionContext, PublishCache};
pub use endpoint::{Endpoint, EndpointState, ResponseCallback, SubscriptionCallback};
pub use error::{IpcError, Result};
pub use handler::{IndicationCallback, RequestCallback, Responder};
pub use protocol::{Message, MessageType, Payload};
