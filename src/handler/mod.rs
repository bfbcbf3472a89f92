//! Handler module - callbacks for received indications and requests.
//!
//! Provides:
//! - [`HandlerRegistry`] - process-wide lists of indication/request callbacks
//! - [`Responder`] - lets a request callback send the correlated response
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ipcbus::handler::{HandlerRegistry, RequestCallback, Responder};
//! use ipcbus::protocol::Payload;
//!
//! let registry = HandlerRegistry::new();
//!
//! let echo: RequestCallback = Arc::new(|_name: &str, payload: Option<&Payload>, responder: Responder| {
//!     let _ = responder.respond(payload.cloned());
//! });
//! assert!(registry.add_request(echo.clone()));
//! assert!(!registry.add_request(echo));
//! ```

mod context;
mod registry;

pub(crate) use registry::lock;

pub use context::Responder;
pub use registry::{HandlerRegistry, IndicationCallback, RequestCallback};
