//! Responder handed to request callbacks.
//!
//! A request arrives with a session id; the responder remembers the request
//! name and session and writes a matching `response` back on the same socket.
//!
//! # Example
//!
//! ```ignore
//! broker.on_request(Arc::new(|name: &str, payload: Option<&Payload>, responder: Responder| {
//!     if name == "echo" {
//!         let _ = responder.respond(payload.cloned());
//!     }
//! }));
//! ```

use serde::Serialize;

use crate::codec::JsonCodec;
use crate::error::Result;
use crate::protocol::{Message, Payload};
use crate::writer::WriterHandle;

/// Sends the response for one received request.
///
/// Consumed by [`respond`](Responder::respond). Dropping it without
/// responding sends nothing; the caller's callback simply never fires.
pub struct Responder {
    /// Name of the request being answered.
    name: String,
    /// Session id copied from the request.
    session: u32,
    /// Writer of the connection the request came in on.
    writer: Option<WriterHandle>,
}

impl Responder {
    /// Create a responder that is not attached to a socket (for testing).
    pub fn detached(name: impl Into<String>, session: u32) -> Self {
        Self {
            name: name.into(),
            session,
            writer: None,
        }
    }

    /// Create a responder writing to a connection.
    pub(crate) fn with_writer(name: impl Into<String>, session: u32, writer: WriterHandle) -> Self {
        Self {
            name: name.into(),
            session,
            writer: Some(writer),
        }
    }

    /// Another responder for the same request, one per registered callback.
    pub(crate) fn fork(&self) -> Self {
        Self {
            name: self.name.clone(),
            session: self.session,
            writer: self.writer.clone(),
        }
    }

    /// Get the request name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the request session id.
    #[inline]
    pub fn session(&self) -> u32 {
        self.session
    }

    /// Build the response message this responder would send.
    pub fn response(&self, payload: Option<Payload>) -> Message {
        Message::response(self.name.clone(), self.session, payload)
    }

    /// Send a response with the given payload.
    ///
    /// Delivery is best-effort: an error only means the connection is gone.
    pub fn respond(self, payload: Option<Payload>) -> Result<()> {
        let message = self.response(payload);
        match &self.writer {
            Some(writer) => writer.send(&message),
            None => Ok(()),
        }
    }

    /// Serialize `value` and send it as the response payload.
    pub fn respond_json<T: Serialize>(self, value: &T) -> Result<()> {
        let payload = JsonCodec::encode(value)?;
        self.respond(Some(payload))
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("name", &self.name)
            .field("session", &self.session)
            .field("attached", &self.writer.is_some())
            .finish()
    }
}
