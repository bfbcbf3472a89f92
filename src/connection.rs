//! Server-side handler for one accepted socket.
//!
//! A [`Connection`] tracks which topics its peer subscribed to, forwards
//! matching publishes, replays the cached value of a topic on a fresh
//! subscription, and hands indications and requests to the broker's
//! [`HandlerRegistry`]. It never touches any other connection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::handler::{lock, HandlerRegistry, Responder};
use crate::protocol::{FrameBuffer, Message, MessageType};
use crate::transport::{PipeReader, PipeWriter};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Most recent `publish` message per topic.
pub type PublishCache = Arc<Mutex<HashMap<String, Message>>>;

/// Read buffer size per socket read.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Broker state a connection needs to serve its peer.
#[derive(Clone)]
pub struct ConnectionContext {
    pub(crate) cache: PublishCache,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) max_buffer_size: usize,
}

impl ConnectionContext {
    /// Bundle the cache, callbacks and buffer cap that connections share.
    pub fn new(
        cache: PublishCache,
        handlers: Arc<HandlerRegistry>,
        max_buffer_size: usize,
    ) -> Self {
        Self {
            cache,
            handlers,
            max_buffer_size,
        }
    }
}

/// One accepted peer socket.
pub struct Connection {
    id: u64,
    context: ConnectionContext,
    /// Socket halves, taken by `start()`.
    io: Option<(PipeReader, PipeWriter)>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    writer: Option<WriterHandle>,
    /// Cleared when the read side hits EOF or an error.
    reading: Arc<AtomicBool>,
    cancel: CancellationToken,
    read_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<Result<()>>>,
}

impl Connection {
    /// Wrap an accepted socket. Nothing is read or written until [`start`](Self::start).
    pub fn new(id: u64, io: (PipeReader, PipeWriter), context: ConnectionContext) -> Self {
        Self {
            id,
            context,
            io: Some(io),
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            writer: None,
            reading: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            read_task: None,
            writer_task: None,
        }
    }

    /// Spawn the writer task and the read loop. Calling it twice is a no-op.
    pub fn start(&mut self) {
        let Some((reader, write_half)) = self.io.take() else {
            return;
        };

        let (writer, writer_task) = spawn_writer_task(write_half, self.cancel.clone());
        self.reading.store(true, Ordering::Release);

        let read_task = tokio::spawn(read_loop(
            self.id,
            reader,
            self.context.clone(),
            self.subscriptions.clone(),
            writer.clone(),
            self.reading.clone(),
            self.cancel.clone(),
        ));

        self.writer = Some(writer);
        self.writer_task = Some(writer_task);
        self.read_task = Some(read_task);
    }

    /// Forget all subscriptions and close the socket.
    ///
    /// Frames already queued are still written before the write side is shut down.
    pub fn stop(&self) {
        lock(&self.subscriptions).clear();
        self.cancel.cancel();
    }

    /// Wait until both the read loop and the writer task have finished.
    pub async fn closed(mut self) {
        if let Some(task) = self.read_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.writer_task.take() {
            match task.await {
                Ok(Err(e)) => tracing::debug!("Connection {} writer ended with: {}", self.id, e),
                Ok(Ok(())) | Err(_) => {}
            }
        }
    }

    /// True while the socket is started and neither side has closed.
    pub fn is_open(&self) -> bool {
        let writer_open = self.writer.as_ref().is_some_and(|w| !w.is_closed());
        self.reading.load(Ordering::Acquire) && writer_open && !self.cancel.is_cancelled()
    }

    /// Forward `message` if this peer is subscribed to `name`.
    ///
    /// Returns whether the message was queued.
    pub fn publish(&self, name: &str, message: &Message) -> bool {
        if !lock(&self.subscriptions).contains(name) {
            return false;
        }
        let Some(writer) = &self.writer else {
            return false;
        };
        match writer.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Connection {} dropped publish of '{}': {}", self.id, name, e);
                false
            }
        }
    }

    /// Connection id, unique per broker run.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this peer is subscribed to `name`.
    pub fn is_subscribed(&self, name: &str) -> bool {
        lock(&self.subscriptions).contains(name)
    }

    /// Topics this peer is subscribed to, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.subscriptions).iter().cloned().collect();
        names.sort();
        names
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    id: u64,
    mut reader: PipeReader,
    context: ConnectionContext,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    writer: WriterHandle,
    reading: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut frames = FrameBuffer::with_max_size(context.max_buffer_size);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buf) => read,
            () = cancel.cancelled() => break,
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!("Connection {} closed by peer", id);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!("Connection {} socket error: {}", id, e);
                break;
            }
        };

        for message in frames.push(&buf[..n]) {
            handle_message(id, message, &context, &subscriptions, &writer);
        }
    }

    reading.store(false, Ordering::Release);
    // Peer is gone: let the writer finish and close our side too.
    cancel.cancel();
}

fn handle_message(
    id: u64,
    message: Message,
    context: &ConnectionContext,
    subscriptions: &Mutex<HashSet<String>>,
    writer: &WriterHandle,
) {
    let Message {
        name,
        kind,
        session,
        payload,
    } = message;

    match kind {
        MessageType::Subscribe => {
            // Cache lock first: a concurrent publish either lands before the
            // replay (and is replayed) or after the subscription (and is forwarded).
            let cache = lock(&context.cache);
            let fresh = lock(subscriptions).insert(name.clone());
            if !fresh {
                return;
            }
            tracing::trace!("Connection {} subscribed to '{}'", id, name);
            if let Some(cached) = cache.get(&name) {
                if let Err(e) = writer.send(cached) {
                    tracing::debug!("Connection {} dropped replay of '{}': {}", id, name, e);
                }
            }
        }
        MessageType::Unsubscribe => {
            lock(subscriptions).remove(&name);
        }
        MessageType::Indication => {
            context.handlers.dispatch_indication(&name, payload.as_ref());
        }
        MessageType::Request => match session {
            Some(session) => {
                let responder = Responder::with_writer(name.clone(), session, writer.clone());
                context
                    .handlers
                    .dispatch_request(&name, payload.as_ref(), responder);
            }
            None => tracing::trace!("Connection {} ignoring request '{}' without session", id, name),
        },
        MessageType::Publish | MessageType::Response => {
            tracing::trace!("Connection {} ignoring {} '{}'", id, kind, name);
        }
    }
}
