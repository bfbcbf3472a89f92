//! Client-side connector to one named peer.
//!
//! An [`Endpoint`] keeps one outbound socket to a peer broker alive:
//!
//! ```text
//! Stopped ──start()──► Connecting ──► Connected
//!                          ▲              │ socket closed / connect failed
//!                          └─ RetryWait ◄─┘
//! ```
//!
//! Subscriptions are remembered locally and re-sent on every (re)connect.
//! Indications and requests are written only while connected; while
//! disconnected they are dropped, with no buffering or retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::error::{IpcError, Result};
use crate::handler::lock;
use crate::protocol::{FrameBuffer, Message, MessageType, Payload};
use crate::transport::{is_not_found, socket_path, PipeStream};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Callback invoked with `(name, payload)` for every publish of a subscribed topic.
pub type SubscriptionCallback = Arc<dyn Fn(&str, Option<&Payload>) + Send + Sync>;

/// Callback invoked once with the payload of the matching response.
pub type ResponseCallback = Box<dyn FnOnce(Option<Payload>) + Send>;

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Not started, or stopped.
    Stopped,
    /// Connect attempt in progress.
    Connecting,
    /// Socket connected; subscriptions have been re-sent.
    Connected,
    /// Waiting out the retry delay after a failure or disconnect.
    RetryWait,
}

/// Fixed-size table of in-flight request callbacks indexed by `session - 1`.
pub(crate) struct SessionTable {
    slots: Box<[Option<ResponseCallback>]>,
    last: u32,
}

impl SessionTable {
    pub(crate) fn new(max_sessions: u32) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            slots: (0..max_sessions).map(|_| None).collect(),
            last: 0,
        }
    }

    fn max(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Store `callback` under the next session id, wrapping back to 1.
    ///
    /// A callback still waiting in that slot is dropped.
    pub(crate) fn insert(&mut self, callback: ResponseCallback) -> u32 {
        let session = if self.last >= self.max() { 1 } else { self.last + 1 };
        self.last = session;

        let slot = &mut self.slots[(session - 1) as usize];
        if slot.is_some() {
            tracing::debug!("Session {} reused before its response arrived", session);
        }
        *slot = Some(callback);
        session
    }

    /// Remove and return the callback for `session`, if any.
    pub(crate) fn take(&mut self, session: u32) -> Option<ResponseCallback> {
        if session == 0 || session > self.max() {
            return None;
        }
        self.slots[(session - 1) as usize].take()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

/// State shared between the endpoint handle and its connection task.
struct EndpointShared {
    name: String,
    path: String,
    retry_delay: Duration,
    max_buffer_size: usize,
    subscriptions: Mutex<HashMap<String, SubscriptionCallback>>,
    sessions: Mutex<SessionTable>,
    /// Writer of the current socket; `None` while disconnected.
    writer: Mutex<Option<WriterHandle>>,
    state: watch::Sender<EndpointState>,
}

impl EndpointShared {
    fn set_state(&self, state: EndpointState) {
        self.state.send_replace(state);
    }

    /// Write `message` if connected, otherwise drop it.
    fn send(&self, message: &Message) {
        let writer = lock(&self.writer).clone();
        match writer {
            Some(writer) => {
                if let Err(e) = writer.send(message) {
                    tracing::debug!(
                        "Endpoint '{}' dropped {} '{}': {}",
                        self.name,
                        message.kind,
                        message.name,
                        e
                    );
                }
            }
            None => tracing::debug!(
                "Endpoint '{}' not connected, dropped {} '{}'",
                self.name,
                message.kind,
                message.name
            ),
        }
    }

    fn dispatch(&self, message: Message) {
        match message.kind {
            MessageType::Publish => {
                let callback = lock(&self.subscriptions).get(&message.name).cloned();
                if let Some(callback) = callback {
                    callback(&message.name, message.payload.as_ref());
                }
            }
            MessageType::Response => {
                let Some(session) = message.session else {
                    return;
                };
                let callback = lock(&self.sessions).take(session);
                match callback {
                    Some(callback) => callback(message.payload),
                    None => tracing::trace!(
                        "Endpoint '{}' ignoring response for unknown session {}",
                        self.name,
                        session
                    ),
                }
            }
            _ => tracing::trace!(
                "Endpoint '{}' ignoring {} '{}'",
                self.name,
                message.kind,
                message.name
            ),
        }
    }

    /// Connect/retry loop; runs until `cancel` fires.
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.set_state(EndpointState::Connecting);

            let connected = tokio::select! {
                connected = PipeStream::connect(&self.path) => connected,
                () = cancel.cancelled() => break,
            };

            match connected {
                Ok(stream) => self.serve(stream, &cancel).await,
                Err(IpcError::Io(e)) if is_not_found(&e) => {
                    tracing::trace!("Endpoint '{}' peer not up yet at {}", self.name, self.path);
                }
                Err(e) => tracing::error!("Endpoint '{}' socket error: {}", self.name, e),
            }

            if cancel.is_cancelled() {
                break;
            }

            self.set_state(EndpointState::RetryWait);
            tokio::select! {
                () = tokio::time::sleep(self.retry_delay) => {}
                () = cancel.cancelled() => break,
            }
        }

        self.set_state(EndpointState::Stopped);
    }

    /// Drive one connected socket until it closes or `cancel` fires.
    async fn serve(&self, stream: PipeStream, cancel: &CancellationToken) {
        let (mut reader, write_half) = stream.into_split();
        let socket_cancel = cancel.child_token();
        let (writer, writer_task) = spawn_writer_task(write_half, socket_cancel.clone());

        {
            let subscriptions = lock(&self.subscriptions);
            *lock(&self.writer) = Some(writer.clone());
            for name in subscriptions.keys() {
                if let Err(e) = writer.send(&Message::subscribe(name.as_str())) {
                    tracing::debug!("Endpoint '{}' failed to resubscribe '{}': {}", self.name, name, e);
                }
            }
        }

        tracing::debug!("Endpoint '{}' connected to {}", self.name, self.path);
        self.set_state(EndpointState::Connected);

        let mut frames = FrameBuffer::with_max_size(self.max_buffer_size);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                () = socket_cancel.cancelled() => break,
            };

            match read {
                Ok(0) => {
                    tracing::debug!("Endpoint '{}' closed by peer", self.name);
                    break;
                }
                Ok(n) => {
                    for message in frames.push(&buf[..n]) {
                        self.dispatch(message);
                    }
                }
                Err(e) => {
                    tracing::error!("Endpoint '{}' socket error: {}", self.name, e);
                    break;
                }
            }
        }

        *lock(&self.writer) = None;
        socket_cancel.cancel();
        if let Ok(Err(e)) = writer_task.await {
            tracing::debug!("Endpoint '{}' writer ended with: {}", self.name, e);
        }
    }
}

/// This process's client-side handle to one named peer.
pub struct Endpoint {
    shared: Arc<EndpointShared>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Endpoint {
    /// Create a stopped endpoint for the peer called `name`.
    pub fn new(name: &str, config: &BrokerConfig) -> Self {
        let (state, _) = watch::channel(EndpointState::Stopped);
        Self {
            shared: Arc::new(EndpointShared {
                name: name.to_string(),
                path: socket_path(&config.socket_dir, name),
                retry_delay: config.retry_delay,
                max_buffer_size: config.max_buffer_size,
                subscriptions: Mutex::new(HashMap::new()),
                sessions: Mutex::new(SessionTable::new(config.max_sessions)),
                writer: Mutex::new(None),
                state,
            }),
            cancel: None,
            task: None,
        }
    }

    /// Start connecting. Any previous connection task is cancelled first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        self.cancel_task();

        let cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(self.shared.clone().run(cancel.clone())));
        self.cancel = Some(cancel);
    }

    /// Stop reconnecting, forget subscriptions and pending requests, close the socket.
    pub async fn stop(&mut self) {
        let task = self.task.take();
        self.cancel_task();
        if let Some(task) = task {
            let _ = task.await;
        }

        lock(&self.shared.subscriptions).clear();
        lock(&self.shared.sessions).clear();
        self.shared.set_state(EndpointState::Stopped);
    }

    fn cancel_task(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Send a one-way indication. Dropped if not connected.
    pub fn indication(&self, name: &str, payload: Option<Payload>) {
        self.shared.send(&Message::indication(name, payload));
    }

    /// Send a request; `callback` receives the response payload.
    ///
    /// Returns the session id used. No timeout is applied: if no response
    /// arrives the slot is reclaimed when the session counter wraps around.
    pub fn request<F>(&self, name: &str, payload: Option<Payload>, callback: F) -> u32
    where
        F: FnOnce(Option<Payload>) + Send + 'static,
    {
        let session = lock(&self.shared.sessions).insert(Box::new(callback));
        self.shared
            .send(&Message::request(name, session, payload));
        session
    }

    /// Send a request and wait for its response payload.
    ///
    /// Fails if the endpoint is stopped or the session slot is reused
    /// before the response arrives. Wrap in `tokio::time::timeout` to bound
    /// the wait.
    pub async fn call(&self, name: &str, payload: Option<Payload>) -> Result<Option<Payload>> {
        let (tx, rx) = oneshot::channel();
        let session = self.request(name, payload, move |response| {
            let _ = tx.send(response);
        });

        rx.await.map_err(|_| {
            if self.is_running() {
                IpcError::SessionOverwritten(session)
            } else {
                IpcError::ConnectionClosed
            }
        })
    }

    /// Subscribe to `name`; `callback` replaces any previous callback for it.
    pub fn subscribe<F>(&self, name: &str, callback: F)
    where
        F: Fn(&str, Option<&Payload>) + Send + Sync + 'static,
    {
        let mut subscriptions = lock(&self.shared.subscriptions);
        subscriptions.insert(name.to_string(), Arc::new(callback));
        self.shared.send(&Message::subscribe(name));
    }

    /// Unsubscribe from `name`.
    pub fn unsubscribe(&self, name: &str) {
        let mut subscriptions = lock(&self.shared.subscriptions);
        subscriptions.remove(name);
        self.shared.send(&Message::unsubscribe(name));
    }

    /// Peer name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Socket path derived from the peer name.
    pub fn path(&self) -> &str {
        &self.shared.path
    }

    /// Whether `start()` was called without a later `stop()`.
    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    /// Current connection state.
    pub fn state(&self) -> EndpointState {
        *self.shared.state.borrow()
    }

    /// Wait until the endpoint reaches `state`.
    pub async fn wait_for_state(&self, state: EndpointState) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Topics currently tracked for resubscription, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.shared.subscriptions).keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.sessions).in_flight()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.cancel_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PipeListener;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    fn config(dir: &std::path::Path) -> BrokerConfig {
        BrokerConfig {
            socket_dir: dir.to_path_buf(),
            retry_delay: Duration::from_millis(50),
            ..BrokerConfig::default()
        }
    }

    async fn read_messages(
        reader: &mut crate::transport::PipeReader,
        frames: &mut FrameBuffer,
        count: usize,
    ) -> Vec<Message> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        tokio::time::timeout(Duration::from_secs(5), async {
            while out.len() < count {
                let n = reader.read(&mut buf).await.unwrap();
                assert!(n > 0, "endpoint closed early");
                out.extend(frames.push(&buf[..n]));
            }
        })
        .await
        .unwrap();
        out
    }

    #[test]
    fn test_session_table_wraps_around() {
        let mut table = SessionTable::new(3);
        let sessions: Vec<u32> = (0..7).map(|_| table.insert(Box::new(|_| {}))).collect();
        assert_eq!(sessions, vec![1, 2, 3, 1, 2, 3, 1]);
        assert_eq!(table.in_flight(), 3);
    }

    #[test]
    fn test_session_table_take_once() {
        let mut table = SessionTable::new(5);
        let session = table.insert(Box::new(|_| {}));

        assert!(table.take(session).is_some());
        assert!(table.take(session).is_none());
        assert!(table.take(0).is_none());
        assert!(table.take(6).is_none());
        assert!(table.take(u32::MAX).is_none());
    }

    #[test]
    fn test_session_table_overwrite_drops_old_callback() {
        let mut table = SessionTable::new(1);
        let (tx, mut rx) = oneshot::channel::<()>();

        table.insert(Box::new(move |_| {
            let _ = tx.send(());
        }));
        table.insert(Box::new(|_| {}));

        // The first callback was dropped without running.
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_zero_sessions_is_clamped() {
        let mut table = SessionTable::new(0);
        assert_eq!(table.insert(Box::new(|_| {})), 1);
        assert_eq!(table.insert(Box::new(|_| {})), 1);
    }

    #[tokio::test]
    async fn test_calls_while_disconnected_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut endpoint = Endpoint::new("absent", &config(dir.path()));
        endpoint.start();

        endpoint.indication("ping", None);
        endpoint.subscribe("temp", |_name: &str, _payload: Option<&Payload>| {});
        let session = endpoint.request("add", Some(json!([1, 2])), |_| {});

        assert_eq!(session, 1);
        assert_eq!(endpoint.subscriptions(), vec!["temp".to_string()]);
        assert_eq!(endpoint.pending_requests(), 1);
        assert_ne!(endpoint.state(), EndpointState::Connected);

        endpoint.stop().await;
        assert_eq!(endpoint.state(), EndpointState::Stopped);
        assert!(endpoint.subscriptions().is_empty());
        assert_eq!(endpoint.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_resubscribes_after_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut listener = PipeListener::bind(&socket_path(dir.path(), "peer")).unwrap();

        let mut endpoint = Endpoint::new("peer", &config);
        endpoint.subscribe("a", |_name: &str, _payload: Option<&Payload>| {});
        endpoint.start();

        let (mut reader, writer) = listener.accept().await.unwrap().into_split();
        let mut frames = FrameBuffer::new();
        let first = read_messages(&mut reader, &mut frames, 1).await;
        assert_eq!(first, vec![Message::subscribe("a")]);

        endpoint.wait_for_state(EndpointState::Connected).await;
        endpoint.subscribe("b", |_name: &str, _payload: Option<&Payload>| {});
        let second = read_messages(&mut reader, &mut frames, 1).await;
        assert_eq!(second, vec![Message::subscribe("b")]);

        // Server drops the socket; the endpoint reconnects after the retry delay.
        drop(reader);
        drop(writer);

        let (mut reader, _writer) = listener.accept().await.unwrap().into_split();
        let mut frames = FrameBuffer::new();
        let mut again = read_messages(&mut reader, &mut frames, 2).await;
        again.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(again, vec![Message::subscribe("a"), Message::subscribe("b")]);

        endpoint.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_endpoint_does_not_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let mut listener = PipeListener::bind(&socket_path(dir.path(), "peer")).unwrap();

        let mut endpoint = Endpoint::new("peer", &config(dir.path()));
        endpoint.start();
        let _socket = listener.accept().await.unwrap();
        endpoint.wait_for_state(EndpointState::Connected).await;

        endpoint.stop().await;
        assert!(!endpoint.is_running());

        let reconnect =
            tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(reconnect.is_err(), "stopped endpoint must not reconnect");
    }

    #[tokio::test]
    async fn test_stop_returns_when_peer_never_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut listener = PipeListener::bind(&socket_path(dir.path(), "peer")).unwrap();

        let mut endpoint = Endpoint::new("peer", &config(dir.path()));
        endpoint.start();
        // Accepted but never read.
        let _socket = listener.accept().await.unwrap();
        endpoint.wait_for_state(EndpointState::Connected).await;

        let chunk = "x".repeat(500_000);
        for _ in 0..20 {
            endpoint.indication("big", Some(Payload::String(chunk.clone())));
        }

        let stopped = tokio::time::timeout(Duration::from_secs(5), endpoint.stop()).await;
        assert!(stopped.is_ok(), "stop blocked on a peer that does not read");
        assert_eq!(endpoint.state(), EndpointState::Stopped);
    }

    #[tokio::test]
    async fn test_dispatches_publish_and_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut listener = PipeListener::bind(&socket_path(dir.path(), "peer")).unwrap();

        let mut endpoint = Endpoint::new("peer", &config(dir.path()));
        endpoint.start();
        let (mut reader, mut writer) = listener.accept().await.unwrap().into_split();
        endpoint.wait_for_state(EndpointState::Connected).await;

        let publishes = Arc::new(Mutex::new(Vec::new()));
        let sink = publishes.clone();
        endpoint.subscribe("temp", move |name: &str, payload: Option<&Payload>| {
            sink.lock().unwrap().push((name.to_string(), payload.cloned()));
        });

        let responses = Arc::new(AtomicUsize::new(0));
        let counter = responses.clone();
        let session = endpoint.request("add", Some(json!([1, 2])), move |payload| {
            assert_eq!(payload, Some(json!(3)));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut frames = FrameBuffer::new();
        let sent = read_messages(&mut reader, &mut frames, 2).await;
        assert_eq!(
            sent,
            vec![
                Message::subscribe("temp"),
                Message::request("add", session, Some(json!([1, 2]))),
            ]
        );

        let mut reply = Vec::new();
        for message in [
            Message::publish("temp", Some(json!(21))),
            Message::publish("other", Some(json!(0))),
            Message::response("add", session, Some(json!(3))),
            Message::response("add", session, Some(json!(3))),
            Message::response("add", 4242, Some(json!(3))),
            Message::publish("temp", Some(json!(22))),
        ] {
            reply.extend_from_slice(&message.to_frame().unwrap());
        }
        writer.write_all(&reply).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while publishes.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(responses.load(Ordering::SeqCst), 1);
        assert_eq!(
            *publishes.lock().unwrap(),
            vec![
                ("temp".to_string(), Some(json!(21))),
                ("temp".to_string(), Some(json!(22))),
            ]
        );
        assert_eq!(endpoint.pending_requests(), 0);

        endpoint.stop().await;
    }

    #[tokio::test]
    async fn test_call_fails_when_session_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let config = BrokerConfig {
            max_sessions: 1,
            ..config(dir.path())
        };
        let mut endpoint = Endpoint::new("absent", &config);
        endpoint.start();

        {
            let pending = endpoint.call("slow", None);
            tokio::pin!(pending);

            // Poll once so the request is registered, then reuse the only slot.
            assert!(poll_once(pending.as_mut()).await.is_none());
            endpoint.request("fast", None, |_| {});

            let result = pending.await;
            assert!(matches!(result, Err(IpcError::SessionOverwritten(1))));
        }

        endpoint.stop().await;
    }

    /// Poll a future exactly once.
    async fn poll_once<F: std::future::Future + Unpin>(fut: F) -> Option<F::Output> {
        let mut fut = fut;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut fut).poll(cx) {
                std::task::Poll::Ready(out) => Some(out),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
