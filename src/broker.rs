//! Broker facade: listening socket, publish cache and named peers.
//!
//! A [`Broker`] is started with this process's name and the names of the
//! peers it talks to:
//!
//! 1. Creates one [`Endpoint`] per peer and starts it connecting
//! 2. Binds the listening socket at `socket_path(dir, name)`
//! 3. Accepts peers, wrapping each socket in a [`Connection`]
//! 4. Forwards `publish` to subscribed connections and remembers the
//!    latest value per topic for late subscribers
//!
//! # Example
//!
//! ```ignore
//! use ipcbus::Broker;
//! use serde_json::json;
//!
//! let mut broker = Broker::new();
//! broker.start("weather", &["display"]).await;
//! broker.publish("temp", Some(json!(21.5)));
//!
//! if let Some(display) = broker.endpoint("display") {
//!     display.indication("refresh", None);
//! }
//!
//! broker.stop().await;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::connection::{Connection, ConnectionContext, PublishCache};
use crate::endpoint::Endpoint;
use crate::handler::{lock, HandlerRegistry, IndicationCallback, RequestCallback};
use crate::protocol::{Message, Payload};
use crate::transport::{socket_path, PipeListener};

/// Builder for a [`Broker`] with non-default settings.
#[derive(Debug, Clone, Default)]
pub struct BrokerBuilder {
    config: BrokerConfig,
}

impl BrokerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory socket paths are derived from.
    ///
    /// Default: `std::env::temp_dir()`
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.socket_dir = dir.into();
        self
    }

    /// Delay before re-binding the listener or reconnecting an endpoint.
    ///
    /// Default: 1 second
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Session slots per endpoint.
    ///
    /// Default: 10 000
    pub fn max_sessions(mut self, max: u32) -> Self {
        self.config.max_sessions = max;
        self
    }

    /// Cap on buffered unframed bytes per socket.
    ///
    /// Default: 1 000 000
    pub fn max_buffer_size(mut self, max: usize) -> Self {
        self.config.max_buffer_size = max;
        self
    }

    /// Build a stopped broker.
    pub fn build(self) -> Broker {
        Broker::with_config(self.config)
    }
}

/// State shared with the accept loop.
struct BrokerShared {
    cache: PublishCache,
    connections: Mutex<Vec<Connection>>,
    handlers: Arc<HandlerRegistry>,
}

impl BrokerShared {
    /// Stop every accepted connection and hand them back for awaiting.
    fn take_connections(&self) -> Vec<Connection> {
        let connections = std::mem::take(&mut *lock(&self.connections));
        for connection in &connections {
            connection.stop();
        }
        connections
    }
}

/// One process's attachment to the local bus.
pub struct Broker {
    config: BrokerConfig,
    name: Option<String>,
    path: Option<String>,
    shared: Arc<BrokerShared>,
    endpoints: BTreeMap<String, Endpoint>,
    cancel: Option<CancellationToken>,
    server: Option<JoinHandle<()>>,
}

impl Broker {
    /// Create a stopped broker with default settings.
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a builder.
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Create a stopped broker with `config`.
    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            config,
            name: None,
            path: None,
            shared: Arc::new(BrokerShared {
                cache: Arc::new(Mutex::new(HashMap::new())),
                connections: Mutex::new(Vec::new()),
                handlers: Arc::new(HandlerRegistry::new()),
            }),
            endpoints: BTreeMap::new(),
            cancel: None,
            server: None,
        }
    }

    /// Start listening as `name` and connect out to each of `peers`.
    ///
    /// A running broker is stopped first, which also clears its callbacks.
    /// Bind failures are logged and retried after the retry delay.
    pub async fn start(&mut self, name: &str, peers: &[&str]) {
        if self.is_running() {
            self.stop().await;
        }

        let path = socket_path(&self.config.socket_dir, name);
        self.name = Some(name.to_string());
        self.path = Some(path.clone());

        for peer in peers {
            let mut endpoint = Endpoint::new(peer, &self.config);
            endpoint.start();
            self.endpoints.insert(peer.to_string(), endpoint);
        }

        let cancel = CancellationToken::new();
        let server = Server {
            name: name.to_string(),
            path,
            shared: self.shared.clone(),
            context: ConnectionContext::new(
                self.shared.cache.clone(),
                self.shared.handlers.clone(),
                self.config.max_buffer_size,
            ),
            retry_delay: self.config.retry_delay,
            next_id: 0,
        };
        let listener = server.bind();
        self.server = Some(tokio::spawn(server.run(listener, cancel.clone())));
        self.cancel = Some(cancel);
    }

    /// Tear everything down; the broker can be started again afterwards.
    ///
    /// Closes the listening socket, stops every endpoint and connection,
    /// and clears the publish cache and all callbacks.
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }

        for (_, mut endpoint) in std::mem::take(&mut self.endpoints) {
            endpoint.stop().await;
        }

        for connection in self.shared.take_connections() {
            connection.closed().await;
        }

        lock(&self.shared.cache).clear();
        self.shared.handlers.clear();

        if let Some(name) = self.name.take() {
            tracing::debug!("Broker '{}' stopped", name);
        }
        self.path = None;
    }

    /// Publish `payload` on topic `name`.
    ///
    /// The value is cached for later subscribers and forwarded to every
    /// connection currently subscribed to `name`.
    pub fn publish(&self, name: &str, payload: Option<Payload>) {
        let message = Message::publish(name, payload);

        // Cache before connections: see the subscribe path in `connection`.
        let mut cache = lock(&self.shared.cache);
        cache.insert(name.to_string(), message.clone());

        let connections = lock(&self.shared.connections);
        for connection in connections.iter() {
            connection.publish(name, &message);
        }
    }

    /// Register a callback for indications received from any peer.
    ///
    /// Returns `false` if this exact callback is already registered.
    pub fn on_indication(&self, callback: IndicationCallback) -> bool {
        self.shared.handlers.add_indication(callback)
    }

    /// Register a callback for requests received from any peer.
    ///
    /// Returns `false` if this exact callback is already registered.
    pub fn on_request(&self, callback: RequestCallback) -> bool {
        self.shared.handlers.add_request(callback)
    }

    /// Whether `start()` was called without a later `stop()`.
    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    /// Name given to the last `start()`.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Listening socket path, while running.
    pub fn socket_path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Endpoint for the peer called `name`.
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }

    /// All endpoints, ordered by peer name.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Cached publish for topic `name`.
    pub fn cached(&self, name: &str) -> Option<Message> {
        lock(&self.shared.cache).get(name).cloned()
    }

    /// Number of accepted connections not yet swept.
    pub fn connection_count(&self) -> usize {
        lock(&self.shared.connections).len()
    }

    /// Settings this broker was built with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.shared.take_connections();
    }
}

/// Accept loop state.
struct Server {
    name: String,
    path: String,
    shared: Arc<BrokerShared>,
    context: ConnectionContext,
    retry_delay: Duration,
    next_id: u64,
}

impl Server {
    /// Serve `listener`; after a bind or accept failure, wait the retry delay
    /// and bind again.
    async fn run(mut self, mut listener: Option<PipeListener>, cancel: CancellationToken) {
        loop {
            if let Some(bound) = listener.take() {
                if !self.accept_loop(bound, &cancel).await {
                    return;
                }
            }

            self.shared.take_connections();
            tokio::select! {
                () = tokio::time::sleep(self.retry_delay) => {}
                () = cancel.cancelled() => return,
            }

            listener = self.bind();
        }
    }

    /// One bind attempt; failures are logged.
    fn bind(&self) -> Option<PipeListener> {
        match PipeListener::bind(&self.path) {
            Ok(listener) => {
                tracing::debug!("Broker '{}' listening on {}", self.name, self.path);
                Some(listener)
            }
            Err(e) => {
                tracing::error!("Broker '{}' server error: {}", self.name, e);
                None
            }
        }
    }

    /// Accept until cancelled (returns `false`) or the listener fails (returns `true`).
    ///
    /// Dropping the listener on return removes the socket file.
    async fn accept_loop(&mut self, mut listener: PipeListener, cancel: &CancellationToken) -> bool {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = cancel.cancelled() => return false,
            };

            match accepted {
                Ok(stream) => {
                    self.next_id += 1;
                    let mut connection =
                        Connection::new(self.next_id, stream.into_split(), self.context.clone());
                    connection.start();
                    tracing::trace!("Broker '{}' accepted connection {}", self.name, self.next_id);

                    let mut connections = lock(&self.shared.connections);
                    connections.push(connection);
                    connections.retain(|connection| {
                        if connection.is_open() {
                            true
                        } else {
                            connection.stop();
                            false
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Broker '{}' server error: {}", self.name, e);
                    return true;
                }
            }
        }
    }
}
