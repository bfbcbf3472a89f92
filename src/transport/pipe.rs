//! Platform-specific pipe/socket implementation.
//!
//! - Unix: Unix Domain Socket at `<dir>/ipc_<name>`
//! - Windows: Named Pipe at `\\.\pipe\<dir>\<name>`
//!
//! # Example
//!
//! ```ignore
//! use ipcbus::transport::{socket_path, PipeListener, PipeStream};
//!
//! let path = socket_path(&std::env::temp_dir(), "weather");
//! let mut listener = PipeListener::bind(&path)?;
//! let client = PipeStream::connect(&path).await?;
//! let server = listener.accept().await?;
//! ```

use std::io;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Read half of a connected pipe.
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connected pipe.
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Derive the socket address of the endpoint called `name`.
///
/// Format:
/// - Unix: `<dir>/ipc_<name>`
/// - Windows: `\\.\pipe\<dir>\<name>`
pub fn socket_path(dir: &Path, name: &str) -> String {
    #[cfg(unix)]
    {
        dir.join(format!("ipc_{}", name)).to_string_lossy().into_owned()
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\{}\{}", dir.display(), name)
    }
}

/// Whether a connect error means the peer has simply not started yet.
pub fn is_not_found(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }

    // ERROR_PIPE_BUSY: the pipe exists but every instance is taken.
    #[cfg(windows)]
    if err.raw_os_error() == Some(231) {
        return true;
    }

    false
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tokio::net::{UnixListener, UnixStream};

    /// Unix Domain Socket listener.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    /// Unix Domain Socket stream (connected).
    pub struct PipeStream {
        stream: UnixStream,
    }

    impl PipeListener {
        /// Bind to a Unix socket path.
        ///
        /// Removes any stale socket file at the path before binding.
        /// Must be called from within a Tokio runtime.
        pub fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }

            let listener = UnixListener::bind(path)?;

            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&mut self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(PipeStream { stream })
        }

        /// Get the socket path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl PipeStream {
        /// Connect to the listener at `path`.
        pub async fn connect(path: &str) -> Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }

        /// Split into owned read and write halves.
        pub fn into_split(self) -> (PipeReader, PipeWriter) {
            let (reader, writer) = self.stream.into_split();
            (Box::new(reader), Box::new(writer))
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// Windows Named Pipe listener.
    ///
    /// Always holds one idle server instance waiting for the next client.
    pub struct PipeListener {
        next: NamedPipeServer,
        path: String,
    }

    enum PipeInner {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    /// Windows Named Pipe stream (connected).
    pub struct PipeStream {
        inner: PipeInner,
    }

    impl PipeListener {
        /// Create the first Named Pipe server instance.
        pub fn bind(path: &str) -> Result<Self> {
            let next = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;

            Ok(Self {
                next,
                path: path.to_string(),
            })
        }

        /// Accept a single connection.
        pub async fn accept(&mut self) -> Result<PipeStream> {
            self.next.connect().await?;

            let fresh = ServerOptions::new().create(&self.path)?;
            let connected = std::mem::replace(&mut self.next, fresh);

            Ok(PipeStream {
                inner: PipeInner::Server(connected),
            })
        }

        /// Get the pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl PipeStream {
        /// Connect to the Named Pipe at `path`.
        pub async fn connect(path: &str) -> Result<Self> {
            let client = ClientOptions::new().open(path)?;
            Ok(Self {
                inner: PipeInner::Client(client),
            })
        }

        /// Split into read and write halves.
        pub fn into_split(self) -> (PipeReader, PipeWriter) {
            match self.inner {
                PipeInner::Server(pipe) => {
                    let (reader, writer) = tokio::io::split(pipe);
                    (Box::new(reader) as PipeReader, Box::new(writer) as PipeWriter)
                }
                PipeInner::Client(pipe) => {
                    let (reader, writer) = tokio::io::split(pipe);
                    (Box::new(reader) as PipeReader, Box::new(writer) as PipeWriter)
                }
            }
        }
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeStream};
