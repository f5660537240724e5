//! Client RPC engine.
//!
//! [`RpcClient`] composes the session allocator, the pending-call dispatcher,
//! the frame encoder and a dedicated writer task into a call/await API over
//! any ordered byte-stream transport.
//!
//! Many tasks may issue calls concurrently over one connection; a single read
//! loop delivers responses and correlates them by session id, so responses may
//! resolve in any order relative to the requests.
//!
//! # Example
//!
//! ```ignore
//! use wirecall::client::RpcClient;
//!
//! let stream = wirecall::transport::connect("127.0.0.1:7788").await?;
//! let (reader, writer) = stream.into_split();
//! let client = RpcClient::start(reader, writer);
//!
//! let reply = client.call(0x0CAFE000, b"ping").await?;
//! ```

mod dispatcher;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::compression::Compression;
use crate::error::{Result, RpcError};
use crate::protocol::{encode_frame, FrameBuffer, DEFAULT_MAX_BODY_SIZE};
use crate::session::SessionAllocator;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};
use dispatcher::Dispatcher;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Body transform for the request. The response mirrors it.
    pub compression: Compression,
    /// Caller-side deadline. On expiry the call fails locally with
    /// [`RpcError::Timeout`] and its session id is released; a late response
    /// is dropped by the dispatcher.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options with a specific compression and no timeout.
    pub fn compressed(compression: Compression) -> Self {
        Self {
            compression,
            timeout: None,
        }
    }

    /// Set the caller-side deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Client engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Writer task tuning.
    pub writer: WriterConfig,
    /// Largest response body tolerated before the stream is declared corrupt.
    pub max_body_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// A client RPC engine bound to one connection.
pub struct RpcClient {
    sessions: Arc<SessionAllocator>,
    dispatcher: Arc<Dispatcher>,
    writer: WriterHandle,
    shutdown_rx: oneshot::Receiver<()>,
    _read_task: JoinHandle<()>,
    _writer_task: JoinHandle<Result<()>>,
}

impl RpcClient {
    /// Start the engine over a transport's read and write halves.
    pub fn start<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start_with_config(reader, writer, ClientConfig::default())
    }

    /// Start the engine with explicit configuration.
    pub fn start_with_config<R, W>(reader: R, writer: W, config: ClientConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let sessions = Arc::new(SessionAllocator::new());
        let dispatcher = Arc::new(Dispatcher::new(sessions.clone()));

        let (writer_handle, writer_task) = spawn_writer_task(writer, config.writer);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let read_dispatcher = dispatcher.clone();
        let max_body_size = config.max_body_size;
        let read_task = tokio::spawn(async move {
            if let Err(e) = Self::read_loop(reader, &read_dispatcher, max_body_size).await {
                tracing::error!(error = %e, "client read loop failed");
            }
            // EOF, I/O failure or corrupt stream: every pending call gets a
            // connection-closed error exactly once.
            read_dispatcher.close_all();
            let _ = shutdown_tx.send(());
        });

        Self {
            sessions,
            dispatcher,
            writer: writer_handle,
            shutdown_rx,
            _read_task: read_task,
            _writer_task: writer_task,
        }
    }

    /// Issue a call with default options and await its response body.
    pub async fn call(&self, method_meta: u32, body: &[u8]) -> Result<Bytes> {
        self.call_with(method_meta, body, CallOptions::default())
            .await
    }

    /// Issue a call and await its response body.
    ///
    /// Exactly one resolution occurs per call: the response body, a checksum
    /// error, a remote error, a timeout, or connection-closed.
    pub async fn call_with(
        &self,
        method_meta: u32,
        body: &[u8],
        options: CallOptions,
    ) -> Result<Bytes> {
        let session = self.sessions.next()?;
        let (slot, response) = oneshot::channel();

        // Slot must exist before any byte hits the wire. Fails fast once the
        // connection is down, instead of parking a slot nothing resolves.
        if let Err(e) = self.dispatcher.register(session, slot) {
            self.sessions.release(session);
            return Err(e);
        }

        let frame = match encode_frame(session, method_meta, options.compression, 0, body) {
            Ok(frame) => frame,
            Err(e) => {
                self.dispatcher.forget(session);
                return Err(e);
            }
        };

        tracing::debug!(session, method_meta, "sending call");
        if let Err(e) = self.writer.send(frame).await {
            self.dispatcher.forget(session);
            return Err(e);
        }

        let resolved = match options.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, response).await {
                Ok(resolved) => resolved,
                Err(_) => {
                    // Resolve our own slot locally; a late response for this
                    // session will find no slot and be dropped.
                    self.dispatcher.forget(session);
                    return Err(RpcError::Timeout);
                }
            },
            None => response.await,
        };

        resolved.map_err(|_| RpcError::ConnectionClosed)?
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Whether the writer queue is at capacity.
    pub fn is_backpressure_active(&self) -> bool {
        self.writer.is_backpressure_active()
    }

    /// Block until the connection closes.
    pub async fn wait_for_shutdown(self) {
        let _ = self.shutdown_rx.await;
    }

    /// Read loop: reassemble frames and hand them to the dispatcher.
    async fn read_loop<R>(
        mut reader: R,
        dispatcher: &Dispatcher,
        max_body_size: u32,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::with_max_body_size(max_body_size);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(RpcError::Io(e)),
            };

            for decoded in frame_buffer.push(&buf[..n])? {
                dispatcher.on_frame(decoded);
            }
        }
    }
}
