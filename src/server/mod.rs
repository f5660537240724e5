//! Server RPC engine.
//!
//! [`RpcServer`] composes the frame buffer, the [`Router`] and the frame
//! encoder into a request/response loop: reassemble a request frame, resolve
//! its handler by method meta, run the handler, frame the result under the
//! original session id and write it back.
//!
//! Every request gets exactly one response. Unknown methods, corrupt request
//! bodies, handler errors and handler panics all come back to the caller as
//! explicit error frames; none of them tears down the connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wirecall::server::{Router, RpcServer, ServiceRegistration};
//!
//! let router = Arc::new(Router::new());
//! router.register(Arc::new(
//!     ServiceRegistration::new(0x0CAFE000, "ping")
//!         .method(0x0CAFE000, |_| Ok(b"pong".to_vec())),
//! ));
//!
//! let listener = wirecall::transport::listen("127.0.0.1:7788").await?;
//! RpcServer::new(router).serve(listener).await?;
//! ```

mod router;

pub use router::{MethodHandler, Router, RpcService, ServiceRegistration};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::compression::{decompress, Compression};
use crate::error::{Result, RpcError};
use crate::protocol::{encode_frame, flags, DecodedFrame, Frame, FrameBuffer, DEFAULT_MAX_BODY_SIZE};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default bound on concurrently running handlers per connection.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Server engine configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Writer task tuning.
    pub writer: WriterConfig,
    /// Largest request body tolerated before the stream is declared corrupt.
    pub max_body_size: u32,
    /// Bound on concurrently running handlers per connection. Further
    /// requests wait; they are never dropped.
    pub max_concurrent_handlers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}

/// A server RPC engine around one routing table.
#[derive(Clone)]
pub struct RpcServer {
    router: Arc<Router>,
    config: ServerConfig,
}

impl RpcServer {
    /// Create a server over a routing table with default configuration.
    pub fn new(router: Arc<Router>) -> Self {
        Self::with_config(router, ServerConfig::default())
    }

    /// Create a server with explicit configuration.
    pub fn with_config(router: Arc<Router>, config: ServerConfig) -> Self {
        Self { router, config }
    }

    /// The routing table this server dispatches against.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Accept connections forever, serving each on its own task.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "accepted connection");
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!(%peer, error = %e, "failed to set TCP_NODELAY");
            }

            let server = self.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(e) = server.serve_connection(reader, writer).await {
                    tracing::warn!(%peer, error = %e, "connection ended with error");
                }
            });
        }
    }

    /// Run the request/response loop for one connection to completion.
    pub async fn serve_connection<R, W>(&self, mut reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_handle, _writer_task) = spawn_writer_task(writer, self.config.writer.clone());
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_handlers));

        let mut frame_buffer = FrameBuffer::with_max_body_size(self.config.max_body_size);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(RpcError::Io(e)),
            };

            for decoded in frame_buffer.push(&buf[..n])? {
                self.dispatch(decoded, &writer_handle, &semaphore).await?;
            }
        }
    }

    /// Route one decoded request frame.
    async fn dispatch(
        &self,
        decoded: DecodedFrame,
        writer: &WriterHandle,
        semaphore: &Arc<Semaphore>,
    ) -> Result<()> {
        let frame = match decoded {
            DecodedFrame::Valid(frame) => frame,
            DecodedFrame::ChecksumMismatch {
                header,
                expected,
                actual,
            } => {
                tracing::warn!(
                    session = header.session,
                    expected,
                    actual,
                    "request body failed checksum"
                );
                let reply = error_frame(
                    header.session,
                    header.method_meta,
                    &format!(
                        "checksum mismatch: expected {:#010x}, computed {:#010x}",
                        expected, actual
                    ),
                );
                return writer.send(reply).await;
            }
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("handler semaphore closed");

        let router = self.router.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let reply = handle_request(&router, &frame);
            if let Err(e) = writer.send(reply).await {
                tracing::warn!(session = frame.session(), error = %e, "failed to write response");
            }
        });

        Ok(())
    }
}

/// Produce the response frame for one request, errors included.
fn handle_request(router: &Router, frame: &Frame) -> crate::protocol::EncodedFrame {
    let session = frame.session();
    let method_meta = frame.method_meta();

    let compression = match Compression::from_wire(frame.header.compression) {
        Ok(compression) => compression,
        Err(e) => {
            return error_frame(session, method_meta, &e.to_string());
        }
    };

    let body = match decompress(compression, &frame.body) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(session, error = %e, "failed to decompress request body");
            return error_frame(session, method_meta, &e.to_string());
        }
    };

    let Some(handler) = router.resolve(method_meta) else {
        tracing::warn!(session, method_meta, "no handler for method");
        return error_frame(
            session,
            method_meta,
            &format!("unknown method: {:#010x}", method_meta),
        );
    };

    // A panicking handler must become an error response, never a torn
    // connection.
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&body)));

    let response_body = match outcome {
        Ok(Ok(response_body)) => response_body,
        Ok(Err(e)) => {
            tracing::warn!(session, method_meta, error = %e, "handler returned error");
            return error_frame(session, method_meta, &e.to_string());
        }
        Err(_) => {
            tracing::error!(session, method_meta, "handler panicked");
            return error_frame(session, method_meta, "handler panicked");
        }
    };

    // The response mirrors the request's compression.
    match encode_frame(session, method_meta, compression, 0, &response_body) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!(session, error = %e, "failed to encode response");
            error_frame(session, method_meta, &e.to_string())
        }
    }
}

/// Frame an error message under the request's session and method ids.
fn error_frame(session: u16, method_meta: u32, message: &str) -> crate::protocol::EncodedFrame {
    encode_frame(
        session,
        method_meta,
        Compression::None,
        flags::ERROR,
        message.as_bytes(),
    )
    .expect("identity-compressed frame cannot fail to encode")
}
