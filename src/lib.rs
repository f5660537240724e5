//! # wirecall
//!
//! A session-correlated binary RPC protocol engine over ordered byte-stream
//! transports.
//!
//! Every frame is a fixed 16-byte little-endian header followed by an opaque
//! body. The header names the body's compression, its exact transmitted
//! length, the low 32 bits of an xxHash-64 over the transmitted bytes, the
//! session id correlating a request with its response, and the method meta
//! selecting a handler on the server.
//!
//! ## Architecture
//!
//! - [`protocol`]: header codec, frame encoder, stream reassembly
//! - [`checksum`] / [`compression`]: body integrity and transforms
//! - [`session`]: per-connection 16-bit session id allocation
//! - [`client`]: call/await engine with a pending-call dispatch table
//! - [`server`]: request/response engine over a method routing table
//! - [`transport`]: thin TCP helpers; the engines accept any
//!   `AsyncRead`/`AsyncWrite` pair
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wirecall::server::{Router, RpcServer, ServiceRegistration};
//! use wirecall::RpcClient;
//!
//! let router = Arc::new(Router::new());
//! router.register(Arc::new(
//!     ServiceRegistration::new(0x0CAFE000, "ping")
//!         .method(0x0CAFE000, |_| Ok(b"pong".to_vec())),
//! ));
//!
//! let listener = wirecall::transport::listen("127.0.0.1:7788").await?;
//! tokio::spawn(async move { RpcServer::new(router).serve(listener).await });
//!
//! let stream = wirecall::transport::connect("127.0.0.1:7788").await?;
//! let (reader, writer) = stream.into_split();
//! let client = RpcClient::start(reader, writer);
//! let reply = client.call(0x0CAFE000, b"ping").await?;
//! assert_eq!(&reply[..], b"pong");
//! ```

pub mod checksum;
pub mod client;
pub mod compression;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

mod writer;

pub use client::{CallOptions, ClientConfig, RpcClient};
pub use compression::Compression;
pub use error::{Result, RpcError};
pub use server::{Router, RpcServer, ServerConfig, ServiceRegistration};
pub use session::SessionAllocator;
pub use writer::{WriterConfig, WriterHandle};
