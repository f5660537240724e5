//! TCP transport helpers.
//!
//! The engines are generic over any `AsyncRead`/`AsyncWrite` pair; these
//! helpers only cover the common TCP case. TCP_NODELAY is set on both ends:
//! small request/response frames should not sit in Nagle's buffer.

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::Result;

/// Connect to a server, ready for [`crate::client::RpcClient::start`].
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Bind a listener, ready for [`crate::server::RpcServer::serve`].
pub async fn listen<A: ToSocketAddrs>(addr: A) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}
