//! TCP listener and connector for the control link.
//!
//! # Example
//!
//! ```ignore
//! use danmaku_relay::transport::{connect, ControlListener};
//!
//! let listener = ControlListener::bind("127.0.0.1:0").await?;
//! let addr = listener.local_addr()?;
//! let client = connect(addr).await?;
//! let (server, peer) = listener.accept().await?;
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::{RelayError, Result};

/// Supervisor-side listener for worker connections.
#[derive(Debug)]
pub struct ControlListener {
    listener: TcpListener,
}

impl ControlListener {
    /// Bind the listener.
    ///
    /// A bind failure is a startup failure and surfaces as
    /// [`RelayError::ResourceInit`].
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::ResourceInit(format!("control listener bind: {e}")))?;
        Ok(Self { listener })
    }

    /// Accept one worker connection.
    ///
    /// Cancel safe, so it can sit in a `select!` loop.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        configure(&stream);
        Ok((stream, peer))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Open a control link to the supervisor.
pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    configure(&stream);
    Ok(stream)
}

fn configure(stream: &TcpStream) {
    // Control frames are small and latency matters more than packing.
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }
}
