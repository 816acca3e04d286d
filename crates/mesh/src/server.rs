//! TCP accept loop shared by the platform gateway and the domain listener.
//!
//! One task per accepted connection. The loop `select!`s between `accept` and
//! a shutdown watch channel, so a stop request is seen between accepts.

use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::MeshResult;

/// Handle on a running accept loop
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receiver that flips to `true` once [`ServerHandle::stop`] is called.
    ///
    /// Background jobs tied to this server watch it to stop alongside.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stop accepting and wait for the loop to exit.
    ///
    /// Connections already accepted run to completion on their own tasks.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Accept loop panicked");
        }
    }
}

/// Bind `addr` and spawn an accept loop calling `handler` per connection
pub async fn spawn_server<H, Fut>(addr: &str, name: &'static str, handler: H) -> MeshResult<ServerHandle>
where
    H: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MeshResult<()>> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve(listener, name, handler)
}

/// Spawn an accept loop on an already bound listener
pub fn serve<H, Fut>(listener: TcpListener, name: &'static str, handler: H) -> MeshResult<ServerHandle>
where
    H: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MeshResult<()>> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    let (shutdown, rx) = watch::channel(false);
    info!(server = name, addr = %local_addr, "Listening");

    let task = tokio::spawn(accept_loop(listener, rx, name, handler));
    Ok(ServerHandle {
        local_addr,
        shutdown,
        task,
    })
}

async fn accept_loop<H, Fut>(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    name: &'static str,
    handler: H,
) where
    H: Fn(TcpStream, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MeshResult<()>> + Send + 'static,
{
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(server = name, peer = %peer, "Connection accepted");
                    let connection = handler(stream, peer);
                    tokio::spawn(async move {
                        match connection.await {
                            Ok(()) => {}
                            Err(e) if e.is_transport() => {
                                debug!(server = name, peer = %peer, error = %e, "Connection dropped")
                            }
                            Err(e) => warn!(server = name, peer = %peer, error = %e, "Request failed"),
                        }
                    });
                }
                Err(e) => error!(server = name, error = %e, "Failed to accept connection"),
            }
        }
    }
    info!(server = name, "Accept loop stopped");
}
