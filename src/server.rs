//! Ephemeral HTTP server with upward port fallback.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::run::Closable;
use crate::{Error, Result};

/// A running server. Closing stops accepting connections and waits for
/// in-flight requests to finish.
#[derive(Debug)]
pub struct ServerHandle {
    port: u16,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<std::io::Result<()>>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Bind `preferred_port`, or the next free port above it, and serve `handler`.
///
/// The port is served on every loopback address of the host, since the page
/// is opened through `localhost`. Gives up with [`Error::ServerBindError`]
/// after `attempts` ports are in use.
pub async fn bind(preferred_port: u16, attempts: u16, handler: Router) -> Result<ServerHandle> {
    let listeners = listen(preferred_port, attempts).await?;
    let port = listeners[0].local_addr()?.port();

    let (shutdown, signal) = watch::channel(false);
    let tasks = listeners
        .into_iter()
        .map(|listener| {
            let mut signal = signal.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                axum::serve(listener, handler)
                    .with_graceful_shutdown(async move {
                        let _ = signal.wait_for(|stop| *stop).await;
                    })
                    .await
            })
        })
        .collect();

    tracing::debug!("Serving on port {}", port);
    Ok(ServerHandle { port, shutdown, tasks })
}

async fn listen(preferred_port: u16, attempts: u16) -> Result<Vec<TcpListener>> {
    let last = preferred_port.saturating_add(attempts.saturating_sub(1));
    for attempt in 0..attempts.max(1) {
        // Port 0 asks the OS for a fresh port on every attempt.
        let port = if preferred_port == 0 { 0 } else { preferred_port.saturating_add(attempt) };
        match listen_loopback(port).await {
            Ok(listeners) => return Ok(listeners),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                tracing::debug!("Port {} in use", port);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::ServerBindError { first: preferred_port, last })
}

/// Listeners on 127.0.0.1 and, when the host has IPv6, on ::1.
///
/// `localhost` may resolve to either address, so the port is free only if
/// both loopbacks are.
async fn listen_loopback(port: u16) -> std::io::Result<Vec<TcpListener>> {
    let v4 = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let port = v4.local_addr()?.port();
    match TcpListener::bind((Ipv6Addr::LOCALHOST, port)).await {
        Ok(v6) => Ok(vec![v4, v6]),
        Err(e) if e.kind() == ErrorKind::AddrInUse => Err(e),
        Err(e) => {
            tracing::debug!("No IPv6 loopback for port {}: {}", port, e);
            Ok(vec![v4])
        }
    }
}

#[async_trait]
impl Closable for ServerHandle {
    fn name(&self) -> &str {
        "http server"
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ServerHandle { shutdown, tasks, .. } = *self;
        // The server may already have stopped on its own; the task result says why.
        let _ = shutdown.send(true);
        for task in tasks {
            match task.await {
                Ok(result) => result?,
                Err(e) => {
                    return Err(Error::ResourceClose {
                        resource: "http server".to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}
