//! Core forwarder: owns the tunnel table and the shutdown channel, binds the
//! listeners, and coordinates teardown.
//!
//! The accept loops and relay tasks share state only through the
//! [`TunnelTable`]; shutdown fans out through a broadcast channel and the
//! per-tunnel cancel channels, then waits (bounded) for the relay count to
//! reach zero so no socket survives `run` returning.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use portgate_core::{ForwardConfig, ForwardResult};

use crate::config::ServerConfig;
use crate::forwarder::{listener, TunnelTable};

/// How long shutdown waits for cancelled relays to release their sockets.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Triggers forwarder shutdown; cloneable and safe to fire from a signal
/// task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn signal(&self) {
        let _ = self.tx.send(());
    }
}

/// The port forwarder instance.
pub struct Forwarder {
    config: ServerConfig,
    forward: Arc<ForwardConfig>,
    table: Arc<TunnelTable>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Forwarder {
    /// Create a new forwarder instance.
    pub fn new(config: ServerConfig, forward: ForwardConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            forward: Arc::new(forward),
            table: Arc::new(TunnelTable::new()),
            shutdown_tx: broadcast::channel(1).0,
        })
    }

    /// Handle for signalling shutdown from outside [`Forwarder::run`].
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Number of registered tunnels (both halves count as one).
    pub async fn active_tunnels(&self) -> usize {
        self.table.tunnel_count().await
    }

    /// Total bytes relayed across all tunnels since startup.
    pub fn bytes_relayed(&self) -> u64 {
        self.table.bytes_relayed()
    }

    /// Bind every listener, run the accept loops, and on shutdown tear down
    /// all listeners and tunnels before returning.
    pub async fn run(self: Arc<Self>) -> ForwardResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            external_v4 = %self.forward.external_v4,
            external_v6 = %self.forward.external_v6,
            internal_v4 = %self.forward.internal_v4,
            internal_v6 = %self.forward.internal_v6,
            mappings = self.forward.port_map.len(),
            "starting forwarder"
        );

        // fail-fast: a half-configured forwarder is worse than none
        let listeners = listener::bind_all(&self.forward, self.config.backlog)?;

        let mut accept_tasks = Vec::with_capacity(listeners.len());
        for bound in listeners {
            accept_tasks.push(tokio::spawn(listener::accept_loop(
                bound,
                self.forward.clone(),
                self.table.clone(),
                self.config.connect_timeout,
                self.config.buffer_size,
                self.shutdown_tx.subscribe(),
            )));
        }

        // park until shutdown is signalled
        let _ = shutdown_rx.recv().await;
        info!("shutting down forwarder");

        // the accept loops received the same broadcast; joining them closes
        // the listening sockets
        for task in accept_tasks {
            let _ = task.await;
        }

        self.table.close_all().await;
        self.drain_relays().await;

        info!(
            opened = self.table.tunnels_opened(),
            closed = self.table.tunnels_closed(),
            bytes = self.table.bytes_relayed(),
            "forwarder stopped"
        );
        Ok(())
    }

    /// Wait (bounded) for cancelled relay tasks to drop their sockets.
    async fn drain_relays(&self) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while self.table.active_relays() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.table.active_relays(),
                    "relays still draining at shutdown deadline"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }
}
