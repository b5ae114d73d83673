//! Tunnel bookkeeping — the table pairing the two halves of every active
//! tunnel.
//!
//! Every tunnel is recorded as two directional half entries (external →
//! internal and internal → external). The pair is inserted and removed as a
//! single locked operation, so a half is never observable without its peer.
//! The table also owns a cancel channel per tunnel for shutdown, and the
//! relay counters used to wait out in-flight relays when the process stops.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Address family of a tunnel, fixed at accept time: an inbound IPv4
/// connection is always paired with an IPv4 backend connection, likewise v6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    V4,
    V6,
}

impl fmt::Display for AddrFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrFamily::V4 => write!(f, "v4"),
            AddrFamily::V6 => write!(f, "v6"),
        }
    }
}

/// Which side of the tunnel a half faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfRole {
    External,
    Internal,
}

/// One directional entry: a half together with the peer it forwards to.
#[derive(Debug, Clone, Copy)]
pub struct HalfEntry {
    pub tunnel_id: u64,
    pub peer: u64,
    pub role: HalfRole,
    pub family: AddrFamily,
}

/// Handle returned on insertion; consumed by the relay task.
pub struct TunnelHandle {
    pub tunnel_id: u64,
    pub external_half: u64,
    pub internal_half: u64,
    pub cancel_rx: mpsc::Receiver<()>,
}

/// Per-tunnel bookkeeping held alongside the half entries.
struct TunnelEntry {
    cancel_tx: mpsc::Sender<()>,
    external_half: u64,
    internal_half: u64,
}

#[derive(Default)]
struct Inner {
    halves: HashMap<u64, HalfEntry>,
    tunnels: HashMap<u64, TunnelEntry>,
}

/// Table of all active tunnels, shared by the accept loops and relay tasks.
///
/// All insert/remove/lookup sequences go through one mutex, so accept-time
/// insertion and relay-time removal can never interleave on the same tunnel.
pub struct TunnelTable {
    inner: Mutex<Inner>,
    next_half_id: AtomicU64,
    /// Count of running relay tasks, decremented by [`RelayGuard`] on drop.
    active_relays: Arc<AtomicUsize>,
    tunnels_opened: AtomicU64,
    tunnels_closed: AtomicU64,
    bytes_relayed: AtomicU64,
}

impl Default for TunnelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_half_id: AtomicU64::new(1),
            active_relays: Arc::new(AtomicUsize::new(0)),
            tunnels_opened: AtomicU64::new(0),
            tunnels_closed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
        }
    }

    /// Register a new tunnel: both directional half entries and the cancel
    /// channel go in under one lock, so no partial registration is ever
    /// observable.
    pub async fn insert(&self, family: AddrFamily) -> TunnelHandle {
        let external_half = self.next_half_id.fetch_add(2, Ordering::Relaxed);
        let internal_half = external_half + 1;
        let tunnel_id = external_half;
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let mut inner = self.inner.lock().await;
        inner.halves.insert(
            external_half,
            HalfEntry {
                tunnel_id,
                peer: internal_half,
                role: HalfRole::External,
                family,
            },
        );
        inner.halves.insert(
            internal_half,
            HalfEntry {
                tunnel_id,
                peer: external_half,
                role: HalfRole::Internal,
                family,
            },
        );
        inner.tunnels.insert(
            tunnel_id,
            TunnelEntry {
                cancel_tx,
                external_half,
                internal_half,
            },
        );
        drop(inner);

        self.tunnels_opened.fetch_add(1, Ordering::Relaxed);
        TunnelHandle {
            tunnel_id,
            external_half,
            internal_half,
            cancel_rx,
        }
    }

    /// Remove a tunnel: both half entries and the cancel channel leave in one
    /// locked step. Returns `false` when the tunnel was already gone (a relay
    /// teardown racing `close_all`).
    pub async fn remove(&self, tunnel_id: u64) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.tunnels.remove(&tunnel_id) else {
            return false;
        };
        inner.halves.remove(&entry.external_half);
        inner.halves.remove(&entry.internal_half);
        drop(inner);

        self.tunnels_closed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Number of registered tunnels.
    pub async fn tunnel_count(&self) -> usize {
        self.inner.lock().await.tunnels.len()
    }

    /// Cancel every relay and clear the table. Called once at shutdown.
    pub async fn close_all(&self) {
        let mut inner = self.inner.lock().await;
        let count = inner.tunnels.len() as u64;
        for (tunnel_id, entry) in inner.tunnels.drain() {
            // a full channel just means the relay is already stopping
            let _ = entry.cancel_tx.try_send(());
            debug!(tunnel_id, "tunnel cancelled");
        }
        inner.halves.clear();
        drop(inner);

        self.tunnels_closed.fetch_add(count, Ordering::Relaxed);
    }

    /// Count a running relay task. The returned guard decrements on drop, so
    /// shutdown can wait for in-flight relays to release their sockets.
    pub fn acquire_relay(&self) -> RelayGuard {
        self.active_relays.fetch_add(1, Ordering::Relaxed);
        RelayGuard {
            counter: self.active_relays.clone(),
        }
    }

    pub fn active_relays(&self) -> usize {
        self.active_relays.load(Ordering::Relaxed)
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_relayed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }

    pub fn tunnels_opened(&self) -> u64 {
        self.tunnels_opened.load(Ordering::Relaxed)
    }

    pub fn tunnels_closed(&self) -> u64 {
        self.tunnels_closed.load(Ordering::Relaxed)
    }
}

/// RAII guard that decrements the relay count on drop. Owns an
/// `Arc<AtomicUsize>` so it is `Send` and can be moved into spawned tasks.
pub struct RelayGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_pairs_both_halves() {
        let table = TunnelTable::new();
        let handle = table.insert(AddrFamily::V4).await;

        assert_eq!(table.tunnel_count().await, 1);
        let inner = table.inner.lock().await;
        assert_eq!(inner.halves.len(), 2);
        let external = &inner.halves[&handle.external_half];
        assert_eq!(external.peer, handle.internal_half);
        assert_eq!(external.role, HalfRole::External);
        let internal = &inner.halves[&handle.internal_half];
        assert_eq!(internal.peer, handle.external_half);
        assert_eq!(internal.role, HalfRole::Internal);
        drop(inner);
        assert_eq!(table.tunnels_opened(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_atomic() {
        let table = TunnelTable::new();
        let handle = table.insert(AddrFamily::V6).await;

        assert!(table.remove(handle.tunnel_id).await);
        // no half survives its peer's removal
        let inner = table.inner.lock().await;
        assert!(!inner.halves.contains_key(&handle.external_half));
        assert!(!inner.halves.contains_key(&handle.internal_half));
        assert!(inner.halves.is_empty());
        drop(inner);
        assert_eq!(table.tunnels_closed(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let table = TunnelTable::new();
        let handle = table.insert(AddrFamily::V4).await;
        assert!(table.remove(handle.tunnel_id).await);
        assert!(!table.remove(handle.tunnel_id).await);
        assert_eq!(table.tunnels_closed(), 1);
    }

    #[tokio::test]
    async fn test_remove_leaves_other_tunnels_alone() {
        let table = TunnelTable::new();
        let a = table.insert(AddrFamily::V4).await;
        let b = table.insert(AddrFamily::V4).await;

        assert!(table.remove(a.tunnel_id).await);
        assert_eq!(table.tunnel_count().await, 1);
        let inner = table.inner.lock().await;
        assert_eq!(inner.halves[&b.external_half].peer, b.internal_half);
    }

    #[tokio::test]
    async fn test_close_all_empties_and_cancels() {
        let table = TunnelTable::new();
        let mut a = table.insert(AddrFamily::V4).await;
        let mut b = table.insert(AddrFamily::V6).await;

        table.close_all().await;
        assert_eq!(table.tunnel_count().await, 0);
        assert!(table.inner.lock().await.halves.is_empty());
        assert_eq!(table.tunnels_closed(), 2);
        // both relays got their cancel signal
        assert!(a.cancel_rx.recv().await.is_some());
        assert!(b.cancel_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_relay_guard_counts() {
        let table = TunnelTable::new();
        {
            let _g1 = table.acquire_relay();
            let _g2 = table.acquire_relay();
            assert_eq!(table.active_relays(), 2);
        }
        assert_eq!(table.active_relays(), 0);
    }
}
