//! Per-tunnel byte relay.
//!
//! Reads whichever half is ready and writes the bytes verbatim to the peer
//! half. EOF, the `"quit\n"` sentinel, a read error (reset-by-peer included),
//! or a write failure all tear the tunnel down: both table entries and both
//! sockets, as one operation.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::tunnel::{RelayGuard, TunnelTable};

/// Payload honored as an explicit close request, identical to EOF. The
/// forwarder is otherwise payload-transparent.
pub const CLOSE_SENTINEL: &[u8] = b"quit\n";

/// Relay bytes between the two halves of one tunnel until either side
/// closes, then tear the tunnel down.
///
/// Runs as its own task. `_guard` keeps the tunnel counted as in-flight so
/// shutdown can wait for the sockets to be released.
pub async fn run(
    tunnel_id: u64,
    external: TcpStream,
    internal: TcpStream,
    mut cancel_rx: mpsc::Receiver<()>,
    table: Arc<TunnelTable>,
    buffer_size: usize,
    _guard: RelayGuard,
) {
    let (mut ext_read, mut ext_write) = external.into_split();
    let (mut int_read, mut int_write) = internal.into_split();
    let mut ext_buf = vec![0u8; buffer_size];
    let mut int_buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            _ = cancel_rx.recv() => {
                debug!(tunnel_id, "relay cancelled");
                break;
            }
            result = ext_read.read(&mut ext_buf) => {
                match result {
                    Ok(0) => {
                        debug!(tunnel_id, "external half closed");
                        break;
                    }
                    Ok(n) if &ext_buf[..n] == CLOSE_SENTINEL => {
                        debug!(tunnel_id, "close sentinel from external half");
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = int_write.write_all(&ext_buf[..n]).await {
                            warn!(tunnel_id, error = %e, "write to internal half failed");
                            break;
                        }
                        table.add_bytes(n as u64);
                    }
                    // reset-by-peer lands here; treated the same as close
                    Err(e) => {
                        debug!(tunnel_id, error = %e, "external half read failed");
                        break;
                    }
                }
            }
            result = int_read.read(&mut int_buf) => {
                match result {
                    Ok(0) => {
                        debug!(tunnel_id, "internal half closed");
                        break;
                    }
                    Ok(n) if &int_buf[..n] == CLOSE_SENTINEL => {
                        debug!(tunnel_id, "close sentinel from internal half");
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = ext_write.write_all(&int_buf[..n]).await {
                            warn!(tunnel_id, error = %e, "write to external half failed");
                            break;
                        }
                        table.add_bytes(n as u64);
                    }
                    Err(e) => {
                        debug!(tunnel_id, error = %e, "internal half read failed");
                        break;
                    }
                }
            }
        }
    }

    // Both directional entries leave the table as one locked step; the
    // sockets close when the halves drop at the end of this task.
    if table.remove(tunnel_id).await {
        info!(tunnel_id, "connection closed");
    }
    let _ = ext_write.shutdown().await;
    let _ = int_write.shutdown().await;
}
