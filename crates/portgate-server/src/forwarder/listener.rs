//! Listening socket setup and the accept loop.
//!
//! One IPv4 and one IPv6 listener per port mapping, bound at startup with
//! address reuse and a large backlog. A bind failure is fatal: a
//! half-configured forwarder is worse than none. Each bound listener gets its
//! own accept-loop task that pairs inbound connections with backend
//! connections and registers the pair in the [`TunnelTable`].

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use portgate_core::{ForwardConfig, ForwardError, ForwardResult};

use super::relay;
use super::tunnel::{AddrFamily, TunnelTable};

/// One listening socket: family, external port, and the tokio listener.
pub struct BoundListener {
    pub listener: TcpListener,
    pub family: AddrFamily,
    pub port: u16,
}

/// Bind one IPv4 and one IPv6 listener for every entry in the port map.
///
/// Fails on the first bind error; the caller treats that as fatal to
/// startup.
pub fn bind_all(config: &ForwardConfig, backlog: i32) -> ForwardResult<Vec<BoundListener>> {
    let mut listeners = Vec::with_capacity(config.port_map.len() * 2);
    for binding in config.port_map.bindings() {
        let v4 = SocketAddr::new(IpAddr::V4(config.external_v4), binding.external);
        listeners.push(bind_listener(v4, AddrFamily::V4, backlog)?);
        let v6 = SocketAddr::new(IpAddr::V6(config.external_v6), binding.external);
        listeners.push(bind_listener(v6, AddrFamily::V6, backlog)?);
        info!(
            external = binding.external,
            internal = binding.internal,
            "listening on external port"
        );
    }
    Ok(listeners)
}

/// Create a non-blocking listener with address reuse and an explicit
/// backlog.
fn bind_listener(addr: SocketAddr, family: AddrFamily, backlog: i32) -> ForwardResult<BoundListener> {
    let bind_err = |e: std::io::Error| ForwardError::Bind {
        addr: addr.to_string(),
        source: e,
    };

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    if addr.is_ipv6() {
        // keep the v6 socket off the v4 port space so both binds coexist
        socket.set_only_v6(true).map_err(bind_err)?;
    }
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    let listener = TcpListener::from_std(socket.into()).map_err(bind_err)?;
    Ok(BoundListener {
        listener,
        family,
        port: addr.port(),
    })
}

/// Accept inbound connections on one listener until shutdown.
///
/// Backend failures are per-connection: the inbound socket is dropped and
/// the loop keeps accepting. Dropping the listener on exit closes it.
pub async fn accept_loop(
    bound: BoundListener,
    config: Arc<ForwardConfig>,
    table: Arc<TunnelTable>,
    connect_timeout: Duration,
    buffer_size: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(port = bound.port, family = %bound.family, "accept loop stopped");
                break;
            }
            result = bound.listener.accept() => {
                match result {
                    Ok((inbound, peer_addr)) => {
                        handle_inbound(
                            inbound,
                            peer_addr,
                            &bound,
                            &config,
                            &table,
                            connect_timeout,
                            buffer_size,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(port = bound.port, error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

/// Pair one accepted connection with a backend connection and hand the pair
/// to a relay task.
async fn handle_inbound(
    inbound: TcpStream,
    peer_addr: SocketAddr,
    bound: &BoundListener,
    config: &ForwardConfig,
    table: &Arc<TunnelTable>,
    connect_timeout: Duration,
    buffer_size: usize,
) {
    // the local (listening) port is the lookup key, never the remote port
    let local_port = match inbound.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            warn!(port = bound.port, error = %e, "no local address on inbound connection");
            return;
        }
    };
    let Some(internal_port) = config.port_map.internal_port(local_port) else {
        warn!(port = local_port, "no mapping for inbound local port");
        return;
    };

    let backend = match bound.family {
        AddrFamily::V4 => SocketAddr::new(IpAddr::V4(config.internal_v4), internal_port),
        AddrFamily::V6 => SocketAddr::new(IpAddr::V6(config.internal_v6), internal_port),
    };

    let outbound = match tokio::time::timeout(connect_timeout, TcpStream::connect(backend)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(peer = %peer_addr, backend = %backend, error = %e, "backend connect failed");
            return;
        }
        Err(_) => {
            warn!(peer = %peer_addr, backend = %backend, "backend connect timed out");
            return;
        }
    };

    let handle = table.insert(bound.family).await;
    info!(
        tunnel_id = handle.tunnel_id,
        peer = %peer_addr,
        external = local_port,
        backend = %backend,
        "connection established"
    );

    // the guard keeps the relay counted until its task ends
    let guard = table.acquire_relay();
    tokio::spawn(relay::run(
        handle.tunnel_id,
        inbound,
        outbound,
        handle.cancel_rx,
        table.clone(),
        buffer_size,
        guard,
    ));
}
