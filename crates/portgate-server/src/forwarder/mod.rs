//! Forwarder module — listener setup, tunnel bookkeeping, and byte relay.
//!
//! # Submodule Architecture
//!
//! The forwarder is composed of three cooperating submodules:
//!
//! - **[`listener`]** — binds one IPv4 and one IPv6 listening socket per port
//!   mapping (address reuse, large backlog, non-blocking) and runs the accept
//!   loop that pairs each inbound connection with a backend connection.
//!
//! - **[`tunnel`]** — the [`TunnelTable`]: both directional half entries of
//!   every active tunnel, inserted and removed together under one lock, plus
//!   a per-tunnel cancel channel and the relay counters shutdown waits on.
//!
//! - **[`relay`]** — the per-tunnel relay task: reads whichever half is
//!   ready, forwards the bytes verbatim to the peer half, and tears the
//!   tunnel down on EOF, the `"quit\n"` sentinel, reset-by-peer, or a write
//!   failure.
//!
//! # Data Flow
//!
//! ```text
//! accept loop (listener.rs)
//!   → port map lookup, keyed by the inbound connection's local port
//!   → backend connect (family-matched, bounded by the connect timeout)
//!   → TunnelTable::insert — both directional entries, one locked step
//!   → spawn relay task (relay.rs)
//!       → teardown: TunnelTable::remove — both entries, one locked step
//! ```

pub mod listener;
pub mod relay;
pub mod tunnel;

pub use listener::{bind_all, BoundListener};
pub use tunnel::{AddrFamily, TunnelTable};
