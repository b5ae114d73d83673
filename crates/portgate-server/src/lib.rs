//! portgate-server: transparent TCP port-forwarding daemon.
//!
//! Listens on configured external ports (IPv4 and IPv6), pairs every inbound
//! connection with an outbound connection to the internal backend selected by
//! the static port map, and relays bytes bidirectionally until either side
//! closes. Payload bytes are opaque except for the literal `"quit\n"` close
//! sentinel.
//!
//! The library target exists so integration tests can drive the forwarder
//! in-process; the shipped artifact is the `portgate` binary.

pub mod config;
pub mod forwarder;
pub mod server;

pub use config::ServerConfig;
pub use server::{Forwarder, ShutdownHandle};
