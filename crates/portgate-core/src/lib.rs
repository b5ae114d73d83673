//! portgate-core: Shared library for the portgate port forwarder.
//!
//! Provides the static port map, the line-oriented forwarder map file
//! parser/validator, and the common error enum.

pub mod config;
pub mod error;
pub mod portmap;

// Re-export commonly used items at crate root.
pub use config::ForwardConfig;
pub use error::{ForwardError, ForwardResult};
pub use portmap::{PortBinding, PortMap};
