use thiserror::Error;

/// Errors produced by the portgate core and server.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("config error: {0}")]
    Config(String),

    #[error("map file too short: expected at least 5 lines, found {0}")]
    MapTooShort(usize),

    #[error("line {line}: invalid {family} address: {value}")]
    InvalidAddress {
        line: usize,
        family: &'static str,
        value: String,
    },

    #[error("line {line}: invalid port mapping: {value}")]
    InvalidMapping { line: usize, value: String },

    #[error("port out of range: {0} (must be 1-65535)")]
    PortOutOfRange(u32),

    #[error("duplicate external port: {0}")]
    DuplicatePort(u16),

    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ForwardResult<T> = Result<T, ForwardError>;
