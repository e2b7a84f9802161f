use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    /// Packet cannot be classified by the tracker (untracked protocol, truncated, ...)
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("conntrack table full ({limit} entries)")]
    CapacityExceeded { limit: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
