use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid interface name: {0:?}. Must be 1-15 characters")]
    InvalidInterface(String),

    #[error("eBPF program '{0}' not found in object file")]
    ProgramNotFound(String),

    #[error("eBPF map '{0}' not found in object file")]
    MapNotFound(String),

    #[error("Invalid frame on line {line}: {reason}")]
    InvalidFrame { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GuardError>;
