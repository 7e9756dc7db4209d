use ndnfw_tables::TableError;
use thiserror::Error;

/// Errors raised while assembling or managing the forwarder.
#[derive(Error, Debug)]
pub enum FwdError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("packet error: {0}")]
    Packet(#[from] ndnfw_core::Error),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("unknown face {0}")]
    UnknownFace(u16),

    #[error("{what} {value} out of range (limit {limit})")]
    OutOfRange { what: &'static str, value: usize, limit: usize },

    #[error("forwarder already launched")]
    AlreadyLaunched,

    #[error("failed to start {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FwdError>;
