use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("match controller is no longer running")]
    ServerClosed,
}

pub type ServerResult<T> = Result<T, ServerError>;
