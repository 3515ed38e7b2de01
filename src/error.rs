use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Process-level failures: binding, polling, pool construction.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("event loop I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker thread count must be at least 1")]
    InvalidThreadCount,
    #[error("task queue bound must be at least 1")]
    InvalidQueueBound,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Transport failures while draining a socket into the read buffer.
/// The connection is closed without a response.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("request exceeds the read buffer")]
    BufferFull,
    #[error("receive failed: {0}")]
    Io(#[from] io::Error),
}

/// Why a request target could not be served.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no such file")]
    NotFound,
    #[error("file is not world-readable or not a regular file")]
    Forbidden,
    #[error("target is a directory")]
    IsDirectory,
    #[error("target escapes the server root")]
    Traversal,
    #[error("failed to map file: {0}")]
    Io(#[source] io::Error),
}

/// The header block did not fit in the write buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("response does not fit in the write buffer")]
pub struct ResponseOverflow;
