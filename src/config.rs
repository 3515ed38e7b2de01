use mio::Token;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub const SERVER_TOKEN: Token = Token(0);
pub const WAKER_TOKEN: Token = Token(1);
pub const FIRST_CONN_TOKEN: usize = 2;

pub const READ_BUF_SIZE: usize = 2048;
pub const WRITE_BUF_SIZE: usize = 1024;
/// Upper bound on `root + target`, terminator included.
pub const REAL_PATH_CAPACITY: usize = 200;

pub const LISTEN_BACKLOG: i32 = 5;
pub const MAX_EVENTS: usize = 10_000;
pub const MAX_CONNS: usize = 65536;
pub const DEFAULT_PREALLOC_CONNS: usize = 64;

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_MAX_QUEUED: usize = 10_000;
pub const DEFAULT_ROOT: &str = "resources";

/// Limits fixed for the lifetime of one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub root: PathBuf,
    pub workers: usize,
    pub max_queued: usize,
    pub max_conns: usize,
    pub prealloc_conns: usize,
}

impl ServerConfig {
    pub fn new(port: u16, root: impl Into<PathBuf>) -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.addr.set_ip(ip);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn max_queued(mut self, max_queued: usize) -> Self {
        self.max_queued = max_queued;
        self
    }

    pub fn max_conns(mut self, max_conns: usize) -> Self {
        self.max_conns = max_conns.min(MAX_CONNS);
        self
    }

    pub fn prealloc_conns(mut self, n: usize) -> Self {
        self.prealloc_conns = n;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            root: PathBuf::from(DEFAULT_ROOT),
            workers: DEFAULT_WORKERS,
            max_queued: DEFAULT_MAX_QUEUED,
            max_conns: MAX_CONNS,
            prealloc_conns: DEFAULT_PREALLOC_CONNS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_conns_is_clamped_to_token_space() {
        let cfg = ServerConfig::new(8080, "/srv").max_conns(usize::MAX);
        assert_eq!(cfg.max_conns, MAX_CONNS);
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.workers, DEFAULT_WORKERS);
    }
}
