//! Static file server: one mio reactor thread doing all socket I/O, a fixed
//! worker pool doing request parsing and response construction, and files
//! sent with a single vectored write straight out of a memory mapping.

pub mod config;
pub mod conn;
pub mod error;
pub mod parser;
pub mod pool;
pub mod reactor;
pub mod resource;
pub mod response;
pub mod slab;
pub mod threadpool;

pub use config::ServerConfig;
pub use error::ServerError;
pub use reactor::{Reactor, ReactorHandle};
