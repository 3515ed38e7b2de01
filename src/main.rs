use anyhow::Context;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vrypt_httpd::config::{DEFAULT_MAX_QUEUED, DEFAULT_PREALLOC_CONNS, DEFAULT_ROOT, DEFAULT_WORKERS, MAX_CONNS};
use vrypt_httpd::{Reactor, ServerConfig};

/// Serve files from a directory over HTTP/1.1.
#[derive(Debug, Parser)]
#[command(name = "vrypt-httpd", version)]
struct Args {
    /// Port to listen on.
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Directory files are served from.
    #[arg(long, default_value = DEFAULT_ROOT)]
    root: PathBuf,

    /// Worker threads for parsing and response building.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Requests allowed to wait for a worker before new ones are dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_QUEUED)]
    max_queued: usize,

    /// Simultaneous connections; extra ones are closed on accept.
    #[arg(long, default_value_t = MAX_CONNS)]
    max_conns: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // Writes to a half-closed peer must fail with EPIPE, not kill the process.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let config = ServerConfig::new(args.port, args.root)
        .bind_ip(args.bind)
        .workers(args.workers)
        .max_queued(args.max_queued)
        .max_conns(args.max_conns)
        .prealloc_conns(DEFAULT_PREALLOC_CONNS);

    let mut reactor = Reactor::bind(config).context("failed to start server")?;
    reactor.run().context("event loop failed")?;
    Ok(())
}
