//! Single-threaded readiness loop.
//!
//! The reactor owns the listener, the poll instance and every socket. It
//! accepts, drains reads and performs writes itself; parsing and response
//! construction run on the thread pool. A connection's `HttpConn` is moved
//! into the task and comes back through the completion queue, and only then
//! is its socket re-armed. While a worker holds it the slot is `Busy` and
//! events for that token are ignored, so no two threads ever see the same
//! connection state.

use crate::config::{
    ServerConfig, FIRST_CONN_TOKEN, LISTEN_BACKLOG, MAX_EVENTS, SERVER_TOKEN,
    WAKER_TOKEN,
};
use crate::conn::{HttpConn, Next, Transmit};
use crate::error::{ReadError, ServerError};
use crate::pool::{ConnPool, TokenPool};
use crate::slab::{ConnSlot, Slab, Slot};
use crate::threadpool::ThreadPool;
use crossbeam_queue::SegQueue;
use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

struct Task {
    token: Token,
    peer: SocketAddr,
    conn: Box<HttpConn>,
}

struct Processed {
    token: Token,
    conn: Box<HttpConn>,
    next: Next,
}

/// Worker to reactor hand-back.
struct Completions {
    done: SegQueue<Processed>,
    waker: Waker,
}

impl Completions {
    fn push(&self, processed: Processed) {
        self.done.push(processed);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake reactor");
        }
    }
}

/// Stops a running reactor from another thread.
#[derive(Clone)]
pub struct ReactorHandle {
    stop: Arc<AtomicBool>,
    completions: Arc<Completions>,
}

impl ReactorHandle {
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.completions.waker.wake() {
            warn!(error = %e, "failed to wake reactor for shutdown");
        }
    }
}

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    slab: Slab,
    tokens: TokenPool,
    conns: ConnPool,
    pool: ThreadPool<Task>,
    completions: Arc<Completions>,
    stop: Arc<AtomicBool>,
    to_close: Vec<Token>,
}

fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    sock.set_reuse_address(true)?;
    sock.set_nonblocking(true)?;
    sock.bind(&addr.into())?;
    sock.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(sock.into()))
}

impl Reactor {
    /// Binds the listener and starts the worker threads. Nothing is served
    /// until `run` is called.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let root: Arc<Path> = Arc::from(config.root.as_path());
        Self::with_processor(config, move |conn: &mut HttpConn| conn.process(&root))
    }

    /// Like `bind`, with `process` run on the worker threads in place of
    /// `HttpConn::process`.
    fn with_processor<F>(config: ServerConfig, process: F) -> Result<Self, ServerError>
    where
        F: Fn(&mut HttpConn) -> Next + Send + Sync + 'static,
    {
        let mut listener =
            listen(config.addr).map_err(|source| ServerError::Bind { addr: config.addr, source })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;

        let completions = Arc::new(Completions {
            done: SegQueue::new(),
            waker: Waker::new(poll.registry(), WAKER_TOKEN)?,
        });

        let pool = {
            let completions = Arc::clone(&completions);
            ThreadPool::new(config.workers, config.max_queued, move |task: Task| {
                let Task { token, peer, mut conn } = task;
                let next = process(&mut *conn);
                debug!(
                    token = token.0,
                    %peer,
                    target = %String::from_utf8_lossy(conn.target()),
                    status = ?conn.status().map(|s| s.code()),
                    ?next,
                    "processed"
                );
                completions.push(Processed { token, conn, next });
            })?
        };

        info!(
            addr = %local_addr,
            root = %config.root.display(),
            workers = config.workers,
            max_conns = config.max_conns,
            "listening"
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            slab: Slab::new(FIRST_CONN_TOKEN + config.max_conns),
            tokens: TokenPool::new(config.max_conns),
            conns: ConnPool::new(config.max_conns, config.prealloc_conns),
            pool,
            completions,
            stop: Arc::new(AtomicBool::new(false)),
            to_close: Vec::with_capacity(64),
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn active_connections(&self) -> usize {
        self.slab.len()
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle { stop: Arc::clone(&self.stop), completions: Arc::clone(&self.completions) }
    }

    /// Runs until `ReactorHandle::shutdown` is called.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(MAX_EVENTS);
        while self.turn(&mut events, None)? {}
        info!(active = self.slab.len(), "reactor stopping");
        Ok(())
    }

    /// One wait and dispatch round. `false` once shutdown was requested.
    fn turn(
        &mut self,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<bool, ServerError> {
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        for event in events.iter() {
            match event.token() {
                SERVER_TOKEN => self.accept_connections(),
                WAKER_TOKEN => self.drain_completions(),
                token => self.handle_connection(token, event),
            }
        }

        while let Some(tok) = self.to_close.pop() {
            self.close_conn(tok);
        }

        Ok(!self.stop.load(Ordering::Acquire))
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let Some(tok) = self.tokens.acquire() else {
                        warn!(%peer, "connection limit reached, dropping connection");
                        continue;
                    };
                    let Some(conn) = self.conns.acquire() else {
                        warn!(%peer, "connection state exhausted, dropping connection");
                        self.tokens.release(tok);
                        continue;
                    };
                    let _ = stream.set_nodelay(true);

                    if let Err(e) = self.poll.registry().register(&mut stream, tok, Interest::READABLE) {
                        warn!(%peer, error = %e, "register failed");
                        self.conns.release(conn);
                        self.tokens.release(tok);
                        continue;
                    }

                    self.slab.insert(tok, Slot::new(stream, peer, conn));
                    debug!(token = tok.0, %peer, active = self.slab.len(), "accepted");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    break;
                }
            }
        }
    }

    fn handle_connection(&mut self, token: Token, event: &Event) {
        let Some(slot) = self.slab.get_mut(token) else { return };

        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
            if slot.is_busy() {
                slot.close_pending = true;
            } else {
                self.to_close.push(token);
            }
            return;
        }

        let Some(conn) = slot.conn_mut() else { return };
        if conn.has_pending_write() {
            if event.is_writable() {
                self.do_write(token);
            }
        } else if event.is_readable() {
            self.do_read(token);
        }
    }

    fn do_read(&mut self, token: Token) {
        let Some(slot) = self.slab.get_mut(token) else { return };
        let ConnSlot::Idle(conn) = &mut slot.conn else { return };

        match conn.read_from(&mut slot.stream) {
            Ok(n) => trace!(token = token.0, n, total = conn.read_idx(), "read"),
            Err(ReadError::PeerClosed) => {
                debug!(token = token.0, peer = %slot.peer, "peer closed");
                self.to_close.push(token);
                return;
            }
            Err(e) => {
                warn!(token = token.0, peer = %slot.peer, error = %e, "read failed, closing");
                self.to_close.push(token);
                return;
            }
        }

        let Some(conn) = slot.take_conn() else { return };
        if let Err(rejected) = self.pool.submit(Task { token, peer: slot.peer, conn }) {
            let Task { conn, .. } = rejected.into_inner();
            warn!(token = token.0, peer = %slot.peer, "task queue full, request dropped");
            slot.put_conn(conn);
            if let Err(e) = self.poll.registry().reregister(&mut slot.stream, token, Interest::READABLE) {
                warn!(token = token.0, error = %e, "re-arm failed");
                self.to_close.push(token);
            }
        }
    }

    fn do_write(&mut self, token: Token) {
        let Some(slot) = self.slab.get_mut(token) else { return };
        let ConnSlot::Idle(conn) = &mut slot.conn else { return };

        let interest = match conn.write_to(&mut slot.stream) {
            Transmit::Complete { keep_alive } => {
                debug!(
                    token = token.0,
                    peer = %slot.peer,
                    status = ?conn.status().map(|s| s.code()),
                    keep_alive,
                    "response sent"
                );
                if !keep_alive {
                    self.to_close.push(token);
                    return;
                }
                conn.reset();
                Interest::READABLE
            }
            Transmit::Pending => Interest::WRITABLE,
            Transmit::Failed(e) => {
                debug!(token = token.0, peer = %slot.peer, error = %e, "write failed");
                self.to_close.push(token);
                return;
            }
        };

        if let Err(e) = self.poll.registry().reregister(&mut slot.stream, token, interest) {
            warn!(token = token.0, error = %e, "re-arm failed");
            self.to_close.push(token);
        }
    }

    fn drain_completions(&mut self) {
        while let Some(Processed { token, conn, next }) = self.completions.done.pop() {
            let Some(slot) = self.slab.get_mut(token) else {
                self.conns.release(conn);
                continue;
            };
            slot.put_conn(conn);

            if slot.close_pending {
                self.to_close.push(token);
                continue;
            }
            let interest = match next {
                Next::Read => Interest::READABLE,
                Next::Write => Interest::WRITABLE,
                Next::Close => {
                    self.to_close.push(token);
                    continue;
                }
            };
            if let Err(e) = self.poll.registry().reregister(&mut slot.stream, token, interest) {
                warn!(token = token.0, error = %e, "re-arm failed");
                self.to_close.push(token);
            }
        }
    }

    fn close_conn(&mut self, tok: Token) {
        let Some(mut slot) = self.slab.remove(tok) else { return };
        let _ = self.poll.registry().deregister(&mut slot.stream);
        if let ConnSlot::Idle(conn) = slot.conn {
            self.conns.release(conn);
        }
        self.tokens.release(tok);
        debug!(token = tok.0, peer = %slot.peer, active = self.slab.len(), "closed");
    }
}
