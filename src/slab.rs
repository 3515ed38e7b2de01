use crate::conn::HttpConn;
use mio::net::TcpStream;
use mio::Token;
use std::net::SocketAddr;

/// Where a connection's state currently lives.
pub enum ConnSlot {
    /// Owned by the reactor; I/O events may touch it.
    Idle(Box<HttpConn>),
    /// Handed to a worker. Events for this token are held off until it returns.
    Busy,
}

pub struct Slot {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub conn: ConnSlot,
    /// A hang-up arrived while a worker held the state.
    pub close_pending: bool,
}

impl Slot {
    pub fn new(stream: TcpStream, peer: SocketAddr, conn: Box<HttpConn>) -> Self {
        Self { stream, peer, conn: ConnSlot::Idle(conn), close_pending: false }
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        matches!(self.conn, ConnSlot::Busy)
    }

    /// Moves the state out for a worker, leaving `Busy` behind.
    #[inline]
    pub fn take_conn(&mut self) -> Option<Box<HttpConn>> {
        match std::mem::replace(&mut self.conn, ConnSlot::Busy) {
            ConnSlot::Idle(conn) => Some(conn),
            ConnSlot::Busy => None,
        }
    }

    #[inline]
    pub fn put_conn(&mut self, conn: Box<HttpConn>) {
        self.conn = ConnSlot::Idle(conn);
    }

    #[inline]
    pub fn conn_mut(&mut self) -> Option<&mut HttpConn> {
        match &mut self.conn {
            ConnSlot::Idle(conn) => Some(conn),
            ConnSlot::Busy => None,
        }
    }
}

/// Token-indexed table of live connections, sized once.
pub struct Slab {
    slots: Vec<Option<Slot>>,
    len: usize,
}

impl Slab {
    pub fn new(cap: usize) -> Self {
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || None);
        Self { slots, len: 0 }
    }

    #[inline]
    pub fn insert(&mut self, tok: Token, slot: Slot) {
        if self.slots[tok.0].replace(slot).is_none() {
            self.len += 1;
        }
    }

    #[inline]
    pub fn get(&self, tok: Token) -> Option<&Slot> {
        self.slots.get(tok.0)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, tok: Token) -> Option<&mut Slot> {
        self.slots.get_mut(tok.0)?.as_mut()
    }

    #[inline]
    pub fn remove(&mut self, tok: Token) -> Option<Slot> {
        let slot = self.slots.get_mut(tok.0)?.take();
        if slot.is_some() {
            self.len -= 1;
        }
        slot
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;

    fn slot() -> (Slot, std::net::TcpStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (Slot::new(TcpStream::from_std(server), peer, Box::new(HttpConn::new())), client)
    }

    #[test]
    fn busy_slot_hides_state_until_returned() {
        let (mut s, _client) = slot();
        assert!(!s.is_busy());
        let conn = s.take_conn().unwrap();
        assert!(s.is_busy());
        assert!(s.conn_mut().is_none());
        assert!(s.take_conn().is_none());
        s.put_conn(conn);
        assert!(s.conn_mut().is_some());
    }

    #[test]
    fn insert_and_remove_track_len() {
        let mut slab = Slab::new(8);
        let (s, _client) = slot();
        slab.insert(Token(3), s);
        assert_eq!(slab.len(), 1);
        assert!(slab.get(Token(3)).is_some());
        assert!(slab.get(Token(100)).is_none());
        assert!(slab.remove(Token(3)).is_some());
        assert!(slab.remove(Token(3)).is_none());
        assert!(slab.is_empty());
    }
}
