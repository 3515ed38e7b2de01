use crate::config::FIRST_CONN_TOKEN;
use crate::conn::HttpConn;
use mio::Token;

/// Boxed connection states, one per possible connection. States are built
/// lazily up to `max_active` and never freed, so once a level of concurrency
/// has been reached accept/close at that level does not allocate.
pub struct ConnPool {
    free: Vec<Box<HttpConn>>,
    active: usize,
    allocated: usize,
    max_active: usize,
}

impl ConnPool {
    pub fn new(max_active: usize, prealloc: usize) -> Self {
        let prealloc = prealloc.min(max_active);
        let mut free = Vec::with_capacity(max_active);
        free.extend((0..prealloc).map(|_| Box::new(HttpConn::new())));
        Self { free, active: 0, allocated: prealloc, max_active }
    }

    #[inline]
    pub fn acquire(&mut self) -> Option<Box<HttpConn>> {
        if self.active >= self.max_active {
            return None;
        }
        self.active += 1;
        Some(self.free.pop().unwrap_or_else(|| {
            self.allocated += 1;
            Box::new(HttpConn::new())
        }))
    }

    #[inline]
    pub fn release(&mut self, mut conn: Box<HttpConn>) {
        self.active = self.active.saturating_sub(1);
        conn.reset();
        self.free.push(conn);
    }

    #[inline]
    pub fn active(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// States built so far, idle or active.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

/// Hands out connection tokens in `FIRST_CONN_TOKEN..FIRST_CONN_TOKEN + max`.
pub struct TokenPool {
    next: usize,
    limit: usize,
    free: Vec<usize>,
}

impl TokenPool {
    pub fn new(max: usize) -> Self {
        Self {
            next: FIRST_CONN_TOKEN,
            limit: FIRST_CONN_TOKEN + max,
            free: Vec::with_capacity(max),
        }
    }

    #[inline]
    pub fn acquire(&mut self) -> Option<Token> {
        if let Some(t) = self.free.pop() {
            return Some(Token(t));
        }
        if self.next < self.limit {
            let t = self.next;
            self.next += 1;
            Some(Token(t))
        } else {
            None
        }
    }

    #[inline]
    pub fn release(&mut self, tok: Token) {
        self.free.push(tok.0);
    }
}
