use crate::config::{READ_BUF_SIZE, WRITE_BUF_SIZE};
use crate::error::{ReadError, ResponseOverflow};
use crate::parser::{CheckState, ParseOutcome, RequestParser};
use crate::resource::{self, Resource};
use crate::response::{ResponseWriter, Status};
use std::io::{self, IoSlice, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

/// What the reactor should arm next once a worker hands the connection back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Read,
    Write,
    Close,
}

#[derive(Debug)]
pub enum Transmit {
    Complete { keep_alive: bool },
    Pending,
    Failed(io::Error),
}

/// Request/response state of one socket. The socket itself stays with the
/// reactor so this can move to a worker thread and back.
pub struct HttpConn {
    read_buf: Box<[u8; READ_BUF_SIZE]>,
    read_idx: usize,
    parser: RequestParser,
    resource: Option<Resource>,
    write_buf: Box<[u8; WRITE_BUF_SIZE]>,
    write_idx: usize,
    bytes_to_send: usize,
    bytes_have_send: usize,
    status: Option<Status>,
}

impl Default for HttpConn {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpConn {
    pub fn new() -> Self {
        Self {
            read_buf: Box::new([0u8; READ_BUF_SIZE]),
            read_idx: 0,
            parser: RequestParser::new(),
            resource: None,
            write_buf: Box::new([0u8; WRITE_BUF_SIZE]),
            write_idx: 0,
            bytes_to_send: 0,
            bytes_have_send: 0,
            status: None,
        }
    }

    /// Back to a fresh request: cursors zeroed, buffers cleared, mapping dropped.
    pub fn reset(&mut self) {
        self.resource = None;
        self.read_buf.fill(0);
        self.read_idx = 0;
        self.parser.reset();
        self.write_buf.fill(0);
        self.write_idx = 0;
        self.bytes_to_send = 0;
        self.bytes_have_send = 0;
        self.status = None;
    }

    #[inline]
    pub fn read_idx(&self) -> usize {
        self.read_idx
    }

    #[inline]
    pub fn state(&self) -> CheckState {
        self.parser.state()
    }

    #[inline]
    pub fn linger(&self) -> bool {
        self.parser.head().linger
    }

    #[inline]
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    #[inline]
    pub fn has_pending_write(&self) -> bool {
        self.bytes_to_send > 0
    }

    #[inline]
    pub fn has_mapping(&self) -> bool {
        self.resource.is_some()
    }

    pub fn target(&self) -> &[u8] {
        self.parser.head().target(&self.read_buf[..])
    }

    /// Reads until the source would block. Running out of buffer space or
    /// hitting EOF is a failure: the request can never be answered.
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> Result<usize, ReadError> {
        let start = self.read_idx;
        loop {
            if self.read_idx >= READ_BUF_SIZE {
                return Err(ReadError::BufferFull);
            }
            match src.read(&mut self.read_buf[self.read_idx..]) {
                Ok(0) => return Err(ReadError::PeerClosed),
                Ok(n) => self.read_idx += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(self.read_idx - start),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Worker entry point: parse what has arrived, resolve the file, build
    /// the response.
    pub fn process(&mut self, root: &Path) -> Next {
        let outcome = match self.parser.parse(&self.read_buf[..self.read_idx]) {
            ParseOutcome::Incomplete => return Next::Read,
            ParseOutcome::BadRequest => Err(Status::BadRequest),
            ParseOutcome::Complete => {
                let target = self.parser.head().target(&self.read_buf[..]);
                resource::resolve(root, target).map_err(|e| {
                    debug!(target = %String::from_utf8_lossy(target), error = %e, "resolve failed");
                    Status::from(&e)
                })
            }
        };

        self.respond(outcome, WRITE_BUF_SIZE)
    }

    /// Builds the response in the first `limit` bytes of the write buffer,
    /// falling back to a 500 when it does not fit and closing when even that
    /// does not.
    fn respond(&mut self, outcome: Result<Resource, Status>, limit: usize) -> Next {
        if let Err(e) = self.process_write(outcome, limit) {
            warn!(error = %e, "falling back to 500");
            if self.process_write(Err(Status::InternalError), limit).is_err() {
                self.bytes_to_send = 0;
                return Next::Close;
            }
        }
        Next::Write
    }

    fn process_write(
        &mut self,
        outcome: Result<Resource, Status>,
        limit: usize,
    ) -> Result<(), ResponseOverflow> {
        self.resource = None;
        self.write_idx = 0;
        self.bytes_to_send = 0;
        self.bytes_have_send = 0;

        let keep_alive = self.parser.head().linger;
        let mut w = ResponseWriter::new(&mut self.write_buf[..limit]);
        match outcome {
            Ok(res) => {
                w.head(Status::Ok, res.len(), keep_alive)?;
                self.write_idx = w.len();
                self.bytes_to_send = self.write_idx + res.len();
                self.resource = Some(res);
                self.status = Some(Status::Ok);
            }
            Err(status) => {
                let form = status.form();
                w.head(status, form.len(), keep_alive)?;
                w.body(form)?;
                self.write_idx = w.len();
                self.bytes_to_send = self.write_idx;
                self.status = Some(status);
            }
        }
        Ok(())
    }

    /// One vectored write of whatever is left: header remainder plus file
    /// while the header is unsent, then only the unsent part of the file.
    pub fn write_step<W: Write>(&mut self, dst: &mut W) -> io::Result<usize> {
        let file = self.resource.as_ref().map_or(&[][..], |r| r.bytes());
        let n = if self.bytes_have_send < self.write_idx {
            let bufs = [
                IoSlice::new(&self.write_buf[self.bytes_have_send..self.write_idx]),
                IoSlice::new(file),
            ];
            dst.write_vectored(&bufs)?
        } else {
            let offset = self.bytes_have_send - self.write_idx;
            dst.write_vectored(&[IoSlice::new(&file[offset..])])?
        };
        self.bytes_to_send = self.bytes_to_send.saturating_sub(n);
        self.bytes_have_send += n;
        Ok(n)
    }

    /// Writes until done or the destination would block. The mapping is
    /// released on completion and on failure.
    pub fn write_to<W: Write>(&mut self, dst: &mut W) -> Transmit {
        if self.bytes_to_send == 0 {
            return Transmit::Complete { keep_alive: true };
        }
        loop {
            match self.write_step(dst) {
                Ok(0) => {
                    self.resource = None;
                    return Transmit::Failed(io::ErrorKind::WriteZero.into());
                }
                Ok(_) if self.bytes_to_send == 0 => {
                    self.resource = None;
                    return Transmit::Complete { keep_alive: self.linger() };
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Transmit::Pending,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.resource = None;
                    return Transmit::Failed(e);
                }
            }
        }
    }
}
