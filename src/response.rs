use crate::error::{ResolveError, ResponseOverflow};
use std::fmt;
use std::io::{Cursor, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalError => 500,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalError => "Internal Error",
        }
    }

    /// Fixed body sent with error statuses. Empty for `Ok`.
    pub fn form(self) -> &'static str {
        match self {
            Status::Ok => "",
            Status::BadRequest => {
                "Your request has bad syntax or is inherently impossible to satisfy.\n"
            }
            Status::Forbidden => "You do not have permission to get file from this server.\n",
            Status::NotFound => "The requested file was not found on this server.\n",
            Status::InternalError => "There was an unusual problem serving the requested file.\n",
        }
    }
}

impl From<&ResolveError> for Status {
    fn from(err: &ResolveError) -> Self {
        match err {
            ResolveError::NotFound => Status::NotFound,
            ResolveError::Forbidden => Status::Forbidden,
            ResolveError::IsDirectory | ResolveError::Traversal => Status::BadRequest,
            ResolveError::Io(_) => Status::InternalError,
        }
    }
}

/// Appends response text to a fixed buffer. A piece that does not fit is
/// dropped whole and reported as `ResponseOverflow`.
pub struct ResponseWriter<'a> {
    cursor: Cursor<&'a mut [u8]>,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { cursor: Cursor::new(buf) }
    }

    fn append(&mut self, args: fmt::Arguments<'_>) -> Result<(), ResponseOverflow> {
        let start = self.cursor.position();
        if self.cursor.write_fmt(args).is_err() {
            self.cursor.set_position(start);
            return Err(ResponseOverflow);
        }
        Ok(())
    }

    pub fn status_line(&mut self, status: Status) -> Result<(), ResponseOverflow> {
        self.append(format_args!("HTTP/1.1 {} {}\r\n", status.code(), status.title()))
    }

    pub fn header(&mut self, name: &str, value: impl fmt::Display) -> Result<(), ResponseOverflow> {
        self.append(format_args!("{name}: {value}\r\n"))
    }

    pub fn blank_line(&mut self) -> Result<(), ResponseOverflow> {
        self.append(format_args!("\r\n"))
    }

    pub fn body(&mut self, content: &str) -> Result<(), ResponseOverflow> {
        self.append(format_args!("{content}"))
    }

    /// Status line, `Content-Length`, `Content-Type`, `Connection`, blank line.
    pub fn head(
        &mut self,
        status: Status,
        content_length: usize,
        keep_alive: bool,
    ) -> Result<(), ResponseOverflow> {
        self.status_line(status)?;
        self.header("Content-Length", content_length)?;
        self.header("Content-Type", "text/html")?;
        self.header("Connection", if keep_alive { "keep-alive" } else { "close" })?;
        self.blank_line()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cursor.position() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
