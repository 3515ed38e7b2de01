//! Incremental HTTP/1.1 request parser.
//!
//! The parser never owns bytes. Every call gets the filled prefix of the
//! connection's read buffer (`&buf[..read_idx]`) and resumes from the offsets
//! it recorded on the previous call, so a request may arrive in any number of
//! pieces. Everything it extracts is stored as a byte range into that buffer.

use std::ops::Range;
use tracing::{debug, trace};

/// Outer state: which part of the request the next line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Headers,
    Body,
}

/// Result of scanning for the next line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Complete,
    Open,
    Bad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// More bytes are needed. No outer state was lost.
    Incomplete,
    Complete,
    BadRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Put,
    Delete,
    Trace,
    Options,
    Connect,
}

impl Method {
    pub fn from_token(token: &[u8]) -> Option<Self> {
        const TABLE: [(&[u8], Method); 8] = [
            (b"GET", Method::Get),
            (b"POST", Method::Post),
            (b"HEAD", Method::Head),
            (b"PUT", Method::Put),
            (b"DELETE", Method::Delete),
            (b"TRACE", Method::Trace),
            (b"OPTIONS", Method::Options),
            (b"CONNECT", Method::Connect),
        ];
        TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(token))
            .map(|&(_, m)| m)
    }
}

/// What has been learned about the request so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Option<Method>,
    pub target: Range<usize>,
    pub version: Range<usize>,
    pub host: Option<Range<usize>>,
    pub content_length: usize,
    pub linger: bool,
}

impl RequestHead {
    pub fn target<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[self.target.clone()]
    }

    pub fn version<'b>(&self, buf: &'b [u8]) -> &'b [u8] {
        &buf[self.version.clone()]
    }

    pub fn host<'b>(&self, buf: &'b [u8]) -> Option<&'b [u8]> {
        self.host.clone().map(|r| &buf[r])
    }
}

enum HeaderStep {
    More,
    EndOfHead,
    Bad,
}

#[derive(Debug, Clone)]
pub struct RequestParser {
    state: CheckState,
    checked_idx: usize,
    start_line: usize,
    line_end: usize,
    body_start: usize,
    head: RequestHead,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: CheckState::RequestLine,
            checked_idx: 0,
            start_line: 0,
            line_end: 0,
            body_start: 0,
            head: RequestHead::default(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn state(&self) -> CheckState {
        self.state
    }

    /// Bytes of the buffer already scanned.
    #[inline]
    pub fn checked_idx(&self) -> usize {
        self.checked_idx
    }

    #[inline]
    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// Drives the outer state machine over `buf` (the filled part of the
    /// read buffer) until the request completes, fails, or input runs out.
    pub fn parse(&mut self, buf: &[u8]) -> ParseOutcome {
        loop {
            if self.state == CheckState::Body {
                return self.check_body(buf.len());
            }

            match self.parse_line(buf) {
                LineStatus::Complete => {}
                LineStatus::Open => return ParseOutcome::Incomplete,
                LineStatus::Bad => {
                    debug!(offset = self.checked_idx, "malformed line terminator");
                    return ParseOutcome::BadRequest;
                }
            }

            let line = self.start_line..self.line_end;
            self.start_line = self.checked_idx;
            trace!(line = %String::from_utf8_lossy(&buf[line.clone()]), "got a line");

            match self.state {
                CheckState::RequestLine => {
                    if !self.parse_request_line(buf, line) {
                        return ParseOutcome::BadRequest;
                    }
                }
                CheckState::Headers => match self.parse_header(buf, line) {
                    HeaderStep::More => {}
                    HeaderStep::Bad => return ParseOutcome::BadRequest,
                    HeaderStep::EndOfHead if self.head.content_length != 0 => {
                        self.state = CheckState::Body;
                        self.body_start = self.checked_idx;
                    }
                    HeaderStep::EndOfHead => return ParseOutcome::Complete,
                },
                CheckState::Body => unreachable!("body is checked before scanning lines"),
            }
        }
    }

    /// Scans from the parse cursor for `\r\n`. On success the cursor moves
    /// past the terminator and the line spans `start_line..line_end`. A `\r`
    /// at the end of the buffer leaves the cursor on it, so the pair is
    /// always seen together on a later scan; any bare `\n` is malformed.
    pub fn parse_line(&mut self, buf: &[u8]) -> LineStatus {
        while self.checked_idx < buf.len() {
            match buf[self.checked_idx] {
                b'\r' => {
                    if self.checked_idx + 1 == buf.len() {
                        return LineStatus::Open;
                    }
                    if buf[self.checked_idx + 1] == b'\n' {
                        self.line_end = self.checked_idx;
                        self.checked_idx += 2;
                        return LineStatus::Complete;
                    }
                    return LineStatus::Bad;
                }
                b'\n' => return LineStatus::Bad,
                _ => self.checked_idx += 1,
            }
        }
        LineStatus::Open
    }

    // METHOD SP TARGET SP VERSION
    fn parse_request_line(&mut self, buf: &[u8], line: Range<usize>) -> bool {
        let text = &buf[line.clone()];

        let Some(method_end) = text.iter().position(|&b| is_blank(b)) else {
            return false;
        };
        match Method::from_token(&text[..method_end]) {
            Some(Method::Get) => self.head.method = Some(Method::Get),
            other => {
                debug!(
                    method = %String::from_utf8_lossy(&text[..method_end]),
                    known = other.is_some(),
                    "unsupported method"
                );
                return false;
            }
        }

        let url_start = skip_blanks(text, method_end);
        let Some(url_len) = text[url_start..].iter().position(|&b| is_blank(b)) else {
            return false;
        };
        let url_end = url_start + url_len;

        let version_start = skip_blanks(text, url_end);
        if !text[version_start..].eq_ignore_ascii_case(b"HTTP/1.1") {
            debug!(version = %String::from_utf8_lossy(&text[version_start..]), "unsupported version");
            return false;
        }

        let mut target_start = url_start;
        let url = &text[url_start..url_end];
        if url.len() >= 7 && url[..7].eq_ignore_ascii_case(b"http://") {
            match url[7..].iter().position(|&b| b == b'/') {
                Some(slash) => target_start = url_start + 7 + slash,
                None => return false,
            }
        }
        if text.get(target_start) != Some(&b'/') || target_start >= url_end {
            return false;
        }

        self.head.target = line.start + target_start..line.start + url_end;
        self.head.version = line.start + version_start..line.end;
        self.state = CheckState::Headers;
        true
    }

    fn parse_header(&mut self, buf: &[u8], line: Range<usize>) -> HeaderStep {
        let text = &buf[line.clone()];
        if text.is_empty() {
            return HeaderStep::EndOfHead;
        }

        let Some(colon) = text.iter().position(|&b| b == b':') else {
            debug!(header = %String::from_utf8_lossy(text), "unknown header");
            return HeaderStep::More;
        };
        let name = &text[..colon];
        let value_start = skip_blanks(text, colon + 1);
        let value_end = text
            .iter()
            .rposition(|&b| !is_blank(b))
            .map_or(value_start, |last| (last + 1).max(value_start));
        let value = &text[value_start..value_end];

        if name.eq_ignore_ascii_case(b"Connection") {
            self.head.linger = value.eq_ignore_ascii_case(b"keep-alive");
        } else if name.eq_ignore_ascii_case(b"Content-Length") {
            match parse_decimal(value) {
                Some(n) => self.head.content_length = n,
                None => {
                    debug!(value = %String::from_utf8_lossy(value), "bad Content-Length");
                    return HeaderStep::Bad;
                }
            }
        } else if name.eq_ignore_ascii_case(b"Host") {
            self.head.host = Some(line.start + value_start..line.start + value_end);
        } else {
            debug!(header = %String::from_utf8_lossy(text), "unknown header");
        }
        HeaderStep::More
    }

    // The body is never interpreted, only counted.
    fn check_body(&mut self, read_idx: usize) -> ParseOutcome {
        if read_idx - self.body_start >= self.head.content_length {
            self.checked_idx = self.body_start + self.head.content_length;
            ParseOutcome::Complete
        } else {
            ParseOutcome::Incomplete
        }
    }
}

#[inline]
fn is_blank(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Index of the first non-blank byte after position `from` (exclusive of
/// the delimiter at `from`).
fn skip_blanks(text: &[u8], from: usize) -> usize {
    let mut i = from + 1;
    while i < text.len() && is_blank(text[i]) {
        i += 1;
    }
    i.min(text.len())
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0usize, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add((b - b'0') as usize)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(req: &[u8]) -> (ParseOutcome, RequestParser) {
        let mut p = RequestParser::new();
        let out = p.parse(req);
        (out, p)
    }

    #[test]
    fn parses_simple_get() {
        let req = b"GET /index.html HTTP/1.1\r\nHost: example.com\r\nConnection: Keep-Alive\r\n\r\n";
        let (out, p) = parse_all(req);
        assert_eq!(out, ParseOutcome::Complete);
        let head = p.head();
        assert_eq!(head.method, Some(Method::Get));
        assert_eq!(head.target(req), b"/index.html");
        assert_eq!(head.version(req), b"HTTP/1.1");
        assert_eq!(head.host(req), Some(&b"example.com"[..]));
        assert!(head.linger);
        assert_eq!(head.content_length, 0);
        assert_eq!(p.checked_idx(), req.len());
    }

    #[test]
    fn every_split_point_gives_the_same_result() {
        let requests: [&[u8]; 3] = [
            b"GET /a/b.txt HTTP/1.1\r\nHost: h\r\nX-Other: 1\r\n\r\n",
            b"GET http://h:8080/x HTTP/1.1\r\nContent-Length: 7\r\nConnection: keep-alive\r\n\r\nabc\r\nde",
            b"POST /x HTTP/1.1\r\n\r\n",
        ];
        for req in requests {
            let (expected, whole) = parse_all(req);
            for split in 1..req.len() {
                let mut p = RequestParser::new();
                let first = p.parse(&req[..split]);
                let out = if first == ParseOutcome::Incomplete {
                    p.parse(req)
                } else {
                    first
                };
                assert_eq!(out, expected, "split at {split}");
                if expected == ParseOutcome::Complete {
                    assert_eq!(p.head(), whole.head(), "split at {split}");
                }
            }
        }
    }

    #[test]
    fn byte_at_a_time_matches_one_shot() {
        let req = b"GET /slow HTTP/1.1\r\nHost: h\r\nContent-Length: 3\r\n\r\nxyz";
        let (_, whole) = parse_all(req);
        let mut p = RequestParser::new();
        let mut out = ParseOutcome::Incomplete;
        for end in 1..=req.len() {
            out = p.parse(&req[..end]);
            if end < req.len() {
                assert_eq!(out, ParseOutcome::Incomplete, "prefix of {end}");
            }
        }
        assert_eq!(out, ParseOutcome::Complete);
        assert_eq!(p.head(), whole.head());
    }

    #[test]
    fn rejects_non_get_methods() {
        assert_eq!(parse_all(b"POST / HTTP/1.1\r\n\r\n").0, ParseOutcome::BadRequest);
        assert_eq!(parse_all(b"BREW /pot HTTP/1.1\r\n\r\n").0, ParseOutcome::BadRequest);
        assert_eq!(parse_all(b"get / HTTP/1.1\r\n\r\n").0, ParseOutcome::Complete);
    }

    #[test]
    fn post_is_rejected_before_the_rest_arrives() {
        let mut p = RequestParser::new();
        assert_eq!(p.parse(b"POST /upload HTTP/1.1\r\nContent-Len"), ParseOutcome::BadRequest);
    }

    #[test]
    fn version_must_be_http_1_1() {
        assert_eq!(parse_all(b"GET / HTTP/1.0\r\n\r\n").0, ParseOutcome::BadRequest);
        assert_eq!(parse_all(b"GET / http/1.1\r\n\r\n").0, ParseOutcome::Complete);
        assert_eq!(parse_all(b"GET /\r\n\r\n").0, ParseOutcome::BadRequest);
    }

    #[test]
    fn absolute_form_is_stripped_to_path() {
        let req = b"GET http://10.0.0.1:10000/index.html HTTP/1.1\r\n\r\n";
        let (out, p) = parse_all(req);
        assert_eq!(out, ParseOutcome::Complete);
        assert_eq!(p.head().target(req), b"/index.html");

        assert_eq!(parse_all(b"GET http://host HTTP/1.1\r\n\r\n").0, ParseOutcome::BadRequest);
        assert_eq!(parse_all(b"GET index.html HTTP/1.1\r\n\r\n").0, ParseOutcome::BadRequest);
    }

    #[test]
    fn bare_newline_is_malformed() {
        assert_eq!(parse_all(b"GET / HTTP/1.1\nHost: h\r\n\r\n").0, ParseOutcome::BadRequest);
        assert_eq!(parse_all(b"GET / HTTP/1.1\r\nHost: h\n\r\n").0, ParseOutcome::BadRequest);
        assert_eq!(parse_all(b"GET / HTTP/1.1\r\nHost: h\rX\r\n\r\n").0, ParseOutcome::BadRequest);
    }

    #[test]
    fn trailing_carriage_return_waits_for_more() {
        let req = b"GET / HTTP/1.1\r";
        let mut p = RequestParser::new();
        assert_eq!(p.parse_line(req), LineStatus::Open);
        assert_eq!(p.checked_idx(), req.len() - 1);
        assert_eq!(p.state(), CheckState::RequestLine);

        let full = b"GET / HTTP/1.1\r\n";
        assert_eq!(p.parse_line(full), LineStatus::Complete);
        assert_eq!(p.line_end, req.len() - 1);
        assert_eq!(p.checked_idx(), full.len());
    }

    #[test]
    fn incomplete_headers_keep_state() {
        let req = b"GET / HTTP/1.1\r\nHost: h\r\n";
        let (out, p) = parse_all(req);
        assert_eq!(out, ParseOutcome::Incomplete);
        assert_eq!(p.state(), CheckState::Headers);
        assert_eq!(p.checked_idx(), req.len());
    }

    #[test]
    fn body_waits_for_declared_length() {
        let req = b"GET / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab";
        let mut p = RequestParser::new();
        assert_eq!(p.parse(req), ParseOutcome::Incomplete);
        assert_eq!(p.state(), CheckState::Body);

        let full = b"GET / HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd";
        assert_eq!(p.parse(full), ParseOutcome::Complete);
        assert_eq!(p.checked_idx(), full.len());
    }

    #[test]
    fn header_quirks() {
        let req = b"GET / HTTP/1.1\r\nno colon here\r\nConnection: close\r\nHost:\tspaced  \r\n\r\n";
        let (out, p) = parse_all(req);
        assert_eq!(out, ParseOutcome::Complete);
        assert!(!p.head().linger);
        assert_eq!(p.head().host(req), Some(&b"spaced"[..]));

        assert_eq!(
            parse_all(b"GET / HTTP/1.1\r\nContent-Length: ten\r\n\r\n").0,
            ParseOutcome::BadRequest
        );
        assert_eq!(
            parse_all(b"GET / HTTP/1.1\r\nContent-Length: 0\r\n\r\n").0,
            ParseOutcome::Complete
        );
    }

    #[test]
    fn decimal_parsing() {
        assert_eq!(parse_decimal(b"0"), Some(0));
        assert_eq!(parse_decimal(b"1234"), Some(1234));
        assert_eq!(parse_decimal(b""), None);
        assert_eq!(parse_decimal(b"-1"), None);
        assert_eq!(parse_decimal(b"99999999999999999999999"), None);
    }
}
