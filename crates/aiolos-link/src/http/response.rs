//! Response reading over a [`Bearer`] with a per-byte stall timeout.
//!
//! The timeout restarts whenever bytes arrive, so a slow but steady
//! transfer completes while a silent one is abandoned after one stall
//! period rather than after some total budget.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::clock::Clock;
use crate::error::LinkError;
use crate::modem::Bearer;

const RX_CHUNK: usize = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_LINE: usize = 1024;
const MAX_HEADERS: usize = 64;

/// Status line and the headers that matter for framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: Option<usize>,
    pub chunked: bool,
}

/// `HTTP/1.x <code> <reason>`
pub fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let code: u16 = parts.next()?.parse().ok()?;
    (100..1000).contains(&code).then_some(code)
}

pub struct StallReader<'a, T: Bearer + ?Sized> {
    bearer: &'a mut T,
    clock: &'a Clock,
    stall: Duration,
    buf: VecDeque<u8>,
    eof: bool,
}

impl<'a, T: Bearer + ?Sized> StallReader<'a, T> {
    pub fn new(bearer: &'a mut T, clock: &'a Clock, stall: Duration) -> Self {
        StallReader {
            bearer,
            clock,
            stall,
            buf: VecDeque::new(),
            eof: false,
        }
    }

    /// Wait for more bytes. `Ok(false)` on orderly end of stream.
    fn fill(&mut self) -> Result<bool, LinkError> {
        if self.eof {
            return Ok(false);
        }
        let deadline = self.clock.deadline(self.stall);
        loop {
            let chunk = self.bearer.receive(RX_CHUNK)?;
            if !chunk.is_empty() {
                trace!(bytes = chunk.len(), "response bytes");
                self.buf.extend(chunk);
                return Ok(true);
            }
            if !self.bearer.is_open() {
                // Bytes that landed between the empty read and the close
                // are still buffered in the modem. A closed socket may
                // refuse the read; nothing is left then.
                let tail = self.bearer.receive(RX_CHUNK).unwrap_or_default();
                if !tail.is_empty() {
                    trace!(bytes = tail.len(), "response tail after close");
                    self.buf.extend(tail);
                    return Ok(true);
                }
                self.eof = true;
                return Ok(false);
            }
            if deadline.expired(self.clock) {
                return Err(LinkError::transport(format!(
                    "response stalled for {:?}",
                    self.stall
                )));
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, LinkError> {
        if self.buf.is_empty() && !self.fill()? {
            return Ok(None);
        }
        Ok(self.buf.pop_front())
    }

    /// One CRLF-terminated line without the terminator. `None` at end of
    /// stream before any byte.
    pub fn read_line(&mut self) -> Result<Option<String>, LinkError> {
        let mut line = Vec::new();
        loop {
            match self.next_byte()? {
                Some(b'\n') => break,
                Some(b) => {
                    if line.len() >= MAX_LINE {
                        return Err(LinkError::transport("header line too long"));
                    }
                    line.push(b);
                }
                None if line.is_empty() => return Ok(None),
                None => break,
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    pub fn read_status(&mut self) -> Result<u16, LinkError> {
        let line = self
            .read_line()?
            .ok_or_else(|| LinkError::transport("connection closed before status line"))?;
        parse_status_line(&line)
            .ok_or_else(|| LinkError::transport(format!("malformed status line {line:?}")))
    }

    pub fn read_head(&mut self) -> Result<ResponseHead, LinkError> {
        let status = self.read_status()?;
        let mut head = ResponseHead {
            status,
            content_length: None,
            chunked: false,
        };
        for _ in 0..MAX_HEADERS {
            let line = self
                .read_line()?
                .ok_or_else(|| LinkError::transport("connection closed inside headers"))?;
            if line.is_empty() {
                return Ok(head);
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                head.content_length = value.parse().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                head.chunked = value.eq_ignore_ascii_case("chunked");
            }
        }
        Err(LinkError::transport("too many response headers"))
    }

    /// Body framed by `head`, at most `limit` bytes.
    pub fn read_body(&mut self, head: &ResponseHead, limit: usize) -> Result<Bytes, LinkError> {
        if head.chunked {
            return self.read_chunked(limit);
        }
        match head.content_length {
            Some(len) if len > limit => Err(LinkError::transport(format!(
                "body of {len} bytes exceeds {limit}"
            ))),
            Some(len) => {
                let mut body = BytesMut::with_capacity(len);
                self.read_into(&mut body, len)?;
                if body.len() < len {
                    return Err(LinkError::transport(format!(
                        "body ended after {} of {len} bytes",
                        body.len()
                    )));
                }
                Ok(body.freeze())
            }
            None => {
                let mut body = BytesMut::new();
                while self.next_byte_into(&mut body)? {
                    if body.len() > limit {
                        return Err(LinkError::transport(format!("body exceeds {limit} bytes")));
                    }
                }
                Ok(body.freeze())
            }
        }
    }

    fn read_chunked(&mut self, limit: usize) -> Result<Bytes, LinkError> {
        let mut body = BytesMut::new();
        loop {
            let line = self
                .read_line()?
                .ok_or_else(|| LinkError::transport("connection closed inside chunked body"))?;
            let size_field = line.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_field, 16)
                .map_err(|_| LinkError::transport(format!("bad chunk size {size_field:?}")))?;
            if size == 0 {
                while let Some(trailer) = self.read_line()? {
                    if trailer.is_empty() {
                        break;
                    }
                }
                return Ok(body.freeze());
            }
            if body.len().checked_add(size).map_or(true, |total| total > limit) {
                return Err(LinkError::transport(format!("body exceeds {limit} bytes")));
            }
            let before = body.len();
            self.read_into(&mut body, size)?;
            if body.len() - before < size {
                return Err(LinkError::transport("chunk truncated"));
            }
            self.read_line()?;
        }
    }

    fn read_into(&mut self, out: &mut BytesMut, n: usize) -> Result<(), LinkError> {
        let target = out
            .len()
            .checked_add(n)
            .ok_or_else(|| LinkError::transport(format!("read of {n} bytes overflows")))?;
        while out.len() < target {
            if !self.next_byte_into(out)? {
                break;
            }
        }
        Ok(())
    }

    fn next_byte_into(&mut self, out: &mut BytesMut) -> Result<bool, LinkError> {
        match self.next_byte()? {
            Some(b) => {
                out.extend_from_slice(&[b]);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
