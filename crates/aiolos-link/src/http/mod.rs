//! # Resilient HTTP Client
//!
//! Single-shot HTTP/1.1 over a [`Bearer`], one request in flight, one
//! server. Every request opens a connection, sends `Connection: close`,
//! reads a bounded response and closes.
//!
//! The client keeps its own [`Backoff`], separate from the supervisor's.
//! A request only counts toward it once it has been dispatched; a request
//! refused because the link is down or the client is throttled returns
//! status 0 and leaves the counters alone. A 2xx whose body the caller
//! cannot use (see [`ResilientHttpClient::perform_checked`]) is charged
//! like any other failed request.
//!
//! ```text
//!   throttled? ─yes─▶ 0
//!       │no
//!   connected? ─no──▶ 0
//!       │yes
//!   open ─▶ send ─▶ status ─▶ headers ─▶ body ─▶ close
//!                      │
//!             2xx ─▶ record_success     other / transport ─▶ record_failure
//! ```

pub mod response;

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::LinkError;
use crate::modem::Bearer;
use crate::supervisor::LinkStatus;

pub use response::{parse_status_line, ResponseHead, StallReader};

const USER_AGENT: &str = concat!("aiolos-station/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`ResilientHttpClient::perform_request`].
///
/// `status == 0` with `transport_error == false` means the request never
/// left the device. A transport error keeps the status if the status line
/// had already been read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpOutcome {
    pub status: u16,
    pub body: Bytes,
    pub transport_error: bool,
    /// 2xx received, but the body failed the caller's check.
    pub rejected: bool,
}

impl HttpOutcome {
    pub fn not_sent() -> Self {
        HttpOutcome::default()
    }

    pub fn is_success(&self) -> bool {
        !self.transport_error && !self.rejected && is_success(self.status)
    }

    pub fn was_dispatched(&self) -> bool {
        self.status != 0 || self.transport_error
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// How much of the response to read.
#[derive(Clone, Copy)]
enum Read {
    Full,
    StatusOnly,
}

/// Status seen so far (0 if none) and the body or the transport fault.
type Exchange = (u16, Result<Bytes, LinkError>);

pub struct ResilientHttpClient {
    config: ServerConfig,
    clock: Clock,
    backoff: Backoff,
}

impl ResilientHttpClient {
    pub fn new(config: ServerConfig, clock: Clock) -> Self {
        ResilientHttpClient {
            backoff: Backoff::new(config.backoff),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// True while the delay after the last dispatched failure is running.
    pub fn is_connection_throttled(&self) -> bool {
        self.backoff.is_throttled(self.clock.now())
    }

    pub fn throttle_remaining(&self) -> Duration {
        if self.is_connection_throttled() {
            self.backoff.remaining(self.clock.now())
        } else {
            Duration::ZERO
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.backoff.failures()
    }

    pub fn backoff_delay(&self) -> Duration {
        self.backoff.delay()
    }

    pub fn record_failure(&mut self) -> Duration {
        let delay = self.backoff.record_failure(self.clock.now());
        debug!(
            failures = self.backoff.failures(),
            delay_ms = delay.as_millis() as u64,
            "http backoff"
        );
        delay
    }

    pub fn record_success(&mut self) {
        if self.backoff.failures() > 0 {
            debug!(failures = self.backoff.failures(), "http backoff cleared");
        }
        self.backoff.record_success();
    }

    /// Full request with a bounded body read.
    pub fn perform_request<T: Bearer + ?Sized>(
        &mut self,
        bearer: &mut T,
        link: &impl LinkStatus,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
    ) -> HttpOutcome {
        self.perform_checked(bearer, link, method, path, body, |_| Ok(()))
    }

    /// [`perform_request`](Self::perform_request) where a 2xx only counts
    /// as a success once `check` accepts the body. A refused body settles
    /// the backoff exactly once, as a failure.
    pub fn perform_checked<T: Bearer + ?Sized>(
        &mut self,
        bearer: &mut T,
        link: &impl LinkStatus,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
        check: impl FnOnce(&[u8]) -> Result<(), LinkError>,
    ) -> HttpOutcome {
        if let Err(e) = self.admit(link) {
            debug!(%method, path, error = %e, "request not sent");
            return HttpOutcome::not_sent();
        }
        let (status, result) = self.dispatch(bearer, method, path, body, Read::Full);
        match result {
            Ok(body) => {
                let mut rejected = false;
                if is_success(status) {
                    if let Err(e) = check(&body) {
                        warn!(%method, path, status, error = %e, "response body rejected");
                        rejected = true;
                    }
                }
                if rejected {
                    self.record_failure();
                } else {
                    self.settle(method, path, status);
                }
                HttpOutcome {
                    status,
                    body,
                    transport_error: false,
                    rejected,
                }
            }
            Err(e) => {
                warn!(%method, path, status, error = %e, "request failed");
                self.record_failure();
                HttpOutcome {
                    status,
                    body: Bytes::new(),
                    transport_error: true,
                    rejected: false,
                }
            }
        }
    }

    /// POST that reads only the status line and drops the connection.
    /// Returns 0 when nothing was sent or no status line arrived.
    pub fn perform_lightweight_post<T: Bearer + ?Sized>(
        &mut self,
        bearer: &mut T,
        link: &impl LinkStatus,
        path: &str,
        body: &[u8],
    ) -> u16 {
        if let Err(e) = self.admit(link) {
            debug!(path, error = %e, "lightweight post not sent");
            return 0;
        }
        let (status, result) = self.dispatch(bearer, Method::Post, path, Some(body), Read::StatusOnly);
        match result {
            Ok(_) => self.settle(Method::Post, path, status),
            Err(e) => {
                warn!(path, error = %e, "lightweight post failed");
                self.record_failure();
            }
        }
        status
    }

    fn admit(&self, link: &impl LinkStatus) -> Result<(), LinkError> {
        let now = self.clock.now();
        if self.backoff.is_throttled(now) {
            return Err(LinkError::Throttled {
                remaining: self.backoff.remaining(now),
            });
        }
        if !link.is_connected() {
            return Err(LinkError::transport("link down"));
        }
        Ok(())
    }

    fn settle(&mut self, method: Method, path: &str, status: u16) {
        if is_success(status) {
            debug!(%method, path, status, "request ok");
            self.record_success();
        } else {
            let error = LinkError::HttpProtocolError(status);
            warn!(%method, path, error = %error, "request rejected");
            self.record_failure();
        }
    }

    fn dispatch<T: Bearer + ?Sized>(
        &self,
        bearer: &mut T,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
        read: Read,
    ) -> Exchange {
        if let Err(e) = bearer.open(&self.config.host, self.config.port, self.config.connect_timeout) {
            return (0, Err(e));
        }
        let request = self.encode_request(method, path, body);
        trace!(bytes = request.len(), "request encoded");
        let exchange = match bearer.send(&request) {
            Ok(()) => self.read_response(bearer, read),
            Err(e) => (0, Err(e)),
        };
        bearer.close();
        exchange
    }

    fn read_response<T: Bearer + ?Sized>(&self, bearer: &mut T, read: Read) -> Exchange {
        let mut reader = StallReader::new(bearer, &self.clock, self.config.stall_timeout);
        match read {
            Read::StatusOnly => match reader.read_status() {
                Ok(status) => (status, Ok(Bytes::new())),
                Err(e) => (0, Err(e)),
            },
            Read::Full => {
                let head = match reader.read_head() {
                    Ok(head) => head,
                    Err(e) => return (0, Err(e)),
                };
                trace!(
                    status = head.status,
                    content_length = ?head.content_length,
                    chunked = head.chunked,
                    "response head"
                );
                (head.status, reader.read_body(&head, self.config.max_body_bytes))
            }
        }
    }

    fn encode_request(&self, method: Method, path: &str, body: Option<&[u8]>) -> Bytes {
        let body = body.unwrap_or_default();
        let host = if self.config.port == 80 {
            self.config.host.clone()
        } else {
            format!("{}:{}", self.config.host, self.config.port)
        };
        let mut head = format!(
            "{method} {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {USER_AGENT}\r\nConnection: close\r\n"
        );
        match method {
            Method::Get => head.push_str("Accept: application/json\r\n"),
            Method::Post => {
                head.push_str("Content-Type: application/json\r\n");
                head.push_str(&format!("Content-Length: {}\r\n", body.len()));
            }
        }
        head.push_str("\r\n");

        let mut buf = BytesMut::with_capacity(head.len() + body.len());
        buf.put_slice(head.as_bytes());
        buf.put_slice(body);
        buf.freeze()
    }
}
