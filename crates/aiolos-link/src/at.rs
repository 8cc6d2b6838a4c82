//! # AT Command Channel
//!
//! Line-oriented request/response over a [`SerialPort`]. Every wait is a
//! deadline on the injected [`Clock`]; an idle poll sleeps for a few
//! milliseconds, which under the mock clock simply advances virtual time.
//!
//! ```text
//!   host ── "AT+CSQ\r\n" ──▶ modem
//!   host ◀── "\r\n+CSQ: 18,99\r\n\r\nOK\r\n" ── modem
//! ```

use std::time::Duration;

use tracing::{trace, warn};

use crate::clock::{Clock, Deadline};
use crate::hal::SerialPort;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtStatus {
    Ok,
    Error,
    Timeout,
}

/// Terminal status plus every informational line received before it.
#[derive(Debug, Clone)]
pub struct AtResponse {
    pub status: AtStatus,
    pub lines: Vec<String>,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.status == AtStatus::Ok
    }

    /// The modem said something conclusive, even if it was `ERROR`.
    pub fn answered(&self) -> bool {
        self.status != AtStatus::Timeout
    }

    /// Remainder of the first line starting with `prefix`, trimmed.
    pub fn field(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|line| line.strip_prefix(prefix))
            .map(str::trim)
    }

    /// All informational lines joined, for logging and length heuristics.
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    fn timeout(lines: Vec<String>) -> Self {
        AtResponse {
            status: AtStatus::Timeout,
            lines,
        }
    }
}

/// Modem UART plus the line framing state.
pub struct AtChannel<S> {
    port: S,
    clock: Clock,
    partial: Vec<u8>,
}

impl<S: SerialPort> AtChannel<S> {
    pub fn new(port: S, clock: Clock) -> Self {
        AtChannel {
            port,
            clock,
            partial: Vec::with_capacity(128),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    /// Reopen the UART and forget any half-received line.
    pub fn reopen(&mut self, baud: u32) -> std::io::Result<()> {
        self.partial.clear();
        self.port.reopen(baud)
    }

    /// Drop stale bytes (boot banners, late URCs).
    pub fn discard_input(&mut self) {
        self.partial.clear();
        self.port.discard_input();
    }

    /// Write `AT<cmd>` terminated by CRLF.
    pub fn send(&mut self, cmd: &str) -> std::io::Result<()> {
        trace!(cmd = %redact(cmd), "AT >>");
        let mut frame = Vec::with_capacity(cmd.len() + 4);
        frame.extend_from_slice(b"AT");
        frame.extend_from_slice(cmd.as_bytes());
        frame.extend_from_slice(b"\r\n");
        self.port.write_all(&frame)
    }

    /// Write raw payload bytes (after a `>` prompt).
    pub fn write_raw(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.port.write_all(data)
    }

    /// Send a command and wait for `OK` / `ERROR`.
    pub fn exchange(&mut self, cmd: &str, timeout: Duration) -> AtResponse {
        if let Err(e) = self.send(cmd) {
            warn!(cmd = %redact(cmd), error = %e, "AT write failed");
            return AtResponse::timeout(Vec::new());
        }
        self.wait_response(timeout)
    }

    /// Send a command whose completion is a result line such as
    /// `CONNECT OK` rather than a bare `OK`.
    pub fn exchange_until(
        &mut self,
        cmd: &str,
        timeout: Duration,
        success: &[&str],
        failure: &[&str],
    ) -> AtResponse {
        if let Err(e) = self.send(cmd) {
            warn!(cmd = %redact(cmd), error = %e, "AT write failed");
            return AtResponse::timeout(Vec::new());
        }
        self.wait_until(timeout, success, failure)
    }

    /// Collect lines until a terminal `OK` / `ERROR`.
    pub fn wait_response(&mut self, timeout: Duration) -> AtResponse {
        let deadline = self.clock.deadline(timeout);
        let mut lines = Vec::new();
        while let Some(line) = self.read_line(deadline) {
            match terminal_status(&line) {
                Some(status) => {
                    trace!(?status, lines = lines.len(), "AT <<");
                    return AtResponse { status, lines };
                }
                None => lines.push(line),
            }
        }
        AtResponse::timeout(lines)
    }

    /// Collect lines until one starts with a `success` or `failure` token.
    /// Intermediate `OK` lines are swallowed; `ERROR` counts as failure.
    pub fn wait_until(&mut self, timeout: Duration, success: &[&str], failure: &[&str]) -> AtResponse {
        let deadline = self.clock.deadline(timeout);
        let mut lines = Vec::new();
        while let Some(line) = self.read_line(deadline) {
            if success.iter().any(|t| line.starts_with(t)) {
                lines.push(line);
                return AtResponse {
                    status: AtStatus::Ok,
                    lines,
                };
            }
            if failure.iter().any(|t| line.starts_with(t))
                || terminal_status(&line) == Some(AtStatus::Error)
            {
                lines.push(line);
                return AtResponse {
                    status: AtStatus::Error,
                    lines,
                };
            }
            if line != "OK" {
                lines.push(line);
            }
        }
        AtResponse::timeout(lines)
    }

    /// Wait for the `>` data prompt that follows `AT+CIPSEND=<n>`.
    pub fn wait_prompt(&mut self, timeout: Duration) -> bool {
        let deadline = self.clock.deadline(timeout);
        loop {
            match self.next_byte() {
                Some(b'>') => {
                    self.partial.clear();
                    return true;
                }
                Some(b'\n') => {
                    let line = self.take_partial();
                    if terminal_status(&line) == Some(AtStatus::Error) {
                        return false;
                    }
                }
                Some(b) => self.partial.push(b),
                None if deadline.expired(&self.clock) => return false,
                None => self.clock.sleep(POLL_INTERVAL),
            }
        }
    }

    /// Read exactly `n` raw bytes, e.g. a socket payload after its header.
    pub fn read_exact(&mut self, n: usize, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = self.clock.deadline(timeout);
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.next_byte() {
                Some(b) => out.push(b),
                None if deadline.expired(&self.clock) => return None,
                None => self.clock.sleep(POLL_INTERVAL),
            }
        }
        Some(out)
    }

    /// Next non-empty, non-echo line before `deadline`.
    pub fn read_line(&mut self, deadline: Deadline) -> Option<String> {
        loop {
            match self.next_byte() {
                Some(b'\n') => {
                    let line = self.take_partial();
                    if line.is_empty() || line.starts_with("AT") {
                        continue;
                    }
                    return Some(line);
                }
                Some(b) => self.partial.push(b),
                None if deadline.expired(&self.clock) => return None,
                None => self.clock.sleep(POLL_INTERVAL),
            }
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        match self.port.read_byte() {
            Ok(b) => b,
            Err(e) => {
                trace!(error = %e, "serial read failed");
                None
            }
        }
    }

    fn take_partial(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.partial).trim().to_string();
        self.partial.clear();
        line
    }
}

fn terminal_status(line: &str) -> Option<AtStatus> {
    if line == "OK" {
        Some(AtStatus::Ok)
    } else if line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") {
        Some(AtStatus::Error)
    } else {
        None
    }
}

/// Hide PIN and password arguments from the log.
fn redact(cmd: &str) -> &str {
    if cmd.starts_with("+CPIN=") || cmd.starts_with("+CPWD") {
        "<redacted>"
    } else {
        cmd
    }
}
