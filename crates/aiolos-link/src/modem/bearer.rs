//! # TCP Bearer
//!
//! A single TCP socket over the modem's built-in stack, in manual receive
//! mode (`AT+CIPRXGET=1`) so payload bytes never interleave with URCs.
//!
//! ```text
//!   AT+CIPSTART="TCP","host",80  ──▶  OK … CONNECT OK
//!   AT+CIPSEND=n                 ──▶  >   <n bytes>  SEND OK
//!   AT+CIPRXGET=2,m              ──▶  +CIPRXGET: 2,k,r  <k bytes>  OK
//!   AT+CIPCLOSE=1                ──▶  CLOSE OK
//! ```

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::parse;
use super::power::ModemPowerController;
use crate::at::AtStatus;
use crate::error::LinkError;
use crate::hal::{Board, SerialPort};

/// Largest payload accepted by one `AT+CIPSEND`.
const MAX_SEND_CHUNK: usize = 1460;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte stream to the server. One connection at a time.
pub trait Bearer {
    fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<(), LinkError>;

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Up to `max` bytes already received. Empty means nothing pending
    /// right now, not end of stream; check [`Bearer::is_open`].
    fn receive(&mut self, max: usize) -> Result<Vec<u8>, LinkError>;

    /// Remote end still connected.
    fn is_open(&mut self) -> bool;

    fn close(&mut self);
}

impl<S: SerialPort, B: Board> Bearer for ModemPowerController<S, B> {
    fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<(), LinkError> {
        if self.socket_open {
            self.close();
        }
        if !self.at().exchange("+CIPRXGET=1", COMMAND_TIMEOUT).is_ok() {
            return Err(LinkError::transport("manual receive mode rejected"));
        }
        let cmd = format!("+CIPSTART=\"TCP\",\"{host}\",{port}");
        let resp = self.at().exchange_until(
            &cmd,
            timeout,
            &["CONNECT OK", "ALREADY CONNECT"],
            &["CONNECT FAIL"],
        );
        match resp.status {
            AtStatus::Ok => {
                debug!(host, port, "socket open");
                self.socket_open = true;
                Ok(())
            }
            AtStatus::Error => Err(LinkError::transport(format!("connect to {host}:{port} refused"))),
            AtStatus::Timeout => Err(LinkError::transport(format!("connect to {host}:{port} timed out"))),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if !self.socket_open {
            return Err(LinkError::transport("send on closed socket"));
        }
        for chunk in data.chunks(MAX_SEND_CHUNK) {
            let at = self.at();
            at.send(&format!("+CIPSEND={}", chunk.len()))?;
            if !at.wait_prompt(COMMAND_TIMEOUT) {
                return Err(LinkError::transport("no send prompt"));
            }
            at.write_raw(chunk)?;
            let resp = at.wait_until(SEND_TIMEOUT, &["SEND OK"], &["SEND FAIL"]);
            if !resp.is_ok() {
                return Err(LinkError::transport(format!("send failed: {:?}", resp.status)));
            }
            trace!(bytes = chunk.len(), "chunk sent");
        }
        Ok(())
    }

    fn receive(&mut self, max: usize) -> Result<Vec<u8>, LinkError> {
        let at = self.at();
        at.send(&format!("+CIPRXGET=2,{max}"))?;
        let deadline = at.clock().deadline(COMMAND_TIMEOUT);
        let mut data = Vec::new();
        while let Some(line) = at.read_line(deadline) {
            if let Some(field) = line.strip_prefix("+CIPRXGET:") {
                let Some((read, _remaining)) = parse::ciprxget_read(field) else {
                    continue;
                };
                data = at
                    .read_exact(read, COMMAND_TIMEOUT)
                    .ok_or_else(|| LinkError::transport("short socket read"))?;
                continue;
            }
            match line.as_str() {
                "OK" => return Ok(data),
                "ERROR" => return Err(LinkError::transport("socket read rejected")),
                _ => trace!(line = %line, "ignored while reading socket"),
            }
        }
        Err(LinkError::transport("socket read timed out"))
    }

    fn is_open(&mut self) -> bool {
        let resp = self
            .at()
            .exchange_until("+CIPSTATUS", COMMAND_TIMEOUT, &["STATE:"], &[]);
        let open = resp.field("STATE:") == Some("CONNECT OK");
        if !open {
            self.socket_open = false;
        }
        open
    }

    fn close(&mut self) {
        let resp = self
            .at()
            .exchange_until("+CIPCLOSE=1", COMMAND_TIMEOUT, &["CLOSE OK"], &[]);
        if !resp.is_ok() {
            warn!(status = ?resp.status, "socket close not confirmed");
        }
        self.socket_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::ModemConfig;
    use crate::sim::{SimBoard, SimModem, SimSerial};

    fn attached() -> (SimModem, ModemPowerController<SimSerial, SimBoard>) {
        let (clock, _mock) = Clock::mock();
        let config = ModemConfig::default();
        let sim = SimModem::new(clock.clone(), config.polarity);
        sim.set_powered(true);
        let mut ctl = ModemPowerController::new(sim.serial(), sim.board(), clock, config);
        ctl.attach_gprs(Duration::from_secs(10)).unwrap();
        (sim, ctl)
    }

    fn drain(ctl: &mut impl Bearer) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let chunk = ctl.receive(64).unwrap();
            if chunk.is_empty() {
                if !ctl.is_open() {
                    return out;
                }
                continue;
            }
            out.extend_from_slice(&chunk);
        }
    }

    #[test]
    fn echo_round_trip_in_small_reads() {
        let (sim, mut ctl) = attached();
        sim.set_server(|req: &[u8]| {
            let mut resp = b"echo:".to_vec();
            resp.extend_from_slice(req);
            resp
        });
        ctl.open("example.net", 80, Duration::from_secs(5)).unwrap();
        let payload = vec![b'x'; 3000];
        ctl.send(&payload).unwrap();
        let got = drain(&mut ctl);
        assert_eq!(&got[..5], b"echo:");
        assert_eq!(got.len(), 3005);
        assert_eq!(sim.requests().len(), 1);
        assert_eq!(sim.requests()[0].len(), 3000);
        assert_eq!(sim.commands().iter().filter(|c| c.starts_with("AT+CIPSEND=")).count(), 3);
        ctl.close();
    }

    #[test]
    fn connect_refused() {
        let (sim, mut ctl) = attached();
        sim.set_connect_refused(true);
        let err = ctl.open("example.net", 80, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, LinkError::HttpTransportFailure(_)));
        assert!(ctl.send(b"x").is_err());
    }

    #[test]
    fn connect_needs_bearer() {
        let (sim, mut ctl) = attached();
        ctl.detach_gprs();
        assert!(ctl.open("example.net", 80, Duration::from_secs(5)).is_err());
        assert!(sim.requests().is_empty());
    }
}
