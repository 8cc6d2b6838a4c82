//! # SIM7000 Simulator
//!
//! A deterministic software modem behind the [`SerialPort`] and [`Board`]
//! traits, sharing one [`Clock`] with the code under test. Used by unit and
//! integration tests and by the station's `--simulate` mode.
//!
//! Modelled behaviour:
//!
//! - power key: a press of at least one second toggles power; boot takes
//!   five seconds during which commands are dropped
//! - sleep: `AT+CSCLK=1` with DTR at its sleep level silences the UART
//! - SIM variants, radio coverage, packet attach and a single TCP socket
//!   whose response is produced by a handler closure on first read
//! - logs of every command, pin write and watchdog change for assertions
//!
//! Echo is off (`ATE0`), as on a configured modem.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use quanta::Instant;

use crate::clock::Clock;
use crate::hal::{Board, Level, ModemPin, PinPolarity, SerialPort};

const BOOT_TIME: Duration = Duration::from_secs(5);
const TOGGLE_PRESS: Duration = Duration::from_secs(1);
const LOCAL_IP: &str = "10.64.12.7";
const CCID: &str = "89882280000012345678";
const IMEI: &str = "869951031234567";
/// UTC+2 in the modem's quarter-hour notation.
const TZ_QUARTERS: i32 = 8;

/// How the inserted card answers the three SIM queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCard {
    /// `+CPIN: READY`
    Ready,
    /// `+CPIN: SIM PIN`
    Locked,
    /// Nothing answers.
    Absent,
    /// PIN query errors, card ID answers.
    CcidOnly,
    /// Only `AT+CSMINS?` reports the card.
    VendorOnly,
}

/// One GPIO write as seen by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    pub at: Instant,
    pub pin: ModemPin,
    pub level: Level,
    pub irq_masked: bool,
}

type ServerHandler = Box<dyn FnMut(&[u8]) -> Vec<u8>>;

struct Socket {
    request: Vec<u8>,
    response: Option<VecDeque<u8>>,
}

struct SimState {
    clock: Clock,
    started: Instant,
    polarity: PinPolarity,
    network_epoch: NaiveDateTime,

    powered: bool,
    boot_until: Option<Instant>,
    key_pressed_at: Option<Instant>,
    power_key: Level,
    dtr: Level,
    held: Vec<ModemPin>,

    unresponsive: bool,
    card: SimCard,
    coverage: bool,
    rf_on: bool,
    sleep_enabled: bool,
    attached: bool,
    ip_up: bool,
    connect_refused: bool,
    keep_open: bool,
    socket: Option<Socket>,
    server: Option<ServerHandler>,
    requests: Vec<Vec<u8>>,

    line: Vec<u8>,
    /// A command just ended on CR; a following LF belongs to it.
    after_cr: bool,
    send_remaining: Option<usize>,
    send_buf: Vec<u8>,
    rx: VecDeque<u8>,
    reopens: u32,

    woke_from_deep_sleep: bool,
    watchdog: Option<Duration>,
    watchdog_history: Vec<Option<Duration>>,
    watchdog_feeds: u32,
    irq_depth: i32,

    commands: Vec<(Instant, String)>,
    pin_events: Vec<PinEvent>,
}

impl SimState {
    fn now(&self) -> Instant {
        self.clock.now()
    }

    fn booted(&self) -> bool {
        self.boot_until.map_or(true, |t| self.now() >= t)
    }

    fn asleep(&self) -> bool {
        self.sleep_enabled && self.dtr == self.polarity.dtr_sleep
    }

    fn awake(&self) -> bool {
        self.powered && self.booted() && !self.asleep() && !self.unresponsive
    }

    fn sim_usable(&self) -> bool {
        !matches!(self.card, SimCard::Absent | SimCard::Locked)
    }

    fn registered(&self) -> bool {
        self.coverage && self.rf_on && self.sim_usable()
    }

    fn reset_session(&mut self) {
        self.rf_on = true;
        self.sleep_enabled = false;
        self.attached = false;
        self.ip_up = false;
        self.drop_socket();
        self.send_remaining = None;
        self.send_buf.clear();
    }

    fn power_up(&mut self) {
        self.powered = true;
        self.boot_until = Some(self.now() + BOOT_TIME);
        self.reset_session();
    }

    fn power_down(&mut self) {
        self.powered = false;
        self.boot_until = None;
        self.reset_session();
    }

    fn drop_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            if socket.response.is_none() && !socket.request.is_empty() {
                self.requests.push(socket.request);
            }
        }
    }

    // ─── Output ─────────────────────────────────────────────────────────

    fn emit(&mut self, line: &str) {
        self.rx.extend(b"\r\n");
        self.rx.extend(line.as_bytes());
        self.rx.extend(b"\r\n");
    }

    fn ok(&mut self) {
        self.emit("OK");
    }

    fn error(&mut self) {
        self.emit("ERROR");
    }

    fn reply(&mut self, line: &str) {
        self.emit(line);
        self.ok();
    }

    // ─── Input ──────────────────────────────────────────────────────────

    fn feed(&mut self, data: &[u8]) {
        for &b in data {
            if std::mem::take(&mut self.after_cr) && b == b'\n' {
                continue;
            }
            if let Some(remaining) = self.send_remaining {
                self.send_buf.push(b);
                if self.send_buf.len() == remaining {
                    self.finish_send();
                }
                continue;
            }
            match b {
                b'\r' | b'\n' => {
                    self.after_cr = b == b'\r';
                    if !self.line.is_empty() {
                        let cmd = String::from_utf8_lossy(&self.line).into_owned();
                        self.line.clear();
                        self.command(cmd);
                    }
                }
                _ => self.line.push(b),
            }
        }
    }

    fn finish_send(&mut self) {
        self.send_remaining = None;
        let data = std::mem::take(&mut self.send_buf);
        match self.socket.as_mut() {
            Some(socket) => {
                socket.request.extend_from_slice(&data);
                self.emit("SEND OK");
            }
            None => self.emit("SEND FAIL"),
        }
    }

    fn command(&mut self, cmd: String) {
        let now = self.now();
        self.commands.push((now, cmd.clone()));
        if !self.awake() {
            return;
        }
        let Some(body) = cmd.strip_prefix("AT") else {
            self.error();
            return;
        };

        match body {
            "" | "+CIPRXGET=1" => self.ok(),
            "I" => self.reply("SIM7000G R1529"),
            "+GSN" => self.reply(IMEI),
            "+CFUN=0" => {
                self.rf_on = false;
                self.attached = false;
                self.ip_up = false;
                self.drop_socket();
                self.ok();
            }
            "+CFUN=1" => {
                self.rf_on = true;
                self.ok();
            }
            "+CFUN=1,1" => {
                self.ok();
                self.boot_until = Some(now + BOOT_TIME);
                self.reset_session();
            }
            "+CPOWD=1" => {
                self.emit("NORMAL POWER DOWN");
                self.power_down();
            }
            "+CPIN?" => match self.card {
                SimCard::Ready => self.reply("+CPIN: READY"),
                SimCard::Locked => self.reply("+CPIN: SIM PIN"),
                _ => self.emit("+CME ERROR: 10"),
            },
            "+CCID" => match self.card {
                SimCard::Ready | SimCard::Locked | SimCard::CcidOnly => self.reply(CCID),
                _ => self.error(),
            },
            "+CSMINS?" => {
                let inserted = u8::from(self.card != SimCard::Absent);
                self.reply(&format!("+CSMINS: 0,{inserted}"));
            }
            "+CSQ" => {
                let rssi = if self.registered() { 18 } else { 99 };
                self.reply(&format!("+CSQ: {rssi},99"));
            }
            "+CREG?" | "+CGREG?" | "+CEREG?" => {
                let prefix = &body[..body.len() - 1];
                let stat = if self.registered() { 1 } else { 2 };
                self.reply(&format!("{prefix}: 0,{stat}"));
            }
            "+COPS?" => {
                if self.registered() {
                    self.reply("+COPS: 0,0,\"Aiolos Mobile\",7");
                } else {
                    self.reply("+COPS: 0");
                }
            }
            "+CGATT?" => {
                let attached = u8::from(self.attached);
                self.reply(&format!("+CGATT: {attached}"));
            }
            "+CGATT=1" => {
                if self.registered() {
                    self.attached = true;
                    self.ok();
                } else {
                    self.error();
                }
            }
            "+CGATT=0" => {
                self.attached = false;
                self.ip_up = false;
                self.drop_socket();
                self.ok();
            }
            "+CIICR" => {
                if self.attached && self.registered() {
                    self.ip_up = true;
                    self.ok();
                } else {
                    self.error();
                }
            }
            "+CIFSREX" => {
                if self.ip_up {
                    self.reply(&format!("+CIFSREX: {LOCAL_IP}"));
                } else {
                    self.error();
                }
            }
            "+CIPSHUT" => {
                self.ip_up = false;
                self.drop_socket();
                self.emit("SHUT OK");
            }
            "+CIPSTATUS" => {
                self.ok();
                let state = self.socket_state();
                self.emit(&format!("STATE: {state}"));
            }
            "+CIPCLOSE=1" => {
                if self.socket.is_some() {
                    self.drop_socket();
                    self.emit("CLOSE OK");
                } else {
                    self.error();
                }
            }
            "+CCLK?" => {
                let stamp = self.network_time();
                self.reply(&format!("+CCLK: \"{stamp}\""));
            }
            _ => self.parameterised(body),
        }
    }

    fn parameterised(&mut self, body: &str) {
        if ["+CGDCONT=", "+CSTT=", "+CBAND=", "+CNMP=", "+CMNB="]
            .iter()
            .any(|p| body.starts_with(p))
        {
            self.ok();
        } else if let Some(mode) = body.strip_prefix("+CSCLK=") {
            self.sleep_enabled = mode == "1";
            self.ok();
        } else if body.starts_with("+CIPSTART=") {
            if !self.ip_up {
                self.error();
                return;
            }
            self.ok();
            if self.connect_refused {
                self.emit("CONNECT FAIL");
            } else {
                self.drop_socket();
                self.socket = Some(Socket {
                    request: Vec::new(),
                    response: None,
                });
                self.emit("CONNECT OK");
            }
        } else if let Some(n) = body.strip_prefix("+CIPSEND=") {
            match (n.parse::<usize>(), self.socket.is_some()) {
                (Ok(n), true) if n > 0 => {
                    self.rx.extend(b"\r\n> ");
                    self.send_remaining = Some(n);
                }
                _ => self.error(),
            }
        } else if let Some(n) = body.strip_prefix("+CIPRXGET=2,") {
            match n.parse::<usize>() {
                Ok(max) => self.socket_read(max),
                Err(_) => self.error(),
            }
        } else {
            self.error();
        }
    }

    fn respond_if_needed(&mut self) {
        let st = self;
        if let Some(socket) = st.socket.as_mut() {
            if socket.response.is_none() {
                let body = match st.server.as_mut() {
                    Some(handler) => handler(&socket.request),
                    None => Vec::new(),
                };
                st.requests.push(socket.request.clone());
                socket.response = Some(body.into());
            }
        }
    }

    fn socket_read(&mut self, max: usize) {
        if self.socket.is_none() {
            self.error();
            return;
        }
        self.respond_if_needed();
        let mut chunk = Vec::new();
        let mut remaining = 0;
        if let Some(response) = self.socket.as_mut().and_then(|s| s.response.as_mut()) {
            let n = max.min(response.len());
            chunk.extend(response.drain(..n));
            remaining = response.len();
        }
        self.emit(&format!("+CIPRXGET: 2,{},{remaining}", chunk.len()));
        self.rx.extend(chunk);
        self.ok();
    }

    fn socket_state(&self) -> &'static str {
        match &self.socket {
            Some(Socket {
                response: Some(r), ..
            }) if r.is_empty() && !self.keep_open => "CLOSED",
            Some(_) => "CONNECT OK",
            None if self.ip_up => "IP STATUS",
            None => "IP INITIAL",
        }
    }

    fn network_time(&self) -> String {
        let elapsed = self.now().saturating_duration_since(self.started);
        let t = self.network_epoch + chrono::Duration::milliseconds(elapsed.as_millis() as i64);
        format!("{}{:+03}", t.format("%y/%m/%d,%H:%M:%S"), TZ_QUARTERS)
    }

    // ─── Lines ──────────────────────────────────────────────────────────

    fn set_pin(&mut self, pin: ModemPin, level: Level) {
        let now = self.now();
        self.pin_events.push(PinEvent {
            at: now,
            pin,
            level,
            irq_masked: self.irq_depth > 0,
        });
        if self.held.contains(&pin) {
            return;
        }
        match pin {
            ModemPin::Dtr => self.dtr = level,
            ModemPin::PowerKey => {
                self.power_key = level;
                if level == self.polarity.power_key_active {
                    self.key_pressed_at = Some(now);
                } else if let Some(pressed) = self.key_pressed_at.take() {
                    if now.saturating_duration_since(pressed) >= TOGGLE_PRESS {
                        if self.powered {
                            self.power_down();
                        } else {
                            self.power_up();
                        }
                    }
                }
            }
        }
    }
}

/// Handle to a simulated modem. Clones of the serial and board views share
/// the same state.
#[derive(Clone)]
pub struct SimModem {
    state: Rc<RefCell<SimState>>,
}

impl SimModem {
    /// A powered-off modem with a ready SIM under coverage.
    pub fn new(clock: Clock, polarity: PinPolarity) -> Self {
        let started = clock.now();
        let network_epoch = NaiveDate::from_ymd_opt(2024, 5, 17)
            .and_then(|d| d.and_hms_opt(14, 3, 22))
            .unwrap_or_default();
        let state = SimState {
            clock,
            started,
            polarity,
            network_epoch,
            powered: false,
            boot_until: None,
            key_pressed_at: None,
            power_key: polarity.power_key_idle(),
            dtr: polarity.dtr_awake(),
            held: Vec::new(),
            unresponsive: false,
            card: SimCard::Ready,
            coverage: true,
            rf_on: true,
            sleep_enabled: false,
            attached: false,
            ip_up: false,
            connect_refused: false,
            keep_open: false,
            socket: None,
            server: None,
            requests: Vec::new(),
            line: Vec::new(),
            after_cr: false,
            send_remaining: None,
            send_buf: Vec::new(),
            rx: VecDeque::new(),
            reopens: 0,
            woke_from_deep_sleep: false,
            watchdog: None,
            watchdog_history: Vec::new(),
            watchdog_feeds: 0,
            irq_depth: 0,
            commands: Vec::new(),
            pin_events: Vec::new(),
        };
        SimModem {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn serial(&self) -> SimSerial {
        SimSerial {
            state: self.state.clone(),
        }
    }

    pub fn board(&self) -> SimBoard {
        SimBoard {
            state: self.state.clone(),
        }
    }

    // ─── Knobs ──────────────────────────────────────────────────────────

    /// Switch power directly; a modem powered this way is already booted.
    pub fn set_powered(&self, on: bool) {
        let mut st = self.state.borrow_mut();
        if on {
            st.power_up();
            st.boot_until = None;
        } else {
            st.power_down();
        }
    }

    /// Modem ignores every command while set.
    pub fn set_unresponsive(&self, stuck: bool) {
        self.state.borrow_mut().unresponsive = stuck;
    }

    pub fn set_sim_card(&self, card: SimCard) {
        self.state.borrow_mut().card = card;
    }

    pub fn set_coverage(&self, coverage: bool) {
        let mut st = self.state.borrow_mut();
        st.coverage = coverage;
        if !coverage {
            st.attached = false;
            st.ip_up = false;
            st.drop_socket();
        }
    }

    pub fn set_connect_refused(&self, refused: bool) {
        self.state.borrow_mut().connect_refused = refused;
    }

    /// Keep the socket open after the response is drained, so a reader
    /// that waits for the remote close stalls instead.
    pub fn set_keep_open(&self, keep_open: bool) {
        self.state.borrow_mut().keep_open = keep_open;
    }

    /// Server behind every TCP connection: request bytes in, response out.
    pub fn set_server(&self, handler: impl FnMut(&[u8]) -> Vec<u8> + 'static) {
        self.state.borrow_mut().server = Some(Box::new(handler));
    }

    pub fn set_woke_from_deep_sleep(&self, woke: bool) {
        self.state.borrow_mut().woke_from_deep_sleep = woke;
    }

    /// Initial watchdog deadline, not recorded in the history.
    pub fn set_watchdog(&self, timeout: Option<Duration>) {
        self.state.borrow_mut().watchdog = timeout;
    }

    // ─── Observations ───────────────────────────────────────────────────

    pub fn is_powered(&self) -> bool {
        self.state.borrow().powered
    }

    pub fn is_sleeping(&self) -> bool {
        let st = self.state.borrow();
        st.powered && st.asleep()
    }

    pub fn is_registered(&self) -> bool {
        let st = self.state.borrow();
        st.powered && st.registered()
    }

    pub fn is_attached(&self) -> bool {
        self.state.borrow().attached
    }

    pub fn pin_level(&self, pin: ModemPin) -> Level {
        let st = self.state.borrow();
        match pin {
            ModemPin::PowerKey => st.power_key,
            ModemPin::Dtr => st.dtr,
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.state
            .borrow()
            .commands
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn command_log(&self) -> Vec<(Instant, String)> {
        self.state.borrow().commands.clone()
    }

    pub fn clear_logs(&self) {
        let mut st = self.state.borrow_mut();
        st.commands.clear();
        st.pin_events.clear();
        st.watchdog_history.clear();
    }

    pub fn pin_events(&self) -> Vec<PinEvent> {
        self.state.borrow().pin_events.clone()
    }

    pub fn held_pins(&self) -> Vec<ModemPin> {
        self.state.borrow().held.clone()
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.state.borrow().requests.clone()
    }

    pub fn reopen_count(&self) -> u32 {
        self.state.borrow().reopens
    }

    pub fn watchdog_timeout(&self) -> Option<Duration> {
        self.state.borrow().watchdog
    }

    pub fn watchdog_history(&self) -> Vec<Option<Duration>> {
        self.state.borrow().watchdog_history.clone()
    }

    pub fn watchdog_feeds(&self) -> u32 {
        self.state.borrow().watchdog_feeds
    }

    pub fn irq_depth(&self) -> i32 {
        self.state.borrow().irq_depth
    }
}

/// UART view of a [`SimModem`].
pub struct SimSerial {
    state: Rc<RefCell<SimState>>,
}

impl SerialPort for SimSerial {
    fn reopen(&mut self, _baud: u32) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.reopens += 1;
        st.line.clear();
        st.after_cr = false;
        st.rx.clear();
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.state.borrow_mut().feed(data);
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.state.borrow_mut().rx.pop_front())
    }

    fn discard_input(&mut self) {
        self.state.borrow_mut().rx.clear();
    }
}

/// GPIO, watchdog and interrupt view of a [`SimModem`].
pub struct SimBoard {
    state: Rc<RefCell<SimState>>,
}

impl Board for SimBoard {
    fn set_pin(&mut self, pin: ModemPin, level: Level) {
        self.state.borrow_mut().set_pin(pin, level);
    }

    fn set_pin_hold(&mut self, pin: ModemPin, hold: bool) {
        let mut st = self.state.borrow_mut();
        st.held.retain(|p| *p != pin);
        if hold {
            st.held.push(pin);
        }
    }

    fn woke_from_deep_sleep(&self) -> bool {
        self.state.borrow().woke_from_deep_sleep
    }

    fn watchdog_timeout(&self) -> Option<Duration> {
        self.state.borrow().watchdog
    }

    fn set_watchdog_timeout(&mut self, timeout: Option<Duration>) {
        let mut st = self.state.borrow_mut();
        st.watchdog = timeout;
        st.watchdog_history.push(timeout);
    }

    fn feed_watchdog(&mut self) {
        self.state.borrow_mut().watchdog_feeds += 1;
    }

    fn disable_interrupts(&mut self) {
        self.state.borrow_mut().irq_depth += 1;
    }

    fn enable_interrupts(&mut self) {
        self.state.borrow_mut().irq_depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::BoardRevision;

    fn modem() -> (Clock, SimModem, SimSerial, SimBoard) {
        let (clock, _mock) = Clock::mock();
        let sim = SimModem::new(clock.clone(), BoardRevision::Standard.polarity());
        let serial = sim.serial();
        let board = sim.board();
        (clock, sim, serial, board)
    }

    fn drain(serial: &mut SimSerial) -> String {
        let mut out = Vec::new();
        while let Ok(Some(b)) = serial.read_byte() {
            out.push(b);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn long_press_boots_after_delay() {
        let (clock, sim, mut serial, mut board) = modem();
        board.set_pin(ModemPin::PowerKey, Level::High);
        clock.sleep(Duration::from_millis(1500));
        board.set_pin(ModemPin::PowerKey, Level::Low);
        assert!(sim.is_powered());

        serial.write_all(b"AT\r\n").unwrap();
        assert_eq!(drain(&mut serial), "");
        clock.sleep(BOOT_TIME);
        serial.write_all(b"AT\r\n").unwrap();
        assert_eq!(drain(&mut serial), "\r\nOK\r\n");
    }

    #[test]
    fn short_press_is_ignored() {
        let (clock, sim, _serial, mut board) = modem();
        board.set_pin(ModemPin::PowerKey, Level::High);
        clock.sleep(Duration::from_millis(100));
        board.set_pin(ModemPin::PowerKey, Level::Low);
        assert!(!sim.is_powered());
    }

    #[test]
    fn csclk_with_dtr_sleeps() {
        let (_clock, sim, mut serial, mut board) = modem();
        sim.set_powered(true);
        board.set_pin(ModemPin::Dtr, Level::High);
        serial.write_all(b"AT+CSCLK=1\r\n").unwrap();
        assert_eq!(drain(&mut serial), "\r\nOK\r\n");
        assert!(sim.is_sleeping());
        serial.write_all(b"AT\r\n").unwrap();
        assert_eq!(drain(&mut serial), "");
        board.set_pin(ModemPin::Dtr, Level::Low);
        assert!(!sim.is_sleeping());
    }

    #[test]
    fn held_pin_ignores_writes() {
        let (_clock, sim, _serial, mut board) = modem();
        board.set_pin(ModemPin::Dtr, Level::High);
        board.set_pin_hold(ModemPin::Dtr, true);
        board.set_pin(ModemPin::Dtr, Level::Low);
        assert_eq!(sim.pin_level(ModemPin::Dtr), Level::High);
    }

    #[test]
    fn socket_serves_handler_response_in_chunks() {
        let (_clock, sim, mut serial, _board) = modem();
        sim.set_powered(true);
        sim.set_server(|_req: &[u8]| b"hello world".to_vec());
        for cmd in ["AT+CGATT=1", "AT+CIICR", "AT+CIPSTART=\"TCP\",\"h\",80"] {
            serial.write_all(format!("{cmd}\r\n").as_bytes()).unwrap();
        }
        drain(&mut serial);
        serial.write_all(b"AT+CIPSEND=2\r\n").unwrap();
        assert_eq!(drain(&mut serial), "\r\n> ");
        serial.write_all(b"hi").unwrap();
        assert_eq!(drain(&mut serial), "\r\nSEND OK\r\n");

        serial.write_all(b"AT+CIPRXGET=2,5\r\n").unwrap();
        assert_eq!(drain(&mut serial), "\r\n+CIPRXGET: 2,5,6\r\nhello\r\nOK\r\n");
        assert_eq!(sim.requests(), vec![b"hi".to_vec()]);
        serial.write_all(b"AT+CIPRXGET=2,64\r\n").unwrap();
        drain(&mut serial);
        serial.write_all(b"AT+CIPSTATUS\r\n").unwrap();
        assert!(drain(&mut serial).contains("STATE: CLOSED"));
    }

    #[test]
    fn crlf_after_send_command_is_not_payload() {
        let (_clock, sim, mut serial, _board) = modem();
        sim.set_powered(true);
        sim.set_server(|_req: &[u8]| b"ok".to_vec());
        for cmd in ["AT+CGATT=1", "AT+CIICR", "AT+CIPSTART=\"TCP\",\"h\",80"] {
            serial.write_all(format!("{cmd}\r\n").as_bytes()).unwrap();
        }
        drain(&mut serial);

        serial.write_all(b"AT+CIPSEND=7\r\n").unwrap();
        assert_eq!(drain(&mut serial), "\r\n> ");
        serial.write_all(b"{\"v\":1}").unwrap();
        assert_eq!(drain(&mut serial), "\r\nSEND OK\r\n");

        serial.write_all(b"AT+CIPRXGET=2,64\r\n").unwrap();
        assert_eq!(drain(&mut serial), "\r\n+CIPRXGET: 2,2,0\r\nok\r\nOK\r\n");
        assert_eq!(sim.requests(), vec![b"{\"v\":1}".to_vec()]);
        assert_eq!(sim.commands().last().map(String::as_str), Some("AT+CIPRXGET=2,64"));
    }

    #[test]
    fn network_time_follows_the_clock() {
        let (clock, sim, mut serial, _board) = modem();
        sim.set_powered(true);
        clock.sleep(Duration::from_secs(60));
        serial.write_all(b"AT+CCLK?\r\n").unwrap();
        assert!(drain(&mut serial).contains("+CCLK: \"24/05/17,14:04:22+08\""));
    }
}
