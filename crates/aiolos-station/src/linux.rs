//! Linux host backends: termios UART, sysfs GPIO and a software watchdog.
//!
//! The host has no interrupt controller to mask and no deep sleep, so
//! those board services reduce to bookkeeping. Pin holds are remembered
//! and honoured by refusing writes to held pins, matching the latch
//! semantics of the microcontroller.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use aiolos_link::hal::{Board, Level, ModemPin, SerialPort};
use anyhow::Context;
use tracing::{debug, error, warn};

// ─── UART ───────────────────────────────────────────────────────────────────

pub struct TtySerial {
    path: PathBuf,
    file: File,
}

fn baud_constant(baud: u32) -> io::Result<libc::speed_t> {
    Ok(match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        460800 => libc::B460800,
        921600 => libc::B921600,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {other}"),
            ))
        }
    })
}

fn open_raw(path: &Path, baud: u32) -> io::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)?;
    let fd = file.as_raw_fd();
    let speed = baud_constant(baud)?;
    // SAFETY: fd is a valid open descriptor owned by `file` for the whole
    // block; termios is fully initialised by tcgetattr before use.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::CRTSCTS);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::tcflush(fd, libc::TCIOFLUSH);
    }
    Ok(file)
}

impl TtySerial {
    pub fn open(path: impl Into<PathBuf>, baud: u32) -> io::Result<Self> {
        let path = path.into();
        let file = open_raw(&path, baud)?;
        debug!(path = %path.display(), baud, "serial port open");
        Ok(TtySerial { path, file })
    }
}

impl SerialPort for TtySerial {
    fn reopen(&mut self, baud: u32) -> io::Result<()> {
        self.file = open_raw(&self.path, baud)?;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            match self.file.write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        self.file.flush()
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.file.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn discard_input(&mut self) {
        // SAFETY: the descriptor stays owned by self.file.
        unsafe {
            libc::tcflush(self.file.as_raw_fd(), libc::TCIFLUSH);
        }
    }
}

// ─── Watchdog ───────────────────────────────────────────────────────────────

struct WatchdogState {
    timeout: Option<Duration>,
    last_feed: Instant,
}

/// Aborts the process when not fed within its timeout, so the service
/// manager restarts it.
#[derive(Clone)]
pub struct SoftWatchdog {
    state: Arc<Mutex<WatchdogState>>,
    stopped: Arc<AtomicBool>,
}

impl SoftWatchdog {
    pub fn start(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let dog = SoftWatchdog {
            state: Arc::new(Mutex::new(WatchdogState {
                timeout,
                last_feed: Instant::now(),
            })),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        let watcher = dog.clone();
        std::thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || watcher.watch())
            .context("spawning watchdog thread")?;
        Ok(dog)
    }

    fn watch(&self) {
        while !self.stopped.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(250));
            let Ok(state) = self.state.lock() else {
                return;
            };
            if let Some(timeout) = state.timeout {
                let starved = state.last_feed.elapsed();
                if starved > timeout {
                    error!(starved_ms = starved.as_millis() as u64, "watchdog expired");
                    std::process::abort();
                }
            }
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    fn with<R>(&self, f: impl FnOnce(&mut WatchdogState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut s| f(&mut s))
    }
}

// ─── GPIO ───────────────────────────────────────────────────────────────────

/// Modem control lines via `/sys/class/gpio`.
pub struct SysfsBoard {
    power_key: PathBuf,
    dtr: PathBuf,
    held: Vec<ModemPin>,
    watchdog: SoftWatchdog,
    irq_depth: u32,
}

fn export(root: &Path, gpio: u32) -> anyhow::Result<PathBuf> {
    let dir = root.join(format!("gpio{gpio}"));
    if !dir.exists() {
        std::fs::write(root.join("export"), gpio.to_string())
            .with_context(|| format!("exporting gpio{gpio}"))?;
    }
    std::fs::write(dir.join("direction"), "out").with_context(|| format!("gpio{gpio} direction"))?;
    Ok(dir.join("value"))
}

impl SysfsBoard {
    pub fn open(power_key_gpio: u32, dtr_gpio: u32, watchdog: SoftWatchdog) -> anyhow::Result<Self> {
        Self::open_at(Path::new("/sys/class/gpio"), power_key_gpio, dtr_gpio, watchdog)
    }

    pub fn open_at(root: &Path, power_key_gpio: u32, dtr_gpio: u32, watchdog: SoftWatchdog) -> anyhow::Result<Self> {
        Ok(SysfsBoard {
            power_key: export(root, power_key_gpio)?,
            dtr: export(root, dtr_gpio)?,
            held: Vec::new(),
            watchdog,
            irq_depth: 0,
        })
    }

    fn value_path(&self, pin: ModemPin) -> &Path {
        match pin {
            ModemPin::PowerKey => &self.power_key,
            ModemPin::Dtr => &self.dtr,
        }
    }
}

impl Board for SysfsBoard {
    fn set_pin(&mut self, pin: ModemPin, level: Level) {
        if self.held.contains(&pin) {
            debug!(?pin, "write to held pin ignored");
            return;
        }
        let value = match level {
            Level::High => "1",
            Level::Low => "0",
        };
        if let Err(e) = std::fs::write(self.value_path(pin), value) {
            warn!(?pin, error = %e, "gpio write failed");
        }
    }

    fn set_pin_hold(&mut self, pin: ModemPin, hold: bool) {
        self.held.retain(|p| *p != pin);
        if hold {
            self.held.push(pin);
        }
    }

    fn woke_from_deep_sleep(&self) -> bool {
        false
    }

    fn watchdog_timeout(&self) -> Option<Duration> {
        self.watchdog.with(|s| s.timeout).flatten()
    }

    fn set_watchdog_timeout(&mut self, timeout: Option<Duration>) {
        self.watchdog.with(|s| {
            s.timeout = timeout;
            s.last_feed = Instant::now();
        });
    }

    fn feed_watchdog(&mut self) {
        self.watchdog.with(|s| s.last_feed = Instant::now());
    }

    fn disable_interrupts(&mut self) {
        self.irq_depth += 1;
    }

    fn enable_interrupts(&mut self) {
        self.irq_depth = self.irq_depth.saturating_sub(1);
    }
}
