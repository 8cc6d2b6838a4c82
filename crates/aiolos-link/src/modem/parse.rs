//! Structured parsers for SIM7000 informational responses.
//!
//! Each takes the text after the `+XXX:` prefix (see
//! [`AtResponse::field`](crate::at::AtResponse::field)) and returns a typed
//! value, or `None` when the line does not have the documented shape.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};

/// `+CPIN: <code>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinState {
    Ready,
    SimPin,
    SimPuk,
    Other(String),
}

pub fn cpin(field: &str) -> PinState {
    match field.trim() {
        "READY" => PinState::Ready,
        "SIM PIN" => PinState::SimPin,
        "SIM PUK" => PinState::SimPuk,
        other => PinState::Other(other.to_string()),
    }
}

fn ints(field: &str) -> impl Iterator<Item = Option<i32>> + '_ {
    field.split(',').map(|p| p.trim().parse().ok())
}

/// `+CSQ: <rssi>,<ber>`
pub fn csq(field: &str) -> Option<(i32, i32)> {
    let mut it = ints(field);
    let rssi = it.next()??;
    let ber = it.next()??;
    Some((rssi, ber))
}

/// Convert a raw CSQ value to dBm; 99 means unknown.
pub fn csq_to_dbm(rssi: i32) -> Option<i32> {
    match rssi {
        0..=31 => Some(-113 + 2 * rssi),
        _ => None,
    }
}

/// Registration status from `+CREG`, `+CGREG` or `+CEREG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegStatus(pub u8);

impl RegStatus {
    /// 1 is home network, 5 is roaming.
    pub fn is_registered(self) -> bool {
        matches!(self.0, 1 | 5)
    }
}

/// `<n>,<stat>[,...]` from a query, or a bare `<stat>` from an unsolicited
/// report.
pub fn registration(field: &str) -> Option<RegStatus> {
    let parts: Vec<&str> = field.split(',').map(str::trim).collect();
    let stat = match parts.len() {
        0 => return None,
        1 => parts[0],
        _ => parts[1],
    };
    stat.parse().ok().map(RegStatus)
}

/// `+CGATT: <0|1>`
pub fn cgatt(field: &str) -> Option<bool> {
    match field.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// `+CIPRXGET: 2,<read>,<remaining>` header of a manual-mode read.
pub fn ciprxget_read(field: &str) -> Option<(usize, usize)> {
    let mut it = field.split(',').map(str::trim);
    if it.next()? != "2" {
        return None;
    }
    let read = it.next()?.parse().ok()?;
    let remaining = it.next()?.parse().ok()?;
    Some((read, remaining))
}

/// `+CCLK: "yy/MM/dd,hh:mm:ss±zz"`, `zz` in quarter hours.
pub fn cclk(field: &str) -> Option<DateTime<FixedOffset>> {
    let s = field.trim().trim_matches('"');
    let (date, rest) = s.split_once(',')?;
    if rest.len() < 9 {
        return None;
    }
    let (time, tz) = rest.split_at(8);

    let mut d = date.split('/').map(|p| p.parse::<u32>().ok());
    let (yy, mo, dd) = (d.next()??, d.next()??, d.next()??);
    let mut t = time.split(':').map(|p| p.parse::<u32>().ok());
    let (hh, mi, ss) = (t.next()??, t.next()??, t.next()??);

    let quarters: i32 = tz.parse().ok()?;
    let offset = FixedOffset::east_opt(quarters * 15 * 60)?;
    let naive = NaiveDate::from_ymd_opt(2000 + yy as i32, mo, dd)?.and_hms_opt(hh, mi, ss)?;
    offset.from_local_datetime(&naive).single()
}

/// `+CSMINS: <n>,<inserted>`; returns `inserted`.
pub fn csmins(field: &str) -> Option<u8> {
    let mut it = field.split(',').map(str::trim);
    let _n = it.next()?;
    it.next()?.parse().ok()
}

/// `+COPS: <mode>[,<format>,"<oper>"[,<act>]]`
pub fn cops(field: &str) -> Option<String> {
    let name = field.split(',').nth(2)?.trim().trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}
