//! # Command Dialect
//!
//! The fixed command vocabulary spoken to the module and the parsers for its
//! structured replies. Every reply parser takes the cleaned reply lines (echo
//! stripped, see [`crate::channel`]) and returns `None` when the expected field
//! is missing or malformed, so callers can keep the previous value.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const PING: &str = "AT";
pub const ECHO_OFF: &str = "ATE0";
pub const SIM_STATUS: &str = "AT+CPIN?";
pub const SIGNAL_QUALITY: &str = "AT+CSQ";
pub const OPERATOR: &str = "AT+COPS?";
pub const REGISTRATION: &str = "AT+CREG?";
pub const PACKET_REGISTRATION: &str = "AT+CGREG?";
pub const ATTACHMENT: &str = "AT+CGATT?";
pub const CONTEXT_STATE: &str = "AT+QIACT?";

/// Identity queries issued during module configuration.
pub const IDENTITY_QUERIES: &[(&str, IdentityField)] = &[
    ("ATI", IdentityField::Identification),
    ("AT+CGMI", IdentityField::Manufacturer),
    ("AT+CGMM", IdentityField::Model),
    ("AT+CGMR", IdentityField::Revision),
    ("AT+CGSN", IdentityField::Imei),
];

/// Network survey queries, logged only.
pub const SURVEY_QUERIES: &[(&str, &str)] = &[
    (SIM_STATUS, "sim"),
    (OPERATOR, "operator"),
    (PACKET_REGISTRATION, "packet registration"),
];

/// `AT+QICSGP=<ctx>,1,"<apn>","<user>","<pass>",<auth>`
pub fn set_apn(context: u8, apn: &str, user: &str, password: &str, auth: u8) -> String {
    format!("AT+QICSGP={context},1,\"{apn}\",\"{user}\",\"{password}\",{auth}")
}

pub fn activate_context(context: u8) -> String {
    format!("AT+QIACT={context}")
}

pub fn deactivate_context(context: u8) -> String {
    format!("AT+QIDEACT={context}")
}

/// `AT+QIOPEN=<ctx>,<conn>,"TCP","<host>",<port>`
pub fn open_connection(context: u8, connection: u8, protocol: &str, host: &str, port: u16) -> String {
    format!("AT+QIOPEN={context},{connection},\"{protocol}\",\"{host}\",{port}")
}

pub fn close_connection(connection: u8) -> String {
    format!("AT+QICLOSE={connection}")
}

/// Announce `len` payload bytes; the module answers with a `>` prompt.
pub fn send_data(connection: u8, len: usize) -> String {
    format!("AT+QISEND={connection},{len}")
}

/// Query the byte counters of a connection.
pub fn send_status(connection: u8) -> String {
    format!("AT+QISEND={connection},0")
}

/// `AT+QISTATE=1,<conn>` — query one connection by id.
pub fn connection_state(connection: u8) -> String {
    format!("AT+QISTATE=1,{connection}")
}

// ─── Reply Helpers ──────────────────────────────────────────────────────────

/// Body of the first line starting with `prefix` (e.g. `"+CSQ:"`), trimmed.
pub fn field<'a>(lines: &'a [String], prefix: &str) -> Option<&'a str> {
    lines
        .iter()
        .find_map(|l| l.strip_prefix(prefix))
        .map(str::trim)
}

fn numbers(body: &str) -> Vec<Option<i64>> {
    body.split(',')
        .map(|p| p.trim().trim_matches('"').parse::<i64>().ok())
        .collect()
}

// ─── Signal Quality ─────────────────────────────────────────────────────────

/// Signal level value meaning "not known or not detectable".
pub const UNKNOWN: u8 = 99;

/// `+CSQ: <rssi>,<ber>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalReading {
    /// 0–31, or 99 when unknown.
    pub level: u8,
    /// 0–99, 99 when unknown.
    pub bit_error: u8,
}

pub fn parse_signal_quality(lines: &[String]) -> Option<SignalReading> {
    let body = field(lines, "+CSQ:")?;
    let parts = numbers(body);
    let level = parts.first().copied().flatten()?;
    let bit_error = parts.get(1).copied().flatten().unwrap_or(UNKNOWN as i64);
    let level_ok = (0..=31).contains(&level) || level == UNKNOWN as i64;
    if !level_ok || !(0..=99).contains(&bit_error) {
        return None;
    }
    Some(SignalReading {
        level: level as u8,
        bit_error: bit_error as u8,
    })
}

// ─── Registration ───────────────────────────────────────────────────────────

/// Circuit-domain registration status (`+CREG: <n>,<stat>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    NotRegistered,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl Registration {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => Registration::NotRegistered,
            1 => Registration::Home,
            2 => Registration::Searching,
            3 => Registration::Denied,
            4 => Registration::Unknown,
            5 => Registration::Roaming,
            _ => return None,
        })
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Registration::Home | Registration::Roaming)
    }

    /// Explicitly not registered (as opposed to unknown).
    pub fn is_unregistered(self) -> bool {
        matches!(
            self,
            Registration::NotRegistered | Registration::Searching | Registration::Denied
        )
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Registration::NotRegistered => "not registered",
            Registration::Home => "registered (home)",
            Registration::Searching => "searching",
            Registration::Denied => "registration denied",
            Registration::Unknown => "unknown",
            Registration::Roaming => "registered (roaming)",
        };
        f.write_str(s)
    }
}

pub fn parse_registration(lines: &[String]) -> Option<Registration> {
    parse_stat(field(lines, "+CREG:")?)
}

pub fn parse_packet_registration(lines: &[String]) -> Option<Registration> {
    parse_stat(field(lines, "+CGREG:")?)
}

fn parse_stat(body: &str) -> Option<Registration> {
    let parts = numbers(body);
    if parts.len() < 2 {
        return None;
    }
    Registration::from_code(parts[1]?)
}

// ─── Attachment ─────────────────────────────────────────────────────────────

/// `+CGATT: <0|1>`
pub fn parse_attachment(lines: &[String]) -> Option<bool> {
    match numbers(field(lines, "+CGATT:")?).first().copied().flatten()? {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

// ─── Data Context ───────────────────────────────────────────────────────────

/// Whether `+QIACT: <ctx>,<state>,...` lists `context` as activated.
///
/// A reply without any `+QIACT:` line means no context is active.
pub fn parse_context_active(lines: &[String], context: u8) -> bool {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("+QIACT:"))
        .map(numbers)
        .any(|parts| {
            parts.first().copied().flatten() == Some(context as i64)
                && parts.get(1).copied().flatten() == Some(1)
        })
}

// ─── Logical Connection ─────────────────────────────────────────────────────

/// Result code of `+QIOPEN: <conn>,<err>`; 0 means connected.
pub fn parse_open_result(lines: &[String], connection: u8) -> Option<i64> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("+QIOPEN:"))
        .map(numbers)
        .find(|parts| parts.first().copied().flatten() == Some(connection as i64))
        .and_then(|parts| parts.get(1).copied().flatten())
}

/// Socket state reported by `+QISTATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Initial,
    Opening,
    Connected,
    Listening,
    Closing,
}

/// `+QISTATE: <conn>,"TCP","<host>",<port>,<local>,<state>,...`
pub fn parse_connection_state(lines: &[String], connection: u8) -> Option<SocketState> {
    let line = lines
        .iter()
        .filter_map(|l| l.strip_prefix("+QISTATE:"))
        .find(|body| {
            body.split(',').next().and_then(|c| c.trim().parse::<u8>().ok()) == Some(connection)
        })?;
    let state = line.split(',').nth(5)?.trim().parse::<u8>().ok()?;
    Some(match state {
        0 => SocketState::Initial,
        1 => SocketState::Opening,
        2 => SocketState::Connected,
        3 => SocketState::Listening,
        4 => SocketState::Closing,
        _ => return None,
    })
}

/// `+QISEND: <total>,<acked>,<unacked>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendCounters {
    pub total: u64,
    pub acked: u64,
    pub unacked: u64,
}

pub fn parse_send_counters(lines: &[String]) -> Option<SendCounters> {
    let parts = numbers(field(lines, "+QISEND:")?);
    let get = |i: usize| parts.get(i).copied().flatten().and_then(|v| u64::try_from(v).ok());
    Some(SendCounters {
        total: get(0)?,
        acked: get(1)?,
        unacked: get(2)?,
    })
}

// ─── Identity ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Identification,
    Manufacturer,
    Model,
    Revision,
    Imei,
}

/// First informational line of an identity reply.
pub fn parse_identity(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty() && *l != "OK" && *l != "ERROR")
        .map(|l| l.strip_prefix("+CGSN:").map(str::trim).unwrap_or(l).to_string())
}
