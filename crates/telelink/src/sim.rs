//! # Modem Simulator
//!
//! In-process stand-in for an EC800-class module speaking the command
//! dialect over a byte transport. Behaviour is scripted through [`SimModem`]
//! and every received command and delivered payload is recorded for
//! assertions. Used by the test suites and the agent's `--simulate` mode.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::channel::{Connector, Transport};

/// Marker appended to the command log when the transport is closed.
pub const TRANSPORT_CLOSED: &str = "<transport closed>";

#[derive(Debug)]
struct SimState {
    open: bool,
    echo: bool,
    unresponsive: bool,

    signal: u8,
    bit_error: u8,
    garbled_signal: bool,
    registration: u8,
    attached: bool,

    context_active: bool,
    socket_connected: bool,
    fail_activations: u32,
    fail_opens: u32,
    drop_sends: u32,
    fail_sends: u32,
    hold_acks: bool,
    total_sent: u64,
    acked: u64,

    inbox: Vec<u8>,
    outbox: Vec<u8>,
    /// Bytes still expected after a `>` prompt.
    payload_pending: Option<usize>,

    commands: Vec<String>,
    payloads: Vec<Vec<u8>>,
}

impl Default for SimState {
    fn default() -> Self {
        SimState {
            open: false,
            echo: true,
            unresponsive: false,
            signal: 25,
            bit_error: 0,
            garbled_signal: false,
            registration: 1,
            attached: true,
            context_active: false,
            socket_connected: false,
            fail_activations: 0,
            fail_opens: 0,
            drop_sends: 0,
            fail_sends: 0,
            hold_acks: false,
            total_sent: 0,
            acked: 0,
            inbox: Vec::new(),
            outbox: Vec::new(),
            payload_pending: None,
            commands: Vec::new(),
            payloads: Vec::new(),
        }
    }
}

impl SimState {
    fn reply(&mut self, text: &str) {
        self.outbox.extend_from_slice(text.as_bytes());
    }

    fn ok(&mut self, lines: &[String]) {
        for line in lines {
            self.reply(&format!("\r\n{line}\r\n"));
        }
        self.reply("\r\nOK\r\n");
    }

    fn error(&mut self) {
        self.reply("\r\nERROR\r\n");
    }

    fn feed(&mut self, bytes: &[u8]) {
        if self.unresponsive {
            return;
        }
        self.inbox.extend_from_slice(bytes);
        loop {
            if let Some(need) = self.payload_pending {
                if self.inbox.len() < need {
                    return;
                }
                let payload: Vec<u8> = self.inbox.drain(..need).collect();
                self.payload_pending = None;
                self.deliver(payload);
                continue;
            }
            let Some(end) = self.inbox.iter().position(|b| *b == b'\r' || *b == b'\n') else {
                return;
            };
            let line: Vec<u8> = self.inbox.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line).trim().to_string();
            if command.is_empty() {
                continue;
            }
            self.commands.push(command.clone());
            if self.echo {
                self.reply(&format!("{command}\r\r\n"));
            }
            self.handle(&command);
        }
    }

    fn deliver(&mut self, payload: Vec<u8>) {
        if self.drop_sends > 0 {
            self.drop_sends -= 1;
            return;
        }
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            self.reply("\r\nSEND FAIL\r\n");
            return;
        }
        let len = payload.len() as u64;
        self.total_sent += len;
        if !self.hold_acks {
            self.acked += len;
        }
        self.payloads.push(payload);
        self.reply("\r\nSEND OK\r\n");
    }

    fn handle(&mut self, command: &str) {
        let Some(rest) = command.strip_prefix("AT") else {
            self.error();
            return;
        };
        match rest {
            "" => self.ok(&[]),
            "E0" => {
                self.echo = false;
                self.ok(&[]);
            }
            "I" => self.ok(&[
                "Quectel".into(),
                "EC800N".into(),
                "Revision: EC800NCNLAR01A01M16".into(),
            ]),
            "+CGMI" => self.ok(&["Quectel".into()]),
            "+CGMM" => self.ok(&["EC800N".into()]),
            "+CGMR" => self.ok(&["EC800NCNLAR01A01M16".into()]),
            "+CGSN" => self.ok(&["866123456789012".into()]),
            "+CPIN?" => self.ok(&["+CPIN: READY".into()]),
            "+COPS?" => self.ok(&["+COPS: 0,0,\"CHINA MOBILE\",7".into()]),
            "+CSQ" => {
                let line = if self.garbled_signal {
                    "+CSQ: ??,".to_string()
                } else {
                    format!("+CSQ: {},{}", self.signal, self.bit_error)
                };
                self.ok(&[line]);
            }
            "+CREG?" => {
                let line = format!("+CREG: 0,{}", self.registration);
                self.ok(&[line]);
            }
            "+CGREG?" => {
                let line = format!("+CGREG: 0,{}", self.registration);
                self.ok(&[line]);
            }
            "+CGATT?" => {
                let line = format!("+CGATT: {}", u8::from(self.attached));
                self.ok(&[line]);
            }
            "+QIACT?" => {
                let lines = if self.context_active {
                    vec!["+QIACT: 1,1,1,\"10.64.12.7\"".to_string()]
                } else {
                    Vec::new()
                };
                self.ok(&lines);
            }
            r if r.starts_with("+QICSGP=") => self.ok(&[]),
            r if r.starts_with("+QIACT=") => {
                if self.fail_activations > 0 {
                    self.fail_activations -= 1;
                    self.error();
                } else if self.context_active {
                    self.error();
                } else {
                    self.context_active = true;
                    self.ok(&[]);
                }
            }
            r if r.starts_with("+QIDEACT=") => {
                self.context_active = false;
                self.socket_connected = false;
                self.ok(&[]);
            }
            r if r.starts_with("+QICLOSE=") => {
                self.socket_connected = false;
                self.ok(&[]);
            }
            r if r.starts_with("+QIOPEN=") => {
                let conn = r
                    .trim_start_matches("+QIOPEN=")
                    .split(',')
                    .nth(1)
                    .unwrap_or("0")
                    .to_string();
                self.ok(&[]);
                let code = if self.fail_opens > 0 {
                    self.fail_opens -= 1;
                    566
                } else if !self.context_active {
                    563
                } else {
                    self.socket_connected = true;
                    0
                };
                self.reply(&format!("\r\n+QIOPEN: {conn},{code}\r\n"));
            }
            r if r.starts_with("+QISTATE=") => {
                let lines = if self.socket_connected {
                    vec!["+QISTATE: 0,\"TCP\",\"httpbin.org\",80,4021,2,1,0,0,\"usbmodem\"".into()]
                } else {
                    Vec::new()
                };
                self.ok(&lines);
            }
            r if r.starts_with("+QISEND=") => {
                let len = r
                    .trim_start_matches("+QISEND=")
                    .split(',')
                    .nth(1)
                    .and_then(|n| n.trim().parse::<usize>().ok());
                match len {
                    Some(0) => {
                        let line = format!(
                            "+QISEND: {},{},{}",
                            self.total_sent,
                            self.acked,
                            self.total_sent - self.acked
                        );
                        self.ok(&[line]);
                    }
                    Some(n) if self.socket_connected => {
                        self.payload_pending = Some(n);
                        self.reply("\r\n> ");
                    }
                    _ => self.error(),
                }
            }
            _ => self.error(),
        }
    }
}

// ─── Handle ─────────────────────────────────────────────────────────────────

/// Scriptable simulated module. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct SimModem {
    state: Arc<Mutex<SimState>>,
}

impl SimModem {
    /// A module with good signal, home registration, attached, echo on.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            modem: self.clone(),
            fail: false,
        }
    }

    /// A connector whose `open` always fails with `NotFound`.
    pub fn failing_connector(&self) -> SimConnector {
        SimConnector {
            modem: self.clone(),
            fail: true,
        }
    }

    // ─── Scripting ──────────────────────────────────────────────────────

    pub fn set_signal(&self, level: u8, bit_error: u8) {
        let mut s = self.lock();
        s.signal = level;
        s.bit_error = bit_error;
    }

    /// Registration status code as reported by `+CREG`.
    pub fn set_registration(&self, code: u8) {
        self.lock().registration = code;
    }

    pub fn set_attached(&self, attached: bool) {
        self.lock().attached = attached;
    }

    /// Deactivating the context also drops the socket.
    pub fn set_context_active(&self, active: bool) {
        let mut s = self.lock();
        s.context_active = active;
        if !active {
            s.socket_connected = false;
        }
    }

    /// Reply `ERROR` to the next `n` activation requests.
    pub fn fail_activations(&self, n: u32) {
        self.lock().fail_activations = n;
    }

    /// Report a failure code for the next `n` connection opens.
    pub fn fail_opens(&self, n: u32) {
        self.lock().fail_opens = n;
    }

    /// Swallow the next `n` payloads without a send result.
    pub fn drop_sends(&self, n: u32) {
        self.lock().drop_sends = n;
    }

    /// Answer `SEND FAIL` to the next `n` payloads.
    pub fn fail_sends(&self, n: u32) {
        self.lock().fail_sends = n;
    }

    /// Leave delivered bytes unacknowledged in the send counters.
    pub fn hold_acks(&self, hold: bool) {
        self.lock().hold_acks = hold;
    }

    /// The remote closed the logical connection.
    pub fn drop_socket(&self) {
        self.lock().socket_connected = false;
    }

    /// Ignore everything written.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.lock().unresponsive = unresponsive;
    }

    /// Reply to signal queries with an unparseable line.
    pub fn garble_signal(&self, garbled: bool) {
        self.lock().garbled_signal = garbled;
    }

    // ─── Inspection ─────────────────────────────────────────────────────

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Payloads that got `SEND OK`, in order.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.lock().payloads.clone()
    }

    pub fn context_active(&self) -> bool {
        self.lock().context_active
    }

    pub fn socket_connected(&self) -> bool {
        self.lock().socket_connected
    }

    pub fn echo_enabled(&self) -> bool {
        self.lock().echo
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }
}

// ─── Transport ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimConnector {
    modem: SimModem,
    fail: bool,
}

impl Connector for SimConnector {
    fn open(&self, device: &str, _baud: u32) -> io::Result<Box<dyn Transport>> {
        if self.fail {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: {device}"),
            ));
        }
        let mut s = self.modem.lock();
        s.open = true;
        s.inbox.clear();
        s.outbox.clear();
        s.payload_pending = None;
        drop(s);
        Ok(Box::new(SimTransport {
            modem: self.modem.clone(),
        }))
    }
}

struct SimTransport {
    modem: SimModem,
}

impl Transport for SimTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut s = self.modem.lock();
        if !s.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        s.feed(bytes);
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let mut s = self.modem.lock();
        Ok(std::mem::take(&mut s.outbox))
    }

    fn close(&mut self) -> io::Result<()> {
        let mut s = self.modem.lock();
        s.open = false;
        s.commands.push(TRANSPORT_CLOSED.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(modem: &SimModem) -> Box<dyn Transport> {
        modem.connector().open("/dev/sim0", 115_200).unwrap()
    }

    fn text(t: &mut Box<dyn Transport>) -> String {
        String::from_utf8(t.read_available().unwrap()).unwrap()
    }

    #[test]
    fn echoes_until_disabled() {
        let modem = SimModem::new();
        let mut t = open(&modem);
        t.write(b"AT\r\n").unwrap();
        assert_eq!(text(&mut t), "AT\r\r\n\r\nOK\r\n");
        t.write(b"ATE0\r\n").unwrap();
        let _ = text(&mut t);
        t.write(b"AT+CSQ\r\n").unwrap();
        assert_eq!(text(&mut t), "\r\n+CSQ: 25,0\r\n\r\nOK\r\n");
    }

    #[test]
    fn payload_mode_consumes_exact_length() {
        let modem = SimModem::new();
        modem.set_context_active(true);
        modem.lock().socket_connected = true;
        modem.lock().echo = false;
        let mut t = open(&modem);
        t.write(b"AT+QISEND=0,5\r\n").unwrap();
        assert!(text(&mut t).contains('>'));
        t.write(b"ab\r\nc").unwrap();
        assert!(text(&mut t).contains("SEND OK"));
        assert_eq!(modem.payloads(), vec![b"ab\r\nc".to_vec()]);
    }

    #[test]
    fn send_without_socket_is_rejected() {
        let modem = SimModem::new();
        let mut t = open(&modem);
        t.write(b"AT+QISEND=0,5\r\n").unwrap();
        assert!(text(&mut t).contains("ERROR"));
    }

    #[test]
    fn unknown_command_is_error() {
        let modem = SimModem::new();
        let mut t = open(&modem);
        t.write(b"AT+BOGUS\r\n").unwrap();
        assert!(text(&mut t).ends_with("ERROR\r\n"));
    }

    #[test]
    fn close_is_logged_and_blocks_writes() {
        let modem = SimModem::new();
        let mut t = open(&modem);
        t.close().unwrap();
        assert!(!modem.is_open());
        assert_eq!(modem.commands().last().map(String::as_str), Some(TRANSPORT_CLOSED));
        assert!(t.write(b"AT\r\n").is_err());
    }
}
