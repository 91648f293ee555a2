//! # Command Channel
//!
//! Synchronous request/reply adapter over a raw byte transport. One call to
//! [`CommandChannel::exchange`] writes a single `\r\n`-terminated command and
//! polls the transport until a terminal marker arrives or the deadline passes.
//! There is no retry policy here; callers decide what a timeout means.
//!
//! The protocol is half-duplex, so the channel is always reached through the
//! session's link lock (see [`crate::session`]).

use std::io;
use std::time::Duration;

use quanta::Instant;
use tracing::{debug, trace};

use crate::error::{LinkError, Result};

// ─── Raw Transport Boundary ─────────────────────────────────────────────────

/// Byte-level transport to the module (serial device, TCP bridge, simulator).
pub trait Transport: Send {
    /// Write all bytes.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Return whatever inbound bytes are buffered, possibly none. Never blocks.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Wait up to `timeout` for inbound bytes.
    ///
    /// The default polls [`Transport::read_available`]; drivers with a native
    /// blocking read should override it.
    fn read_timeout(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let chunk = self.read_available()?;
            if !chunk.is_empty() {
                return Ok(chunk);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }

    fn close(&mut self) -> io::Result<()>;
}

/// Opens a [`Transport`] for a device at a baud rate.
pub trait Connector: Send + Sync {
    fn open(&self, device: &str, baud: u32) -> io::Result<Box<dyn Transport>>;
}

// ─── Replies ────────────────────────────────────────────────────────────────

/// What ends an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// `OK` or an error line.
    Final,
    /// The `>` data prompt or an error line.
    Prompt,
    /// A line starting with the given prefix (e.g. an unsolicited
    /// `+QIOPEN:` after `OK`) or an error line.
    Line(&'static str),
    /// `SEND OK`, `SEND FAIL` or an error line, after a payload write.
    SendResult,
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Ok,
    Error,
    Prompt,
    Line,
    SendOk,
    SendFail,
}

/// Cleaned reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub terminal: Terminal,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        matches!(self.terminal, Terminal::Ok | Terminal::Line | Terminal::SendOk)
            || self.lines.iter().any(|l| l == "OK")
    }

    pub fn is_error(&self) -> bool {
        matches!(self.terminal, Terminal::Error | Terminal::SendFail)
    }
}

fn is_error_line(line: &str) -> bool {
    line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR")
}

/// Scan accumulated text for the terminal marker `expect` is waiting for.
fn find_terminal(text: &str, expect: Expect) -> Option<Terminal> {
    let mut lines = text.split(['\r', '\n']).map(str::trim);
    let complete = |l: &str| text.contains(&format!("{l}\r\n")) || text.contains(&format!("{l}\n"));
    match expect {
        Expect::Final => lines.find_map(|l| match l {
            "OK" if complete(l) => Some(Terminal::Ok),
            l if is_error_line(l) && complete(l) => Some(Terminal::Error),
            _ => None,
        }),
        Expect::Prompt => {
            if text.contains('>') {
                Some(Terminal::Prompt)
            } else {
                lines.find_map(|l| (is_error_line(l) && complete(l)).then_some(Terminal::Error))
            }
        }
        Expect::Line(prefix) => lines.find_map(|l| {
            if l.starts_with(prefix) && complete(l) {
                Some(Terminal::Line)
            } else if is_error_line(l) && complete(l) {
                Some(Terminal::Error)
            } else {
                None
            }
        }),
        Expect::SendResult => lines.find_map(|l| match l {
            "SEND OK" => Some(Terminal::SendOk),
            "SEND FAIL" => Some(Terminal::SendFail),
            l if is_error_line(l) && complete(l) => Some(Terminal::Error),
            _ => None,
        }),
    }
}

/// Best-effort UTF-8 decoding: invalid sequences are dropped, not replaced.
pub fn decode_permissive(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
    }
    out
}

/// Split a raw reply into trimmed lines, dropping blanks and command echo.
pub fn clean_reply(command: &str, text: &str) -> Vec<String> {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| *l != command && !l.starts_with("AT"))
        .map(str::to_string)
        .collect()
}

// ─── Command Channel ────────────────────────────────────────────────────────

/// Request/reply layer owning the raw transport.
pub struct CommandChannel {
    transport: Box<dyn Transport>,
    poll_interval: Duration,
}

impl CommandChannel {
    pub fn new(transport: Box<dyn Transport>, poll_interval: Duration) -> Self {
        CommandChannel {
            transport,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Send `command` and wait for `OK`/`ERROR`.
    pub fn exchange(&mut self, command: &str, timeout: Duration) -> Result<Reply> {
        self.exchange_until(command, timeout, Expect::Final)
    }

    /// Send `command` and wait for the marker described by `expect`.
    pub fn exchange_until(
        &mut self,
        command: &str,
        timeout: Duration,
        expect: Expect,
    ) -> Result<Reply> {
        self.discard_stale()?;
        debug!(command, "command >>");
        let mut line = Vec::with_capacity(command.len() + 2);
        line.extend_from_slice(command.as_bytes());
        line.extend_from_slice(b"\r\n");
        self.transport.write(&line)?;
        self.collect(command, timeout, expect)
    }

    /// Write a raw payload after a `>` prompt and wait for the send result.
    pub fn write_payload(&mut self, payload: &[u8], timeout: Duration) -> Result<Reply> {
        self.transport.write(payload)?;
        self.collect("<payload>", timeout, Expect::SendResult)
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close().map_err(LinkError::from)
    }

    fn discard_stale(&mut self) -> Result<()> {
        let stale = self.transport.read_available()?;
        if !stale.is_empty() {
            trace!(bytes = stale.len(), "discarded stale inbound bytes");
        }
        Ok(())
    }

    fn collect(&mut self, command: &str, timeout: Duration, expect: Expect) -> Result<Reply> {
        let deadline = Instant::now() + timeout;
        let mut raw = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                let text = decode_permissive(&raw);
                debug!(command, partial = %text.trim(), "command timed out");
                return Err(LinkError::ProtocolTimeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            let chunk = self
                .transport
                .read_timeout((deadline - now).min(self.poll_interval))?;
            if chunk.is_empty() {
                continue;
            }
            raw.extend_from_slice(&chunk);
            let text = decode_permissive(&raw);
            if let Some(terminal) = find_terminal(&text, expect) {
                let lines = clean_reply(command, &text);
                debug!(command, ?terminal, reply = ?lines, "command <<");
                return Ok(Reply { lines, terminal });
            }
        }
    }
}
