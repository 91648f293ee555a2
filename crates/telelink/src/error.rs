//! Error taxonomy for the uplink.
//!
//! Two kinds abort session start ([`LinkError::TransportOpen`] and
//! [`LinkError::Lifecycle`]); everything else is absorbed by retries,
//! queueing or the monitor's recovery path.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::ConnectionState;

/// Errors surfaced by the uplink core.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The raw transport (serial device, bridge) could not be opened.
    #[error("failed to open transport {device}: {source}")]
    TransportOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    /// No terminal reply arrived before the exchange deadline.
    #[error("no reply to `{command}` within {timeout:?}")]
    ProtocolTimeout { command: String, timeout: Duration },

    /// The module answered a command with an error marker or failure code.
    #[error("`{command}` rejected: {reply}")]
    CommandRejected { command: String, reply: String },

    /// A bring-up stage exhausted its retry budget.
    #[error("{stage} failed after {attempts} attempt(s): {reason}")]
    Lifecycle {
        stage: &'static str,
        attempts: u32,
        reason: String,
    },

    /// A packet was not delivered within the profile's retry budget.
    #[error("packet #{sequence} not delivered after {attempts} attempt(s)")]
    SendFailed { sequence: u32, attempts: u32 },

    /// The record could not be serialized into a packet.
    #[error("cannot encode telemetry record: {0}")]
    Encoding(String),

    /// Data context or logical connection found unhealthy.
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    /// Operation requires a state the session is not in.
    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The transport is not open.
    #[error("transport is not open")]
    NotConnected,

    /// Raw transport I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Whether this error aborts session start.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LinkError::TransportOpen { .. } | LinkError::Lifecycle { .. }
        )
    }

    /// Whether the failure was a reply timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::ProtocolTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        let open = LinkError::TransportOpen {
            device: "/dev/ttyUSB9".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert!(open.is_fatal());
        assert!(LinkError::Lifecycle {
            stage: "network attach",
            attempts: 3,
            reason: "context inactive".into(),
        }
        .is_fatal());

        assert!(!LinkError::SendFailed {
            sequence: 4,
            attempts: 3
        }
        .is_fatal());
        assert!(!LinkError::HealthCheckFailed("socket closed".into()).is_fatal());
        assert!(!LinkError::Encoding("not a map".into()).is_fatal());
    }

    #[test]
    fn timeout_message_names_command() {
        let err = LinkError::ProtocolTimeout {
            command: "AT+CSQ".into(),
            timeout: Duration::from_millis(300),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("AT+CSQ"));
    }
}
