//! # Connection Lifecycle
//!
//! Brings the link up one stage at a time and keeps track of where it is:
//!
//! ```text
//! Idle → TransportOpen → Responsive → ModuleConfigured → NetworkAttached → TransportConnected
//!                                                              │                  │   ↑
//!                                                              └──→ Degraded ←────┘   │
//!                                                                      └──────────────┘
//! ```
//!
//! Any state may drop back to `Idle` on close. A failed recovery leaves the
//! link in `Degraded`; the monitor retries on its next tick.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{CommandChannel, Connector, Expect, Reply};
use crate::config::{ApnConfig, LifecycleConfig, ServerConfig, SessionConfig, TimeoutConfig};
use crate::error::{LinkError, Result};
use crate::protocol::{self, IdentityField, SocketState};
use crate::retry::{Backoff, RetryPolicy};

// ─── State ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    TransportOpen,
    Responsive,
    ModuleConfigured,
    NetworkAttached,
    TransportConnected,
    Degraded,
}

impl ConnectionState {
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::TransportConnected)
    }

    /// Whether the data context is expected to be up.
    pub const fn is_attached(&self) -> bool {
        matches!(
            self,
            Self::NetworkAttached | Self::TransportConnected | Self::Degraded
        )
    }

    pub const fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, next),
            (_, Idle)
                | (Idle, TransportOpen)
                | (TransportOpen, Responsive)
                | (Responsive, ModuleConfigured)
                | (ModuleConfigured, NetworkAttached)
                | (NetworkAttached, TransportConnected)
                | (NetworkAttached, Degraded)
                | (TransportConnected, Degraded)
                | (Degraded, TransportConnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::TransportOpen => "transport-open",
            Self::Responsive => "responsive",
            Self::ModuleConfigured => "module-configured",
            Self::NetworkAttached => "network-attached",
            Self::TransportConnected => "transport-connected",
            Self::Degraded => "degraded",
        })
    }
}

/// Identity strings reported by the module during configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleIdentity {
    pub identification: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub revision: Option<String>,
    pub imei: Option<String>,
}

impl ModuleIdentity {
    fn set(&mut self, field: IdentityField, value: String) {
        let slot = match field {
            IdentityField::Identification => &mut self.identification,
            IdentityField::Manufacturer => &mut self.manufacturer,
            IdentityField::Model => &mut self.model,
            IdentityField::Revision => &mut self.revision,
            IdentityField::Imei => &mut self.imei,
        };
        *slot = Some(value);
    }
}

// ─── Link ───────────────────────────────────────────────────────────────────

/// The module link: the command channel plus where bring-up has got to.
pub struct Link {
    channel: Option<CommandChannel>,
    state: ConnectionState,
    identity: ModuleIdentity,
    context_active: bool,
    server: ServerConfig,
    apn: ApnConfig,
    timeouts: TimeoutConfig,
    lifecycle: LifecycleConfig,
}

fn expect_ok(command: &str, reply: Reply) -> Result<Reply> {
    if reply.is_ok() && !reply.is_error() {
        Ok(reply)
    } else {
        Err(LinkError::CommandRejected {
            command: command.to_string(),
            reply: reply.lines.join(" | "),
        })
    }
}

impl Link {
    pub fn new(config: &SessionConfig) -> Self {
        Link {
            channel: None,
            state: ConnectionState::Idle,
            identity: ModuleIdentity::default(),
            context_active: false,
            server: config.server.clone(),
            apn: config.apn.clone(),
            timeouts: config.timeouts,
            lifecycle: config.lifecycle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    /// Whether the last context query or activation saw the context up.
    pub fn context_active(&self) -> bool {
        self.context_active
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    pub fn connection_id(&self) -> u8 {
        self.server.connection_id
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    pub fn channel(&mut self) -> Result<&mut CommandChannel> {
        self.channel.as_mut().ok_or(LinkError::NotConnected)
    }

    fn transition(&mut self, to: ConnectionState) -> Result<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        info!(from = %self.state, %to, "link state");
        self.state = to;
        Ok(())
    }

    fn require(&self, expected: ConnectionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LinkError::InvalidTransition {
                from: self.state,
                to: expected,
            })
        }
    }

    // ─── Bring-up ───────────────────────────────────────────────────────

    /// Run every stage from `Idle` to `TransportConnected`.
    pub fn bring_up(&mut self, connector: &dyn Connector, device: &str, baud: u32) -> Result<()> {
        self.open(connector, device, baud)?;

        let probes = RetryPolicy::new(self.lifecycle.probe_attempts, Backoff::None);
        probes
            .run("probe", |_| self.probe())
            .map_err(|e| LinkError::Lifecycle {
                stage: "probe",
                attempts: e.attempts,
                reason: e.last.to_string(),
            })?;

        self.configure()?;
        let attach = RetryPolicy::linear(self.lifecycle.attach_attempts, self.lifecycle.attach_backoff);
        self.attach(&attach)?;
        let connect =
            RetryPolicy::linear(self.lifecycle.connect_attempts, self.lifecycle.connect_backoff);
        self.connect(&connect)
    }

    /// `Idle → TransportOpen`. Not retried.
    pub fn open(&mut self, connector: &dyn Connector, device: &str, baud: u32) -> Result<()> {
        self.require(ConnectionState::Idle)?;
        let transport = connector
            .open(device, baud)
            .map_err(|source| LinkError::TransportOpen {
                device: device.to_string(),
                source,
            })?;
        self.channel = Some(CommandChannel::new(transport, self.timeouts.poll));
        info!(device, baud, "transport opened");
        self.transition(ConnectionState::TransportOpen)
    }

    /// `TransportOpen → Responsive`: one no-op exchange.
    pub fn probe(&mut self) -> Result<()> {
        self.require(ConnectionState::TransportOpen)?;
        let timeout = self.timeouts.probe;
        let reply = self.channel()?.exchange(protocol::PING, timeout)?;
        expect_ok(protocol::PING, reply)?;
        self.transition(ConnectionState::Responsive)
    }

    /// `Responsive → ModuleConfigured`: echo off, identity, survey.
    ///
    /// Every query here is best-effort.
    pub fn configure(&mut self) -> Result<()> {
        self.require(ConnectionState::Responsive)?;
        let probe = self.timeouts.probe;
        let query = self.timeouts.query;

        match self.channel()?.exchange(protocol::ECHO_OFF, probe) {
            Ok(reply) if reply.is_ok() => debug!("echo disabled"),
            Ok(reply) => warn!(reply = ?reply.lines, "echo-off rejected"),
            Err(e) => warn!(error = %e, "echo-off failed"),
        }

        let mut identity = ModuleIdentity::default();
        for (command, field) in protocol::IDENTITY_QUERIES {
            match self.channel()?.exchange(command, probe) {
                Ok(reply) if reply.is_ok() => {
                    if let Some(value) = protocol::parse_identity(&reply.lines) {
                        identity.set(*field, value);
                    }
                }
                Ok(reply) => debug!(command, reply = ?reply.lines, "identity query rejected"),
                Err(e) => warn!(command, error = %e, "identity query failed"),
            }
        }
        info!(
            model = identity.model.as_deref().unwrap_or("?"),
            revision = identity.revision.as_deref().unwrap_or("?"),
            imei = identity.imei.as_deref().unwrap_or("?"),
            "module identified"
        );
        self.identity = identity;

        for (command, what) in protocol::SURVEY_QUERIES {
            match self.channel()?.exchange(command, query) {
                Ok(reply) => info!(what, reply = ?reply.lines, "network survey"),
                Err(e) => warn!(what, error = %e, "survey query failed"),
            }
        }

        self.transition(ConnectionState::ModuleConfigured)
    }

    /// `ModuleConfigured → NetworkAttached`.
    pub fn attach(&mut self, policy: &RetryPolicy) -> Result<()> {
        self.require(ConnectionState::ModuleConfigured)?;
        policy
            .run("network attach", |attempt| {
                info!(attempt, apn = %self.apn.name, "attaching");
                self.attach_once()
            })
            .map_err(|e| LinkError::Lifecycle {
                stage: "network attach",
                attempts: e.attempts,
                reason: e.last.to_string(),
            })?;
        self.transition(ConnectionState::NetworkAttached)
    }

    fn attach_once(&mut self) -> Result<()> {
        let ctx = self.server.context_id;
        let set_apn = protocol::set_apn(
            ctx,
            &self.apn.name,
            &self.apn.username,
            &self.apn.password,
            self.apn.auth,
        );
        let command = self.timeouts.command;
        let reply = self.channel()?.exchange(&set_apn, command)?;
        expect_ok(&set_apn, reply)?;

        self.activate_context()?;
        self.confirm_context()
    }

    /// Activate the data context, cycling it once if the first try fails.
    fn activate_context(&mut self) -> Result<()> {
        let ctx = self.server.context_id;
        let activate = protocol::activate_context(ctx);
        let timeout = self.timeouts.activate;

        match self
            .channel()?
            .exchange(&activate, timeout)
            .and_then(|r| expect_ok(&activate, r))
        {
            Ok(_) => return Ok(()),
            Err(e) => warn!(context = ctx, error = %e, "activation failed, cycling context"),
        }

        let deactivate = protocol::deactivate_context(ctx);
        if let Err(e) = self.channel()?.exchange(&deactivate, timeout) {
            debug!(error = %e, "deactivate failed");
        }
        self.context_active = false;
        if !self.lifecycle.reactivate_pause.is_zero() {
            std::thread::sleep(self.lifecycle.reactivate_pause);
        }
        let reply = self.channel()?.exchange(&activate, timeout)?;
        expect_ok(&activate, reply).map(|_| ())
    }

    fn confirm_context(&mut self) -> Result<()> {
        let ctx = self.server.context_id;
        let query = self.timeouts.query;
        let reply = self.channel()?.exchange(protocol::CONTEXT_STATE, query)?;
        self.context_active = protocol::parse_context_active(&reply.lines, ctx);
        if self.context_active {
            info!(context = ctx, "data context active");
            Ok(())
        } else {
            Err(LinkError::HealthCheckFailed(format!(
                "context {ctx} not active after activation"
            )))
        }
    }

    /// `NetworkAttached → TransportConnected`.
    pub fn connect(&mut self, policy: &RetryPolicy) -> Result<()> {
        self.require(ConnectionState::NetworkAttached)?;
        policy
            .run("transport connect", |attempt| {
                info!(
                    attempt,
                    host = %self.server.host,
                    port = self.server.port,
                    "opening logical connection"
                );
                self.connect_once()
            })
            .map_err(|e| LinkError::Lifecycle {
                stage: "transport connect",
                attempts: e.attempts,
                reason: e.last.to_string(),
            })?;
        self.transition(ConnectionState::TransportConnected)
    }

    /// Close any stale connection, open a new one and wait for its result.
    fn connect_once(&mut self) -> Result<()> {
        let conn = self.server.connection_id;
        let close = protocol::close_connection(conn);
        let command = self.timeouts.command;
        if let Err(e) = self.channel()?.exchange(&close, command) {
            debug!(error = %e, "stale connection close failed");
        }

        let open = protocol::open_connection(
            self.server.context_id,
            conn,
            &self.server.protocol,
            &self.server.host,
            self.server.port,
        );
        let timeout = self.timeouts.open;
        let reply = self
            .channel()?
            .exchange_until(&open, timeout, Expect::Line("+QIOPEN:"))?;
        match protocol::parse_open_result(&reply.lines, conn) {
            Some(0) => {
                info!(connection = conn, "logical connection open");
                Ok(())
            }
            Some(code) => Err(LinkError::CommandRejected {
                command: open,
                reply: format!("open result {code}"),
            }),
            None => Err(LinkError::CommandRejected {
                command: open,
                reply: reply.lines.join(" | "),
            }),
        }
    }

    // ─── Health & Recovery ──────────────────────────────────────────────

    /// Check the data context and, when connected, the logical connection.
    ///
    /// A failure moves an attached link to `Degraded`.
    pub fn health_check(&mut self) -> Result<()> {
        if !self.state.is_attached() {
            return Err(LinkError::NotConnected);
        }
        match self.probe_health() {
            Ok(()) => Ok(()),
            Err(reason) => {
                warn!(state = %self.state, %reason, "health check failed");
                if self.state != ConnectionState::Degraded {
                    self.transition(ConnectionState::Degraded)?;
                }
                Err(LinkError::HealthCheckFailed(reason))
            }
        }
    }

    fn probe_health(&mut self) -> std::result::Result<(), String> {
        let ctx = self.server.context_id;
        let conn = self.server.connection_id;
        let query = self.timeouts.query;
        let channel = self.channel().map_err(|e| e.to_string())?;

        let reply = channel
            .exchange(protocol::CONTEXT_STATE, query)
            .map_err(|e| e.to_string())?;
        let active = protocol::parse_context_active(&reply.lines, ctx);
        self.context_active = active;
        if !active {
            return Err(format!("data context {ctx} inactive"));
        }

        if self.state == ConnectionState::NetworkAttached {
            return Ok(());
        }
        let channel = self.channel().map_err(|e| e.to_string())?;
        let reply = channel
            .exchange(&protocol::connection_state(conn), query)
            .map_err(|e| e.to_string())?;
        match protocol::parse_connection_state(&reply.lines, conn) {
            Some(SocketState::Connected) => Ok(()),
            Some(other) => Err(format!("connection {conn} is {other:?}")),
            None => Err(format!("connection {conn} not reported")),
        }
    }

    /// `Degraded → TransportConnected`: one reopen, reactivating the data
    /// context first if it was found down.
    pub fn recover(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::TransportConnected => return Ok(()),
            ConnectionState::Degraded => {}
            other => {
                return Err(LinkError::InvalidTransition {
                    from: other,
                    to: ConnectionState::TransportConnected,
                })
            }
        }
        info!("recovering link");
        if !self.context_active {
            self.activate_context()?;
            self.confirm_context()?;
        }
        self.connect_once()?;
        self.transition(ConnectionState::TransportConnected)
    }

    /// Get to `TransportConnected` from wherever the link stands after
    /// bring-up, with a single attempt.
    pub fn ensure_connected(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::TransportConnected => Ok(()),
            ConnectionState::Degraded => self.recover(),
            ConnectionState::NetworkAttached => self.connect(&RetryPolicy::new(1, Backoff::None)),
            _ => Err(LinkError::NotConnected),
        }
    }

    // ─── Shutdown ───────────────────────────────────────────────────────

    /// Close the logical connection, then the transport. Failures are
    /// logged, never returned. Safe to call twice.
    pub fn close(&mut self) {
        let Some(mut channel) = self.channel.take() else {
            self.state = ConnectionState::Idle;
            return;
        };
        if matches!(
            self.state,
            ConnectionState::TransportConnected | ConnectionState::Degraded
        ) {
            let close = protocol::close_connection(self.server.connection_id);
            match channel.exchange(&close, self.timeouts.command) {
                Ok(_) => debug!("logical connection closed"),
                Err(e) => warn!(error = %e, "closing logical connection failed"),
            }
        }
        if let Err(e) = channel.close() {
            warn!(error = %e, "closing transport failed");
        }
        if self.state != ConnectionState::Idle {
            info!(from = %self.state, to = %ConnectionState::Idle, "link state");
        }
        self.state = ConnectionState::Idle;
        self.context_active = false;
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("state", &self.state)
            .field("open", &self.channel.is_some())
            .field("context_active", &self.context_active)
            .finish()
    }
}
