use std::time::Duration;

use serde::Deserialize;

use crate::profile::{ProfileTable, TransmissionProfile};
use crate::quality::QualityWeights;

pub const CONFIG_VERSION: u32 = 1;

// ─── Input (TOML) ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfigInput {
    pub version: u32,
    pub serial: SerialConfigInput,
    pub server: ServerConfigInput,
    pub apn: ApnConfigInput,
    pub timeouts: TimeoutConfigInput,
    pub lifecycle: LifecycleConfigInput,
    pub quality: QualityConfigInput,
    pub monitor: MonitorConfigInput,
    pub queue: QueueConfigInput,
    pub send: SendConfigInput,
    pub profiles: ProfilesConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SerialConfigInput {
    pub device: Option<String>,
    pub baud: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfigInput {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub context_id: Option<u8>,
    pub connection_id: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApnConfigInput {
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutConfigInput {
    pub probe_ms: Option<u64>,
    pub query_ms: Option<u64>,
    pub command_ms: Option<u64>,
    pub activate_ms: Option<u64>,
    pub open_ms: Option<u64>,
    pub poll_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LifecycleConfigInput {
    pub probe_attempts: Option<u32>,
    pub attach_attempts: Option<u32>,
    pub attach_backoff_ms: Option<u64>,
    pub connect_attempts: Option<u32>,
    pub connect_backoff_ms: Option<u64>,
    pub reactivate_pause_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QualityConfigInput {
    pub signal_weight: Option<f64>,
    pub network_weight: Option<f64>,
    pub history_weight: Option<f64>,
    pub defer_below: Option<u8>,
    pub flush_above: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfigInput {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
    pub join_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfigInput {
    /// 0 means unbounded.
    pub capacity: Option<usize>,
    pub requeue_failed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SendConfigInput {
    pub require_ack: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfilesConfigInput {
    pub high_speed: ProfileConfigInput,
    pub standard: ProfileConfigInput,
    pub conservative: ProfileConfigInput,
    pub enhanced: ProfileConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfileConfigInput {
    pub packet_size: Option<usize>,
    pub chunk_size: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub fec: Option<bool>,
    pub compress: Option<bool>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub device: String,
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".into(),
            baud: 115_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `TCP` or `UDP`.
    pub protocol: String,
    pub context_id: u8,
    pub connection_id: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "httpbin.org".into(),
            port: 80,
            protocol: "TCP".into(),
            context_id: 1,
            connection_id: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnConfig {
    pub name: String,
    pub username: String,
    pub password: String,
    /// 0 none, 1 PAP, 2 CHAP, 3 PAP or CHAP.
    pub auth: u8,
}

impl Default for ApnConfig {
    fn default() -> Self {
        Self {
            name: "CMNET".into(),
            username: String::new(),
            password: String::new(),
            auth: 1,
        }
    }
}

/// Per-exchange deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Responsiveness probe and identity queries.
    pub probe: Duration,
    /// Diagnostic and health queries.
    pub query: Duration,
    /// General configuration commands and the send prompt.
    pub command: Duration,
    /// Data context activation.
    pub activate: Duration,
    /// Logical connection open.
    pub open: Duration,
    /// Transport poll granularity while waiting for a reply.
    pub poll: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(2),
            query: Duration::from_secs(3),
            command: Duration::from_secs(5),
            activate: Duration::from_secs(10),
            open: Duration::from_secs(15),
            poll: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub probe_attempts: u32,
    pub attach_attempts: u32,
    pub attach_backoff: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    /// Pause between deactivating and re-activating the data context.
    pub reactivate_pause: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            probe_attempts: 3,
            attach_attempts: 3,
            attach_backoff: Duration::from_secs(3),
            connect_attempts: 3,
            connect_backoff: Duration::from_secs(5),
            reactivate_pause: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    /// Sends are deferred when the score is below this.
    pub defer_below: u8,
    /// The monitor flushes one deferred item when the score is above this.
    pub flush_above: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            defer_below: 30,
            flush_above: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub join_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(15),
            join_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// `None` is unbounded.
    pub capacity: Option<usize>,
    pub requeue_failed: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: Some(256),
            requeue_failed: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendConfig {
    /// Also require the module to report zero unacknowledged bytes.
    pub require_ack: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub version: u32,
    pub serial: SerialConfig,
    pub server: ServerConfig,
    pub apn: ApnConfig,
    pub timeouts: TimeoutConfig,
    pub lifecycle: LifecycleConfig,
    pub quality: QualityConfig,
    pub monitor: MonitorConfig,
    pub queue: QueueConfig,
    pub send: SendConfig,
    pub profiles: ProfileTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            serial: SerialConfig::default(),
            server: ServerConfig::default(),
            apn: ApnConfig::default(),
            timeouts: TimeoutConfig::default(),
            lifecycle: LifecycleConfig::default(),
            quality: QualityConfig::default(),
            monitor: MonitorConfig::default(),
            queue: QueueConfig::default(),
            send: SendConfig::default(),
            profiles: ProfileTable::default(),
        }
    }
}

fn non_empty(key: &str, value: Option<String>, default: String) -> Result<String, String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if v.is_empty() => Err(format!("{key} must not be empty")),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

fn ms_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

impl ProfileConfigInput {
    fn apply(&self, profile: &mut TransmissionProfile) {
        if let Some(v) = self.packet_size {
            profile.packet_size = v.max(1);
        }
        if let Some(v) = self.chunk_size {
            profile.chunk_size = v.max(1);
        }
        if let Some(v) = self.timeout_ms {
            profile.timeout = Duration::from_millis(v);
        }
        if let Some(v) = self.max_retries {
            profile.max_retries = v.max(1);
        }
        if let Some(v) = self.retry_delay_ms {
            profile.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = self.fec {
            profile.fec = v;
        }
        if let Some(v) = self.compress {
            profile.compress = v;
        }
    }
}

impl SessionConfigInput {
    pub fn resolve(self) -> Result<SessionConfig, String> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(format!("Unsupported config version {}", version));
        }

        let d = SessionConfig::default();

        let serial = SerialConfig {
            device: non_empty("serial.device", self.serial.device, d.serial.device)?,
            baud: self.serial.baud.unwrap_or(d.serial.baud),
        };
        if serial.baud == 0 {
            return Err("serial.baud must be positive".into());
        }

        let protocol =
            non_empty("server.protocol", self.server.protocol, d.server.protocol)?.to_ascii_uppercase();
        if protocol != "TCP" && protocol != "UDP" {
            return Err(format!("server.protocol must be TCP or UDP, got {protocol}"));
        }
        let server = ServerConfig {
            host: non_empty("server.host", self.server.host, d.server.host)?,
            port: self.server.port.unwrap_or(d.server.port),
            protocol,
            context_id: self.server.context_id.unwrap_or(d.server.context_id),
            connection_id: self.server.connection_id.unwrap_or(d.server.connection_id),
        };
        if server.port == 0 {
            return Err("server.port must be positive".into());
        }
        if !(1..=16).contains(&server.context_id) {
            return Err(format!("server.context_id out of range: {}", server.context_id));
        }
        if server.connection_id > 11 {
            return Err(format!(
                "server.connection_id out of range: {}",
                server.connection_id
            ));
        }

        let apn = ApnConfig {
            name: non_empty("apn.name", self.apn.name, d.apn.name)?,
            username: self.apn.username.unwrap_or_default(),
            password: self.apn.password.unwrap_or_default(),
            auth: self.apn.auth.unwrap_or(d.apn.auth),
        };
        if apn.auth > 3 {
            return Err(format!("apn.auth must be 0-3, got {}", apn.auth));
        }

        let t = &self.timeouts;
        let timeouts = TimeoutConfig {
            probe: ms_or(t.probe_ms, d.timeouts.probe),
            query: ms_or(t.query_ms, d.timeouts.query),
            command: ms_or(t.command_ms, d.timeouts.command),
            activate: ms_or(t.activate_ms, d.timeouts.activate),
            open: ms_or(t.open_ms, d.timeouts.open),
            poll: ms_or(t.poll_ms, d.timeouts.poll).max(Duration::from_millis(1)),
        };

        let l = &self.lifecycle;
        let lifecycle = LifecycleConfig {
            probe_attempts: l.probe_attempts.unwrap_or(d.lifecycle.probe_attempts).max(1),
            attach_attempts: l.attach_attempts.unwrap_or(d.lifecycle.attach_attempts).max(1),
            attach_backoff: ms_or(l.attach_backoff_ms, d.lifecycle.attach_backoff),
            connect_attempts: l
                .connect_attempts
                .unwrap_or(d.lifecycle.connect_attempts)
                .max(1),
            connect_backoff: ms_or(l.connect_backoff_ms, d.lifecycle.connect_backoff),
            reactivate_pause: ms_or(l.reactivate_pause_ms, d.lifecycle.reactivate_pause),
        };

        let q = &self.quality;
        let weights = QualityWeights {
            signal: q.signal_weight.unwrap_or(d.quality.weights.signal),
            network: q.network_weight.unwrap_or(d.quality.weights.network),
            history: q.history_weight.unwrap_or(d.quality.weights.history),
        };
        let all = [weights.signal, weights.network, weights.history];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("quality weights must be finite and non-negative".into());
        }
        if all.iter().all(|w| *w == 0.0) {
            return Err("at least one quality weight must be positive".into());
        }
        let quality = QualityConfig {
            weights,
            defer_below: q.defer_below.unwrap_or(d.quality.defer_below),
            flush_above: q.flush_above.unwrap_or(d.quality.flush_above),
        };
        if quality.defer_below > 100 || quality.flush_above > 100 {
            return Err("quality thresholds must be within 0-100".into());
        }

        let monitor = MonitorConfig {
            enabled: self.monitor.enabled.unwrap_or(d.monitor.enabled),
            interval: ms_or(self.monitor.interval_ms, d.monitor.interval),
            join_timeout: ms_or(self.monitor.join_timeout_ms, d.monitor.join_timeout),
        };
        if monitor.interval.is_zero() {
            return Err("monitor.interval_ms must be positive".into());
        }

        let queue = QueueConfig {
            capacity: match self.queue.capacity {
                Some(0) => None,
                Some(n) => Some(n),
                None => d.queue.capacity,
            },
            requeue_failed: self.queue.requeue_failed.unwrap_or(d.queue.requeue_failed),
        };

        let send = SendConfig {
            require_ack: self.send.require_ack.unwrap_or(d.send.require_ack),
        };

        let mut profiles = ProfileTable::default();
        self.profiles.high_speed.apply(&mut profiles.high_speed);
        self.profiles.standard.apply(&mut profiles.standard);
        self.profiles.conservative.apply(&mut profiles.conservative);
        self.profiles.enhanced.apply(&mut profiles.enhanced);

        Ok(SessionConfig {
            version,
            serial,
            server,
            apn,
            timeouts,
            lifecycle,
            quality,
            monitor,
            queue,
            send,
            profiles,
        })
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(SessionConfig::default());
        }
        let parsed: SessionConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        parsed.resolve()
    }
}
