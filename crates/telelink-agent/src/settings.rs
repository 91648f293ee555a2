//! `[agent]` section of the config file. The rest of the file is the
//! session configuration read by `telelink::SessionConfig`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileInput {
    agent: AgentConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfigInput {
    pub device_id: Option<String>,
    pub location: Option<String>,
    pub interval_secs: Option<u64>,
    pub min_interval_secs: Option<u64>,
    pub cycles: Option<u64>,
    pub store_path: Option<PathBuf>,
    pub spill_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub device_id: String,
    pub location: String,
    /// Base wait between readings before the quality adjustment.
    pub interval: Duration,
    /// Floor for the adjusted wait.
    pub min_interval: Duration,
    /// `None` runs until interrupted.
    pub cycles: Option<u64>,
    pub store_path: Option<PathBuf>,
    pub spill_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: "EC800X_001".into(),
            location: "Beijing_Lab".into(),
            interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(10),
            cycles: None,
            store_path: None,
            spill_path: PathBuf::from("telelink-pending.jsonl"),
        }
    }
}

impl AgentConfigInput {
    pub fn resolve(self) -> Result<AgentConfig, String> {
        let d = AgentConfig::default();
        let cfg = AgentConfig {
            device_id: self.device_id.unwrap_or(d.device_id),
            location: self.location.unwrap_or(d.location),
            interval: self.interval_secs.map(Duration::from_secs).unwrap_or(d.interval),
            min_interval: self
                .min_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(d.min_interval),
            cycles: self.cycles.filter(|&c| c > 0),
            store_path: self.store_path,
            spill_path: self.spill_path.unwrap_or(d.spill_path),
        };
        if cfg.device_id.trim().is_empty() {
            return Err("agent.device_id must not be empty".into());
        }
        if cfg.interval.is_zero() {
            return Err("agent.interval_secs must be > 0".into());
        }
        Ok(cfg)
    }
}

impl AgentConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(AgentConfig::default());
        }
        let parsed: FileInput =
            toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        parsed.agent.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(AgentConfig::from_toml_str("").unwrap(), AgentConfig::default());
    }

    #[test]
    fn agent_section_alongside_session_sections() {
        let cfg = AgentConfig::from_toml_str(
            r#"
            [serial]
            device = "/dev/ttyUSB2"

            [agent]
            device_id = "unit-7"
            interval_secs = 60
            cycles = 5
            store_path = "/var/lib/telelink/sent.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device_id, "unit-7");
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert_eq!(cfg.min_interval, Duration::from_secs(10));
        assert_eq!(cfg.cycles, Some(5));
        assert_eq!(
            cfg.store_path.as_deref(),
            Some(std::path::Path::new("/var/lib/telelink/sent.jsonl"))
        );
    }

    #[test]
    fn zero_interval_rejected() {
        let err = AgentConfig::from_toml_str("[agent]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.contains("interval_secs"));
    }
}
