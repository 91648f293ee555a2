//! # telelink
//!
//! Reliable delivery of small telemetry records over a cellular module that
//! is only reachable through a line-oriented, half-duplex command channel.
//!
//! ## Crate structure
//!
//! - [`codec`] — Packet framing: sequence number, CRC-32, canonical JSON
//! - [`protocol`] — Command vocabulary and reply parsers
//! - [`channel`] — Transport boundary and the command/reply adapter
//! - [`quality`] — Channel quality score, tiers and reports
//! - [`profile`] — Tier → transmission profile presets
//! - [`lifecycle`] — Link bring-up state machine, health check, recovery
//! - [`retry`] — Retry policy shared by bring-up and sending
//! - [`session`] — Session aggregate and the reliable send engine
//! - [`queue`] — Deferred queue
//! - [`monitor`] — Background monitor thread
//! - [`uplink`] — Start/shutdown entry point
//! - [`stats`] — Delivery statistics
//! - [`store`] — Telemetry store boundary
//! - [`config`] — TOML configuration
//! - [`sim`] — Scripted module simulator

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod profile;
pub mod protocol;
pub mod quality;
pub mod queue;
pub mod retry;
pub mod session;
pub mod sim;
pub mod stats;
pub mod store;
pub mod uplink;

pub use channel::{Connector, Transport};
pub use codec::{PacketCodec, Record};
pub use config::SessionConfig;
pub use error::{LinkError, Result};
pub use lifecycle::ConnectionState;
pub use quality::{QualityReport, QualityTier};
pub use queue::PendingItem;
pub use session::{SendOutcome, Session};
pub use stats::TransmissionStats;
pub use store::{MemoryStore, TelemetryStore};
pub use uplink::Uplink;
