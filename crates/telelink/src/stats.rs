//! # Transmission Statistics
//!
//! Running delivery counters for one session. Counters only grow; nothing
//! resets them short of a new session.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ─── Stats ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransmissionStats {
    /// Packets handed to the send engine (one per record, not per attempt).
    pub packets_attempted: u64,
    pub packets_succeeded: u64,
    pub packets_failed: u64,
    /// Extra attempts beyond the first, across all packets.
    pub retransmissions: u64,
    /// Wire bytes (header + payload) of delivered packets.
    pub bytes_sent: u64,
    /// When the logical connection was first established.
    pub connected_at: Option<DateTime<Utc>>,
}

impl TransmissionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A packet went through after `attempts` tries.
    pub fn record_success(&mut self, bytes: usize, attempts: u32) {
        self.packets_attempted += 1;
        self.packets_succeeded += 1;
        self.bytes_sent += bytes as u64;
        self.retransmissions += u64::from(attempts.saturating_sub(1));
    }

    /// A packet was abandoned after `attempts` tries.
    pub fn record_failure(&mut self, attempts: u32) {
        self.packets_attempted += 1;
        self.packets_failed += 1;
        self.retransmissions += u64::from(attempts.saturating_sub(1));
    }

    /// Stamp the first connection time; later calls keep the original.
    pub fn mark_connected(&mut self, at: DateTime<Utc>) {
        self.connected_at.get_or_insert(at);
    }

    /// Delivery success percentage, `None` before the first packet.
    pub fn success_rate(&self) -> Option<f64> {
        if self.packets_attempted == 0 {
            None
        } else {
            Some(self.packets_succeeded as f64 / self.packets_attempted as f64 * 100.0)
        }
    }

    /// Retransmissions per attempted packet.
    pub fn avg_retransmissions(&self) -> f64 {
        if self.packets_attempted == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.packets_attempted as f64
        }
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        self.connected_at
            .and_then(|t| (now - t).to_std().ok())
            .unwrap_or_default()
    }

    pub fn rating(&self) -> DeliveryRating {
        DeliveryRating::from_success_rate(self.success_rate().unwrap_or(0.0))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_attempted: self.packets_attempted,
            packets_succeeded: self.packets_succeeded,
            packets_failed: self.packets_failed,
            retransmissions: self.retransmissions,
            bytes_sent: self.bytes_sent,
            success_rate: self.success_rate().unwrap_or(0.0),
            avg_retransmissions: self.avg_retransmissions(),
            uptime_secs: self.uptime(Utc::now()).as_secs(),
            rating: self.rating(),
        }
    }
}

// ─── Rating ─────────────────────────────────────────────────────────────────

/// Overall delivery rating from the success percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl DeliveryRating {
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 95.0 {
            DeliveryRating::Excellent
        } else if rate >= 85.0 {
            DeliveryRating::Good
        } else if rate >= 70.0 {
            DeliveryRating::Fair
        } else {
            DeliveryRating::Poor
        }
    }
}

impl fmt::Display for DeliveryRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryRating::Excellent => "excellent",
            DeliveryRating::Good => "good",
            DeliveryRating::Fair => "fair",
            DeliveryRating::Poor => "poor",
        })
    }
}

/// Serializable point-in-time view with the derived figures filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub packets_attempted: u64,
    pub packets_succeeded: u64,
    pub packets_failed: u64,
    pub retransmissions: u64,
    pub bytes_sent: u64,
    pub success_rate: f64,
    pub avg_retransmissions: f64,
    pub uptime_secs: u64,
    pub rating: DeliveryRating,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_history_has_no_rate() {
        let stats = TransmissionStats::new();
        assert_eq!(stats.success_rate(), None);
        assert_eq!(stats.avg_retransmissions(), 0.0);
        assert_eq!(stats.rating(), DeliveryRating::Poor);
    }

    #[test]
    fn success_after_retries_counts_retransmissions() {
        let mut stats = TransmissionStats::new();
        stats.record_success(120, 3);
        assert_eq!(stats.packets_attempted, 1);
        assert_eq!(stats.packets_succeeded, 1);
        assert_eq!(stats.retransmissions, 2);
        assert_eq!(stats.bytes_sent, 120);
        assert_eq!(stats.success_rate(), Some(100.0));
    }

    #[test]
    fn failure_counts_budget_minus_one() {
        let mut stats = TransmissionStats::new();
        stats.record_failure(5);
        assert_eq!(stats.packets_failed, 1);
        assert_eq!(stats.retransmissions, 4);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.success_rate(), Some(0.0));
    }

    #[test]
    fn rating_thresholds() {
        assert_eq!(DeliveryRating::from_success_rate(100.0), DeliveryRating::Excellent);
        assert_eq!(DeliveryRating::from_success_rate(95.0), DeliveryRating::Excellent);
        assert_eq!(DeliveryRating::from_success_rate(90.0), DeliveryRating::Good);
        assert_eq!(DeliveryRating::from_success_rate(70.0), DeliveryRating::Fair);
        assert_eq!(DeliveryRating::from_success_rate(69.9), DeliveryRating::Poor);
    }

    #[test]
    fn first_connection_time_sticks() {
        let mut stats = TransmissionStats::new();
        let first = Utc::now();
        stats.mark_connected(first);
        stats.mark_connected(first + chrono::Duration::seconds(30));
        assert_eq!(stats.connected_at, Some(first));
        let later = first + chrono::Duration::seconds(90);
        assert_eq!(stats.uptime(later), Duration::from_secs(90));
    }

    #[test]
    fn snapshot_serializes() {
        let mut stats = TransmissionStats::new();
        stats.record_success(10, 1);
        stats.record_failure(2);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["success_rate"], 50.0);
        assert_eq!(json["rating"], "poor");
    }
}
