//! # Channel Quality Monitor
//!
//! Composite channel quality score (0–100) from three diagnostic exchanges
//! and the running delivery history.
//!
//! $$\text{Score} = w_s \cdot \text{signal\%} + w_n \cdot \text{network} + w_h \cdot \text{success\%}$$
//!
//! where `network` is 30 when attached or registered, 10 when explicitly not,
//! 20 otherwise, and `success%` is 0 until the first packet has been tried.
//! A failed exchange leaves its metric at the previous value.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::CommandChannel;
use crate::config::TimeoutConfig;
use crate::protocol::{self, Registration, UNKNOWN};

// ─── Tiers ──────────────────────────────────────────────────────────────────

/// Stability tier derived from the quality score. Ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// What the tier says to do with the next payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    TransmitNormally,
    ReducePacketSize,
    Defer,
}

impl QualityTier {
    pub const EXCELLENT_MIN: u8 = 80;
    pub const GOOD_MIN: u8 = 60;
    pub const FAIR_MIN: u8 = 40;

    /// Total, monotonic mapping from score to tier.
    pub fn from_score(score: u8) -> Self {
        if score >= Self::EXCELLENT_MIN {
            QualityTier::Excellent
        } else if score >= Self::GOOD_MIN {
            QualityTier::Good
        } else if score >= Self::FAIR_MIN {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }

    pub fn action(self) -> RecommendedAction {
        match self {
            QualityTier::Excellent | QualityTier::Good => RecommendedAction::TransmitNormally,
            QualityTier::Fair => RecommendedAction::ReducePacketSize,
            QualityTier::Poor => RecommendedAction::Defer,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Fair => "fair",
            QualityTier::Poor => "poor",
        })
    }
}

// ─── Weights ────────────────────────────────────────────────────────────────

/// Weights for the composite quality score.
///
/// Network points top out at 30 and are weighted like the other terms, so
/// the defaults cap the score at 79: the excellent tier and the high-speed
/// profile are only reachable with a heavier signal, network or history
/// weight. [`QualityWeights::max_score`] gives the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    /// Weight for the signal percentage (default 0.5).
    pub signal: f64,
    /// Weight for the network points (default 0.3).
    pub network: f64,
    /// Weight for the delivery success percentage (default 0.2).
    pub history: f64,
}

impl QualityWeights {
    /// Best score these weights can produce.
    pub fn max_score(&self) -> u8 {
        compute_score(self, 31, None, Some(true), Some(100.0))
    }
}

impl Default for QualityWeights {
    fn default() -> Self {
        QualityWeights {
            signal: 0.5,
            network: 0.3,
            history: 0.2,
        }
    }
}

/// Signal level 0–31 as a percentage; unknown (99) maps to 0.
pub fn signal_percent(level: u8) -> f64 {
    if level == UNKNOWN || level > 31 {
        0.0
    } else {
        level as f64 / 31.0 * 100.0
    }
}

/// Network points: 30 attached/registered, 10 explicitly not, 20 otherwise.
///
/// Attachment, when known, overrides registration.
pub fn network_points(registration: Option<Registration>, attached: Option<bool>) -> f64 {
    match (attached, registration) {
        (Some(true), _) => 30.0,
        (Some(false), _) => 10.0,
        (None, Some(r)) if r.is_registered() => 30.0,
        (None, Some(r)) if r.is_unregistered() => 10.0,
        _ => 20.0,
    }
}

/// Composite score, clamped to [0, 100] and floored.
pub fn compute_score(
    weights: &QualityWeights,
    signal_level: u8,
    registration: Option<Registration>,
    attached: Option<bool>,
    success_rate: Option<f64>,
) -> u8 {
    let raw = weights.signal * signal_percent(signal_level)
        + weights.network * network_points(registration, attached)
        + weights.history * success_rate.unwrap_or(0.0);
    raw.clamp(0.0, 100.0).floor() as u8
}

// ─── Channel State ──────────────────────────────────────────────────────────

/// Latest view of the radio channel. Mutated only by [`QualityMonitor`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    /// 0–31, 99 unknown.
    pub signal_level: u8,
    /// 0–99, 99 unknown.
    pub bit_error: u8,
    pub registration: Option<Registration>,
    pub attached: Option<bool>,
    pub quality_score: u8,
    pub tier: QualityTier,
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            signal_level: UNKNOWN,
            bit_error: UNKNOWN,
            registration: None,
            attached: None,
            quality_score: 0,
            tier: QualityTier::Poor,
            last_update: None,
        }
    }
}

/// Result of one assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub timestamp: DateTime<Utc>,
    pub signal_level: u8,
    /// Signal level as a whole percentage.
    pub signal_quality: u8,
    pub bit_error: u8,
    pub registration: Option<Registration>,
    pub attached: Option<bool>,
    pub quality_score: u8,
    pub tier: QualityTier,
    pub action: RecommendedAction,
}

impl QualityReport {
    fn from_state(state: &ChannelState, timestamp: DateTime<Utc>) -> Self {
        QualityReport {
            timestamp,
            signal_level: state.signal_level,
            signal_quality: signal_percent(state.signal_level).floor() as u8,
            bit_error: state.bit_error,
            registration: state.registration,
            attached: state.attached,
            quality_score: state.quality_score,
            tier: state.tier,
            action: state.tier.action(),
        }
    }
}

// ─── Monitor ────────────────────────────────────────────────────────────────

/// Issues the diagnostic exchanges and scores the channel.
#[derive(Debug, Clone)]
pub struct QualityMonitor {
    weights: QualityWeights,
    timeouts: TimeoutConfig,
}

impl QualityMonitor {
    pub fn new(weights: QualityWeights, timeouts: TimeoutConfig) -> Self {
        QualityMonitor { weights, timeouts }
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    /// Run signal, registration and attachment queries and update `state`.
    ///
    /// `success_rate` is the delivery success percentage, `None` before the
    /// first attempt.
    pub fn assess(
        &self,
        channel: &mut CommandChannel,
        state: &mut ChannelState,
        success_rate: Option<f64>,
    ) -> QualityReport {
        let timeout = self.timeouts.query;

        match channel.exchange(protocol::SIGNAL_QUALITY, timeout) {
            Ok(reply) => match protocol::parse_signal_quality(&reply.lines) {
                Some(reading) => {
                    state.signal_level = reading.level;
                    state.bit_error = reading.bit_error;
                }
                None => debug!(reply = ?reply.lines, "unparseable signal reply, keeping previous"),
            },
            Err(e) => debug!(error = %e, "signal query failed, keeping previous"),
        }

        match channel.exchange(protocol::REGISTRATION, timeout) {
            Ok(reply) => match protocol::parse_registration(&reply.lines) {
                Some(reg) => state.registration = Some(reg),
                None => debug!(reply = ?reply.lines, "unparseable registration reply"),
            },
            Err(e) => debug!(error = %e, "registration query failed, keeping previous"),
        }

        match channel.exchange(protocol::ATTACHMENT, timeout) {
            Ok(reply) => match protocol::parse_attachment(&reply.lines) {
                Some(attached) => state.attached = Some(attached),
                None => debug!(reply = ?reply.lines, "unparseable attachment reply"),
            },
            Err(e) => debug!(error = %e, "attachment query failed, keeping previous"),
        }

        self.score(state, success_rate)
    }

    /// Recompute score and tier from the metrics already in `state`.
    pub fn score(&self, state: &mut ChannelState, success_rate: Option<f64>) -> QualityReport {
        let score = compute_score(
            &self.weights,
            state.signal_level,
            state.registration,
            state.attached,
            success_rate,
        );
        let tier = QualityTier::from_score(score);
        if tier != state.tier {
            info!(from = %state.tier, to = %tier, score, "channel tier changed");
        }
        state.quality_score = score;
        state.tier = tier;
        let now = Utc::now();
        state.last_update = Some(now);

        let report = QualityReport::from_state(state, now);
        debug!(
            signal = report.signal_level,
            signal_pct = report.signal_quality,
            ber = report.bit_error,
            registration = ?report.registration,
            attached = ?report.attached,
            score,
            %tier,
            "channel assessed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── Score Ceiling ──────────────────────────────────────────────────

    #[test]
    fn default_weights_cannot_reach_excellent() {
        let w = QualityWeights::default();
        assert_eq!(w.max_score(), 79);
        assert_eq!(QualityTier::from_score(w.max_score()), QualityTier::Good);
    }

    #[test]
    fn heavier_network_weight_reaches_excellent() {
        let w = QualityWeights {
            signal: 0.5,
            network: 1.0,
            history: 0.2,
        };
        assert_eq!(w.max_score(), 100);
        assert_eq!(QualityTier::from_score(w.max_score()), QualityTier::Excellent);
    }

    // ─── Tier Mapping ───────────────────────────────────────────────────

    #[test]
    fn tier_thresholds() {
        assert_eq!(QualityTier::from_score(100), QualityTier::Excellent);
        assert_eq!(QualityTier::from_score(80), QualityTier::Excellent);
        assert_eq!(QualityTier::from_score(79), QualityTier::Good);
        assert_eq!(QualityTier::from_score(60), QualityTier::Good);
        assert_eq!(QualityTier::from_score(59), QualityTier::Fair);
        assert_eq!(QualityTier::from_score(40), QualityTier::Fair);
        assert_eq!(QualityTier::from_score(39), QualityTier::Poor);
        assert_eq!(QualityTier::from_score(0), QualityTier::Poor);
    }

    #[test]
    fn tier_is_monotonic() {
        for q in 0..100u8 {
            assert!(QualityTier::from_score(q) <= QualityTier::from_score(q + 1));
        }
    }

    #[test]
    fn actions_per_tier() {
        assert_eq!(QualityTier::Excellent.action(), RecommendedAction::TransmitNormally);
        assert_eq!(QualityTier::Good.action(), RecommendedAction::TransmitNormally);
        assert_eq!(QualityTier::Fair.action(), RecommendedAction::ReducePacketSize);
        assert_eq!(QualityTier::Poor.action(), RecommendedAction::Defer);
    }

    // ─── Score ──────────────────────────────────────────────────────────

    #[test]
    fn unknown_signal_contributes_nothing() {
        assert_eq!(signal_percent(UNKNOWN), 0.0);
        assert_eq!(signal_percent(31), 100.0);
    }

    #[test]
    fn mid_signal_attached_without_history_is_poor() {
        let w = QualityWeights::default();
        let score = compute_score(&w, 15, Some(Registration::Home), Some(true), None);
        // 0.5 * 48.39 + 0.3 * 30 + 0
        assert_eq!(score, 33);
        assert_eq!(QualityTier::from_score(score), QualityTier::Poor);
        assert_eq!(QualityTier::from_score(score).action(), RecommendedAction::Defer);
    }

    #[test]
    fn network_points_precedence() {
        assert_eq!(network_points(Some(Registration::Denied), Some(true)), 30.0);
        assert_eq!(network_points(Some(Registration::Home), Some(false)), 10.0);
        assert_eq!(network_points(Some(Registration::Roaming), None), 30.0);
        assert_eq!(network_points(Some(Registration::Searching), None), 10.0);
        assert_eq!(network_points(Some(Registration::Unknown), None), 20.0);
        assert_eq!(network_points(None, None), 20.0);
    }

    #[test]
    fn history_raises_score() {
        let w = QualityWeights::default();
        let without = compute_score(&w, 31, None, Some(true), None);
        let with = compute_score(&w, 31, None, Some(true), Some(100.0));
        assert_eq!(without, 59);
        assert_eq!(with, 79);
    }

    #[test]
    fn score_is_clamped() {
        let w = QualityWeights {
            signal: 2.0,
            network: 2.0,
            history: 2.0,
        };
        assert_eq!(compute_score(&w, 31, None, Some(true), Some(100.0)), 100);
        let negative = QualityWeights {
            signal: -1.0,
            network: 0.0,
            history: 0.0,
        };
        assert_eq!(compute_score(&negative, 31, None, None, None), 0);
    }

    #[test]
    fn score_updates_state_and_timestamp() {
        let monitor = QualityMonitor::new(QualityWeights::default(), TimeoutConfig::default());
        let mut state = ChannelState {
            signal_level: 31,
            attached: Some(true),
            ..Default::default()
        };
        let report = monitor.score(&mut state, Some(50.0));
        assert_eq!(report.quality_score, 69);
        assert_eq!(state.tier, QualityTier::Good);
        assert!(state.last_update.is_some());
        assert_eq!(report.signal_quality, 100);
    }
}
