//! Per-cycle pacing and the statistics printed while running and at exit.

use std::time::Duration;

use telelink::quality::QualityTier;
use telelink::stats::StatsSnapshot;
use tracing::info;

/// Wait before the next reading: `max(floor, base − score/2 s)`.
pub fn cycle_interval(base: Duration, floor: Duration, quality_score: u8) -> Duration {
    base.saturating_sub(Duration::from_secs(u64::from(quality_score / 2)))
        .max(floor)
}

pub fn log_cycle(cycle: u64, stats: &StatsSnapshot, pending: usize) {
    info!(
        cycle,
        attempted = stats.packets_attempted,
        succeeded = stats.packets_succeeded,
        failed = stats.packets_failed,
        success_rate = format_args!("{:.1}", stats.success_rate),
        retransmissions = stats.retransmissions,
        pending,
        "cycle stats"
    );
}

pub fn advice(tier: QualityTier) -> &'static str {
    match tier {
        QualityTier::Excellent | QualityTier::Good => {
            "channel is stable; current profile is adequate"
        }
        QualityTier::Fair => "channel is marginal; consider improving antenna placement",
        QualityTier::Poor => {
            "channel is poor; check antenna, coverage and SIM before relying on this site"
        }
    }
}

/// Human-readable summary printed once at exit.
pub fn final_report(
    stats: &StatsSnapshot,
    tier: QualityTier,
    quality_score: u8,
    pending: usize,
    dropped: u64,
) -> String {
    format!(
        "\n=== telelink final report ===\n\
         uptime:            {}s\n\
         packets attempted: {}\n\
         packets delivered: {}\n\
         packets failed:    {}\n\
         success rate:      {:.1}%\n\
         retransmissions:   {} ({:.2} per packet)\n\
         bytes sent:        {}\n\
         delivery rating:   {}\n\
         channel quality:   {} ({})\n\
         pending records:   {}\n\
         dropped records:   {}\n\
         advice:            {}\n",
        stats.uptime_secs,
        stats.packets_attempted,
        stats.packets_succeeded,
        stats.packets_failed,
        stats.success_rate,
        stats.retransmissions,
        stats.avg_retransmissions,
        stats.bytes_sent,
        stats.rating,
        quality_score,
        tier,
        pending,
        dropped,
        advice(tier),
    )
}
