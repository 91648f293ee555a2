//! # Adaptive Transmission Profiles
//!
//! Maps a quality tier to one of four fixed presets. The selected profile is
//! replaced wholesale on every re-tune, never merged.
//!
//! | Tier      | Preset                    | Packet | Timeout | Retries | FEC | Compress |
//! |-----------|---------------------------|--------|---------|---------|-----|----------|
//! | Excellent | high-speed                | 2048   | 10 s    | 3       | no  | yes      |
//! | Good      | standard                  | 1024   | 15 s    | 5       | no  | no       |
//! | Fair      | conservative              | 512    | 20 s    | 8       | yes | no       |
//! | Poor      | enhanced error correction | 256    | 30 s    | 10      | yes | no       |

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::quality::QualityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    HighSpeed,
    Standard,
    Conservative,
    EnhancedErrorCorrection,
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileKind::HighSpeed => "high-speed",
            ProfileKind::Standard => "standard",
            ProfileKind::Conservative => "conservative",
            ProfileKind::EnhancedErrorCorrection => "enhanced-error-correction",
        })
    }
}

/// Transmission parameters in effect for a send.
///
/// `packet_size`, `chunk_size`, `fec` and `compress` are advisory: the codec
/// does not split or compress packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransmissionProfile {
    pub kind: ProfileKind,
    pub packet_size: usize,
    pub chunk_size: usize,
    /// Wait for the module's send result.
    pub timeout: Duration,
    /// Delivery attempts per packet (at least 1).
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `retry_delay × n`.
    pub retry_delay: Duration,
    pub fec: bool,
    pub compress: bool,
}

impl TransmissionProfile {
    pub fn high_speed() -> Self {
        TransmissionProfile {
            kind: ProfileKind::HighSpeed,
            packet_size: 2048,
            chunk_size: 1024,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            fec: false,
            compress: true,
        }
    }

    pub fn standard() -> Self {
        TransmissionProfile {
            kind: ProfileKind::Standard,
            packet_size: 1024,
            chunk_size: 512,
            timeout: Duration::from_secs(15),
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            fec: false,
            compress: false,
        }
    }

    pub fn conservative() -> Self {
        TransmissionProfile {
            kind: ProfileKind::Conservative,
            packet_size: 512,
            chunk_size: 256,
            timeout: Duration::from_secs(20),
            max_retries: 8,
            retry_delay: Duration::from_secs(2),
            fec: true,
            compress: false,
        }
    }

    pub fn enhanced_error_correction() -> Self {
        TransmissionProfile {
            kind: ProfileKind::EnhancedErrorCorrection,
            packet_size: 256,
            chunk_size: 128,
            timeout: Duration::from_secs(30),
            max_retries: 10,
            retry_delay: Duration::from_secs(2),
            fec: true,
            compress: false,
        }
    }
}

impl Default for TransmissionProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// The four presets, one per tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    pub high_speed: TransmissionProfile,
    pub standard: TransmissionProfile,
    pub conservative: TransmissionProfile,
    pub enhanced: TransmissionProfile,
}

impl Default for ProfileTable {
    fn default() -> Self {
        ProfileTable {
            high_speed: TransmissionProfile::high_speed(),
            standard: TransmissionProfile::standard(),
            conservative: TransmissionProfile::conservative(),
            enhanced: TransmissionProfile::enhanced_error_correction(),
        }
    }
}

impl ProfileTable {
    /// Pure lookup: tier → preset.
    pub fn select(&self, tier: QualityTier) -> TransmissionProfile {
        match tier {
            QualityTier::Excellent => self.high_speed.clone(),
            QualityTier::Good => self.standard.clone(),
            QualityTier::Fair => self.conservative.clone(),
            QualityTier::Poor => self.enhanced.clone(),
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TransmissionProfile> {
        [
            &mut self.high_speed,
            &mut self.standard,
            &mut self.conservative,
            &mut self.enhanced,
        ]
        .into_iter()
    }
}
