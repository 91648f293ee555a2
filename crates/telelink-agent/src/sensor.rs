//! Synthetic environment-monitor readings.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SensorReading {
    pub device_id: String,
    pub timestamp: String,
    pub location: String,
    pub sensor_type: &'static str,
    /// °C
    pub temperature: f64,
    /// %RH
    pub humidity: f64,
    /// hPa
    pub pressure: f64,
    /// V
    pub voltage: f64,
    /// Raw signal level 0–31 (99 unknown).
    pub signal_strength: u8,
    pub channel_quality: u8,
    /// %
    pub battery_level: u8,
    pub status: &'static str,
}

fn round(value: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (value * f).round() / f
}

pub struct SensorSource {
    device_id: String,
    location: String,
}

impl SensorSource {
    pub fn new(device_id: impl Into<String>, location: impl Into<String>) -> Self {
        SensorSource {
            device_id: device_id.into(),
            location: location.into(),
        }
    }

    /// One reading, tagged with the current link figures.
    pub fn read(&self, signal_strength: u8, channel_quality: u8) -> SensorReading {
        let mut rng = rand::rng();
        SensorReading {
            device_id: self.device_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            location: self.location.clone(),
            sensor_type: "environment_monitor",
            temperature: round(rng.random_range(18.0..35.0), 2),
            humidity: round(rng.random_range(30.0..80.0), 2),
            pressure: round(rng.random_range(1000.0..1020.0), 2),
            voltage: round(rng.random_range(3.2..4.2), 3),
            signal_strength,
            channel_quality,
            battery_level: rng.random_range(20..=100),
            status: "normal",
        }
    }
}
