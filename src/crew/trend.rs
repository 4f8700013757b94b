//! Synthetic 24-hour vital trends
//!
//! One value per hour, scattered around a per-vital baseline. Scatter and
//! late-shift drift grow with the crew member's risk level. The generator is
//! seeded from the crew id and vital name, so repeated calls agree.

use super::models::{RiskLevel, TrendPoint};
use crate::error::DataError;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const TREND_HOURS: usize = 24;
/// Drift starts after this hour of the shift
pub const DRIFT_START_HOUR: usize = 18;
const DRIFT_PER_HOUR: f64 = 1.5;
const NOISE_SPAN: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vital {
    HeartRate,
    BpSystolic,
    BpDiastolic,
    Spo2,
}

impl Vital {
    pub const ALL: [Vital; 4] = [Vital::HeartRate, Vital::BpSystolic, Vital::BpDiastolic, Vital::Spo2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vital::HeartRate => "heart_rate",
            Vital::BpSystolic => "bp_systolic",
            Vital::BpDiastolic => "bp_diastolic",
            Vital::Spo2 => "spo2",
        }
    }

    pub fn baseline(&self) -> f64 {
        match self {
            Vital::HeartRate => 75.0,
            Vital::BpSystolic => 120.0,
            Vital::BpDiastolic => 80.0,
            Vital::Spo2 => 98.0,
        }
    }

    /// Oxygen saturation worsens downward, everything else upward
    fn worsening_sign(&self) -> f64 {
        match self {
            Vital::Spo2 => -1.0,
            _ => 1.0,
        }
    }

    fn ceiling(&self) -> Option<f64> {
        match self {
            Vital::Spo2 => Some(100.0),
            _ => None,
        }
    }
}

impl fmt::Display for Vital {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vital {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vital::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| DataError::UnknownVital(s.to_string()))
    }
}

fn seed_for(crew_id: &str, vital: Vital) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(crew_id.as_bytes());
    hasher.update(b":");
    hasher.update(vital.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

/// Generate the hourly series for one crew member and vital
pub fn generate(crew_id: &str, vital: Vital, risk: RiskLevel) -> Vec<TrendPoint> {
    let factor = risk.trend_factor();
    let mut rng = StdRng::seed_from_u64(seed_for(crew_id, vital));

    (0..TREND_HOURS)
        .map(|hour| {
            let noise = (rng.gen::<f64>() - 0.5) * NOISE_SPAN * factor;
            let drift = if hour > DRIFT_START_HOUR {
                (hour - DRIFT_START_HOUR) as f64 * DRIFT_PER_HOUR * (factor - 1.0)
            } else {
                0.0
            };
            let mut value = (vital.baseline() + noise + vital.worsening_sign() * drift).round();
            if let Some(ceiling) = vital.ceiling() {
                value = value.min(ceiling);
            }
            TrendPoint {
                hour: format!("{}:00", hour),
                value,
            }
        })
        .collect()
}
