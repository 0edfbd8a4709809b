//! Maps one atmospheric sample onto per-factor subscores (0..=100).
//!
//! Every transfer function clamps its input into the valid domain first, so
//! the functions are total: out-of-range or non-finite readings never fail
//! and never produce NaN.

use crate::models::seeing::ComponentScores;
use crate::models::weather::AtmosphericSample;
use crate::utils::{clamp_finite, piecewise};

/// Temperature minus dew point (°C) to subscore. Peaks in the 10–15 °C band.
const TEMP_DIFFERENTIAL_CURVE: [(f64, f64); 8] = [
    (0.0, 10.0),
    (2.0, 20.0),
    (5.0, 40.0),
    (8.0, 90.0),
    (10.0, 100.0),
    (15.0, 100.0),
    (20.0, 80.0),
    (30.0, 50.0),
];
const TEMP_DIFFERENTIAL_MAX: f64 = 30.0;

const HUMIDITY_CURVE: [(f64, f64); 6] = [
    (30.0, 100.0),
    (50.0, 85.0),
    (70.0, 60.0),
    (85.0, 35.0),
    (95.0, 15.0),
    (100.0, 0.0),
];

/// Jet stream speed (m/s) to subscore; calm below 15 m/s.
const JET_STREAM_CURVE: [(f64, f64); 5] = [(15.0, 100.0), (30.0, 85.0), (45.0, 60.0), (60.0, 35.0), (100.0, 10.0)];
const JET_STREAM_MAX: f64 = 100.0;
const JET_STREAM_UNKNOWN: f64 = 75.0;

// (ceiling, largest fractional loss) for each wind input
const WIND_SPEED_KMH: (f64, f64) = (50.0, 0.8);
const GUST_EXCESS_KMH: (f64, f64) = (30.0, 0.5);
const WIND_SHEAR_MS: (f64, f64) = (3.0, 0.9);

pub fn normalize(sample: &AtmosphericSample) -> ComponentScores {
    ComponentScores {
        wind: wind_score(sample.wind_speed, sample.wind_gust, sample.wind_shear),
        temp_differential: temp_differential_score(sample.temperature - sample.dew_point),
        cloud: cloud_score(sample.cloud_cover),
        humidity: humidity_score(sample.humidity),
        jet_stream: jet_stream_score(sample.jet_stream_speed),
    }
}

pub fn temp_differential_score(differential: f64) -> f64 {
    let d = clamp_finite(differential, 0.0, TEMP_DIFFERENTIAL_MAX);
    piecewise(d, &TEMP_DIFFERENTIAL_CURVE)
}

/// Surface wind, gust excess over the mean wind, and low-level shear.
/// Each input saturates at its ceiling; the subscore never rises with any of them.
pub fn wind_score(speed_kmh: f64, gust_kmh: f64, shear_ms: f64) -> f64 {
    let speed = clamp_finite(speed_kmh, 0.0, f64::MAX);
    let gust = clamp_finite(gust_kmh, 0.0, f64::MAX);
    let shear = clamp_finite(shear_ms, 0.0, f64::MAX);
    let excess = (gust - speed).max(0.0);

    let score = 100.0
        * retained_fraction(speed, WIND_SPEED_KMH)
        * retained_fraction(excess, GUST_EXCESS_KMH)
        * retained_fraction(shear, WIND_SHEAR_MS);
    clamp_finite(score, 0.0, 100.0)
}

fn retained_fraction(value: f64, (ceiling, max_loss): (f64, f64)) -> f64 {
    1.0 - max_loss * (value / ceiling).min(1.0)
}

pub fn cloud_score(cloud_cover: f64) -> f64 {
    100.0 - clamp_finite(cloud_cover, 0.0, 100.0)
}

pub fn humidity_score(humidity: f64) -> f64 {
    piecewise(clamp_finite(humidity, 0.0, 100.0), &HUMIDITY_CURVE)
}

pub fn jet_stream_score(speed_ms: Option<f64>) -> f64 {
    match speed_ms {
        Some(v) if !v.is_nan() => piecewise(clamp_finite(v, 0.0, JET_STREAM_MAX), &JET_STREAM_CURVE),
        _ => JET_STREAM_UNKNOWN,
    }
}
