//! Synthetic forecasts and ephemeris tables for offline runs (`FAKE_DATA=1`).
//!
//! Output is deterministic for a given seed and start hour.

use crate::models::astro::{EphemerisPoint, EphemerisTable, MoonState, Target, TargetKind};
use crate::models::weather::{AtmosphericSample, Location};
use crate::utils::floor_to_hour;
use chrono::{DateTime, Duration, Timelike, Utc};
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

pub const DEFAULT_SEED: u64 = 0x5EE1_0042_1337_BEEF;
/// Hours between two passing weather fronts.
const FRONT_PERIOD_HOURS: f64 = 38.0;
const LUNAR_DAY_HOURS: f64 = 24.84;
const SYNODIC_MONTH_HOURS: f64 = 29.53 * 24.0;

/// Hourly samples starting at the hour containing `start`.
pub fn generate_forecast(start: DateTime<Utc>, hours: u32, seed: u64) -> Vec<AtmosphericSample> {
    let start = floor_to_hour(start);
    let mut rng = SmallRng::seed_from_u64(seed);
    let front_phase = rng.random_range(0.0..(2.0 * PI));
    let jet_phase = rng.random_range(0.0..(2.0 * PI));

    let samples: Vec<AtmosphericSample> = (0..hours)
        .map(|h| {
            let timestamp = start + Duration::hours(i64::from(h));
            let elapsed = f64::from(h);
            let day_fraction = f64::from(timestamp.hour()) / 24.0;
            // 0 = clear high pressure, 1 = front overhead
            let front = ((elapsed / FRONT_PERIOD_HOURS * 2.0 * PI + front_phase).sin() + 1.0) / 2.0;

            let cloud_cover = compute_cloud_cover(front, &mut rng);
            let temperature = compute_temperature(day_fraction, cloud_cover, &mut rng);
            let spread = compute_dew_point_spread(day_fraction, front, &mut rng);
            let wind_speed = (4.0 + front * 22.0 + rng.random_range(-2.5..=2.5)).max(0.0);
            let wind_gust = wind_speed + rng.random_range(0.0..=4.0 + front * 12.0);
            let wind_80m = wind_speed * rng.random_range(1.1..=1.9);
            let jet = 18.0 + 22.0 * ((elapsed / 60.0 * 2.0 * PI + jet_phase).sin() + 1.0) + rng.random_range(-4.0..=4.0);
            let precipitation_probability = ((cloud_cover - 55.0) * 2.0 + rng.random_range(-10.0..=10.0)).clamp(0.0, 100.0);
            let precipitation = if cloud_cover > 85.0 && rng.random_bool(precipitation_probability / 100.0) {
                rng.random_range(0.1..=3.5)
            } else {
                0.0
            };

            AtmosphericSample {
                timestamp,
                temperature,
                dew_point: temperature - spread,
                humidity: relative_humidity(spread),
                cloud_cover,
                wind_speed,
                wind_gust,
                wind_shear: (wind_80m - wind_speed) / 3.6,
                // upper-air data occasionally absent, like the real provider
                jet_stream_speed: (!rng.random_bool(0.05)).then_some(jet.max(0.0)),
                precipitation_probability,
                precipitation,
            }
        })
        .collect();

    info!("Fake data: generated {} synthetic hour(s) from {}", samples.len(), start);
    samples
}

fn compute_cloud_cover(front: f64, rng: &mut SmallRng) -> f64 {
    let base = (front - 0.35).max(0.0) / 0.65 * 100.0;
    let patchy = rng.random_range(-12.0..=12.0);
    (base + patchy).clamp(0.0, 100.0)
}

fn compute_temperature(day_fraction: f64, cloud_cover: f64, rng: &mut SmallRng) -> f64 {
    let diurnal = ((day_fraction - 0.375) * 2.0 * PI).sin() * 6.0;
    // clouds damp the night-time drop
    let insulation = if diurnal < 0.0 { -diurnal * cloud_cover / 200.0 } else { 0.0 };
    (14.0 + diurnal + insulation + rng.random_range(-1.0..=1.0)).clamp(-15.0, 38.0)
}

fn compute_dew_point_spread(day_fraction: f64, front: f64, rng: &mut SmallRng) -> f64 {
    let diurnal = ((day_fraction - 0.375) * 2.0 * PI).sin() * 3.0;
    (9.0 - front * 7.0 + diurnal + rng.random_range(-1.5..=1.5)).max(0.2)
}

/// Rough relative humidity from the dew point spread.
fn relative_humidity(spread: f64) -> f64 {
    (100.0 - 5.0 * spread).clamp(5.0, 100.0)
}

/// Smooth target and moon tracks good enough for demos. Not astronomy.
pub fn generate_ephemeris(start: DateTime<Utc>, hours: u32, target: Target, seed: u64) -> EphemerisTable {
    let start = floor_to_hour(start);
    let mut rng = SmallRng::seed_from_u64(seed ^ 0xA57E);
    let culmination_hour = rng.random_range(20.0..26.0);
    let peak_altitude = rng.random_range(45.0..80.0);
    let moon_offset = rng.random_range(0.0..LUNAR_DAY_HOURS);
    let phase_offset = rng.random_range(0.0..SYNODIC_MONTH_HOURS);

    let points = (0..hours)
        .map(|h| {
            let time = start + Duration::hours(i64::from(h));
            let clock = f64::from(time.hour());
            let angle = (clock - culmination_hour) / 24.0 * 2.0 * PI;
            let altitude = (peak_altitude + 30.0) * angle.cos() - 30.0;
            let azimuth = (180.0 + 100.0 * angle.sin()).rem_euclid(360.0);
            // lowest at 00:00 UTC, like a site near the prime meridian
            let sun_altitude = 50.0 * ((clock - 12.0) / 24.0 * 2.0 * PI).cos() - 10.0;

            let elapsed = f64::from(h);
            let moon_angle = (elapsed + moon_offset) / LUNAR_DAY_HOURS * 2.0 * PI;
            let moon_altitude = 85.0 * moon_angle.cos() - 25.0;
            let moon_azimuth = (180.0 + 100.0 * moon_angle.sin()).rem_euclid(360.0);
            let phase = (elapsed + phase_offset) / SYNODIC_MONTH_HOURS * 2.0 * PI;
            let illumination = (1.0 - phase.cos()) / 2.0 * 100.0;

            EphemerisPoint {
                time,
                altitude,
                azimuth,
                airmass: None,
                sun_altitude: Some(sun_altitude),
                moon: Some(MoonState {
                    illumination,
                    altitude: moon_altitude,
                    angular_separation: Some(angular_separation(altitude, azimuth, moon_altitude, moon_azimuth)),
                }),
            }
        })
        .collect();

    EphemerisTable { target, points }
}

/// Great-circle distance (°) between two alt/az positions.
pub fn angular_separation(alt1: f64, az1: f64, alt2: f64, az2: f64) -> f64 {
    let (a1, a2) = (alt1.to_radians(), alt2.to_radians());
    let daz = (az1 - az2).abs().to_radians();
    let cos = a1.sin() * a2.sin() + a1.cos() * a2.cos() * daz.cos();
    cos.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Distinct, stable seed per site so compared locations differ.
pub fn seed_for(location: &Location) -> u64 {
    let lat = (location.latitude * 100.0).round() as i64 as u64;
    let lon = (location.longitude * 100.0).round() as i64 as u64;
    DEFAULT_SEED ^ lat.rotate_left(32) ^ lon
}

/// Default demo target when no ephemeris file is configured.
pub fn demo_target() -> Target {
    Target {
        name: "M42".to_string(),
        kind: TargetKind::Nebula,
    }
}
