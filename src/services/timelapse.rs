//! Multi-hour imaging windows: good seeing while the target stays high.
//!
//! The window itself comes from the same run scan as the best-window search,
//! with target altitude added to the predicate. The moon is only reported on,
//! it never disqualifies a window.

use crate::models::astro::{MoonState, TargetGeometry};
use crate::models::seeing::Window;
use crate::services::series::ScoredSeries;
use crate::services::windows::{DEFAULT_MAX_ALTERNATES, find_runs, pick};
use crate::utils::clamp_finite;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;

/// Separation assumed when the ephemeris does not provide one.
const UNKNOWN_SEPARATION: f64 = 90.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterferenceSeverity {
    None,
    Minor,
    Moderate,
    Severe,
}

impl InterferenceSeverity {
    pub fn label(self) -> &'static str {
        match self {
            InterferenceSeverity::None => "None",
            InterferenceSeverity::Minor => "Minor",
            InterferenceSeverity::Moderate => "Moderate",
            InterferenceSeverity::Severe => "Severe",
        }
    }

    pub fn assess(illumination: f64, avg_altitude: f64, min_separation: f64) -> Self {
        if !(avg_altitude > 0.0) {
            return InterferenceSeverity::None;
        }
        if illumination < 20.0 {
            return if min_separation > 30.0 {
                InterferenceSeverity::None
            } else {
                InterferenceSeverity::Minor
            };
        }
        let illum = clamp_finite(illumination, 0.0, 100.0) / 100.0;
        let alt = clamp_finite(avg_altitude / 45.0, 0.0, 1.0);
        let closeness = (1.0 - min_separation / 90.0).max(0.0);
        match illum * alt * (1.0 + closeness) {
            s if s < 0.2 => InterferenceSeverity::None,
            s if s < 0.4 => InterferenceSeverity::Minor,
            s if s < 0.7 => InterferenceSeverity::Moderate,
            _ => InterferenceSeverity::Severe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AltitudeProfile {
    pub start_altitude: f64,
    pub end_altitude: f64,
    pub start_azimuth: f64,
    pub end_azimuth: f64,
    pub peak_altitude: f64,
    pub peak_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoonInterference {
    pub rises_at: Option<DateTime<Utc>>,
    pub sets_at: Option<DateTime<Utc>>,
    /// Illumination at the middle of the window.
    pub illumination: f64,
    pub illumination_min: f64,
    pub illumination_max: f64,
    pub min_angular_separation: Option<f64>,
    pub avg_altitude: f64,
    pub severity: InterferenceSeverity,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelapsePlan {
    pub window: Window,
    pub altitude: AltitudeProfile,
    /// `None` when no moon state is known inside the window.
    pub moon: Option<MoonInterference>,
    pub alternates: Vec<Window>,
}

pub fn plan_timelapse(
    series: &ScoredSeries,
    geometries: &BTreeMap<DateTime<Utc>, TargetGeometry>,
    moon_states: &BTreeMap<DateTime<Utc>, MoonState>,
    min_duration: Duration,
    min_altitude: f64,
    min_score: u8,
) -> Option<TimelapsePlan> {
    let ranked = find_runs(
        series,
        |p| {
            p.score.overall >= min_score
                && geometries
                    .get(&p.timestamp())
                    .is_some_and(|g| g.is_above_horizon && g.altitude >= min_altitude)
        },
        min_duration,
    );
    debug!(
        "Timelapse search (min_score={}, min_altitude={}°): {} candidate run(s)",
        min_score,
        min_altitude,
        ranked.len()
    );

    let search = pick(ranked, DEFAULT_MAX_ALTERNATES);
    let window = search.best?;

    let times: Vec<DateTime<Utc>> = window.indices().map(|i| series.points[i].timestamp()).collect();
    let altitude = altitude_profile(&times, geometries)?;
    let moon = moon_interference(&times, moon_states);
    if let Some(m) = &moon {
        info!(
            "Timelapse window {} - {}: moon interference {}",
            window.start,
            window.end,
            m.severity.label()
        );
    }

    Some(TimelapsePlan {
        window,
        altitude,
        moon,
        alternates: search.alternates,
    })
}

fn altitude_profile(
    times: &[DateTime<Utc>],
    geometries: &BTreeMap<DateTime<Utc>, TargetGeometry>,
) -> Option<AltitudeProfile> {
    let first = geometries.get(times.first()?)?;
    let last = geometries.get(times.last()?)?;
    let (peak_time, peak) = times
        .iter()
        .filter_map(|t| geometries.get(t).map(|g| (*t, g)))
        .fold(None::<(DateTime<Utc>, &TargetGeometry)>, |best, (t, g)| match best {
            Some((_, b)) if b.altitude >= g.altitude => best,
            _ => Some((t, g)),
        })?;
    Some(AltitudeProfile {
        start_altitude: first.altitude,
        end_altitude: last.altitude,
        start_azimuth: first.azimuth,
        end_azimuth: last.azimuth,
        peak_altitude: peak.altitude,
        peak_time,
    })
}

pub fn moon_interference(
    times: &[DateTime<Utc>],
    moon_states: &BTreeMap<DateTime<Utc>, MoonState>,
) -> Option<MoonInterference> {
    let known: Vec<(DateTime<Utc>, &MoonState)> =
        times.iter().filter_map(|t| moon_states.get(t).map(|m| (*t, m))).collect();
    if known.is_empty() {
        return None;
    }

    let mut rises_at = None;
    let mut sets_at = None;
    for pair in known.windows(2) {
        let (prev, (t, cur)) = (pair[0].1, pair[1]);
        if !prev.is_up() && cur.is_up() && rises_at.is_none() {
            rises_at = Some(t);
        } else if prev.is_up() && !cur.is_up() && sets_at.is_none() {
            sets_at = Some(t);
        }
    }

    let illumination = known[known.len() / 2].1.illumination;
    let illumination_min = known.iter().map(|(_, m)| m.illumination).fold(f64::INFINITY, f64::min);
    let illumination_max = known.iter().map(|(_, m)| m.illumination).fold(f64::NEG_INFINITY, f64::max);
    let avg_altitude = known.iter().map(|(_, m)| m.altitude).sum::<f64>() / known.len() as f64;
    let min_angular_separation = known
        .iter()
        .filter_map(|(_, m)| m.angular_separation)
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.min(s))));

    let severity = InterferenceSeverity::assess(
        illumination,
        avg_altitude,
        min_angular_separation.unwrap_or(UNKNOWN_SEPARATION),
    );

    let mut warnings = Vec::new();
    if let Some(t) = rises_at {
        warnings.push(format!("Moon rises at {} UTC ({:.0}% illuminated)", t.format("%H:%M"), illumination));
    }
    if let Some(t) = sets_at {
        warnings.push(format!("Moon sets at {} UTC ({:.0}% illuminated)", t.format("%H:%M"), illumination));
    }
    if severity != InterferenceSeverity::None {
        let separation = min_angular_separation
            .map(|s| format!("{:.0}° from target", s))
            .unwrap_or_else(|| "separation unknown".to_string());
        warnings.push(format!("Moon {}: {} interference", separation, severity.label()));
    }
    if severity >= InterferenceSeverity::Moderate {
        warnings.push("Consider adjusting session times to avoid moonlight".to_string());
    }

    Some(MoonInterference {
        rises_at,
        sets_at,
        illumination,
        illumination_min,
        illumination_max,
        min_angular_separation,
        avg_altitude,
        severity,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::series::tests::{hour, series_from_scores};

    fn geometries(altitudes: &[f64]) -> BTreeMap<DateTime<Utc>, TargetGeometry> {
        altitudes
            .iter()
            .enumerate()
            .map(|(h, alt)| (hour(h as i64), TargetGeometry::from_altitude(*alt, 90.0 + 10.0 * h as f64)))
            .collect()
    }

    fn moon(illumination: f64, altitude: f64, separation: f64) -> MoonState {
        MoonState {
            illumination,
            altitude,
            angular_separation: Some(separation),
        }
    }

    #[test]
    fn plan_respects_score_and_altitude() {
        let series = series_from_scores(&[Some(90), Some(90), Some(80), Some(75), Some(70), Some(85), Some(40), Some(90)]);
        let geo = geometries(&[10.0, 25.0, 35.0, 45.0, 50.0, 42.0, 38.0, 31.0]);
        let plan = plan_timelapse(&series, &geo, &BTreeMap::new(), Duration::hours(3), 30.0, 60).expect("plan");

        assert_eq!(plan.window.start, hour(2));
        assert_eq!(plan.window.last_sample, hour(5));
        for i in plan.window.indices() {
            let p = &series.points[i];
            assert!(p.score.overall >= 60);
            assert!(geo[&p.timestamp()].altitude >= 30.0);
        }
        assert_eq!(plan.altitude.start_altitude, 35.0);
        assert_eq!(plan.altitude.end_altitude, 42.0);
        assert_eq!(plan.altitude.peak_altitude, 50.0);
        assert_eq!(plan.altitude.peak_time, hour(4));
        assert!(plan.moon.is_none());
        assert!(plan.alternates.is_empty());
    }

    #[test]
    fn low_target_yields_no_plan() {
        let series = series_from_scores(&[Some(95); 6]);
        let geo = geometries(&[5.0, 10.0, 20.0, 25.0, 20.0, 10.0]);
        assert!(plan_timelapse(&series, &geo, &BTreeMap::new(), Duration::hours(2), 30.0, 50).is_none());
    }

    #[test]
    fn missing_geometry_never_qualifies() {
        let series = series_from_scores(&[Some(95); 4]);
        assert!(plan_timelapse(&series, &BTreeMap::new(), &BTreeMap::new(), Duration::zero(), 0.0, 0).is_none());
    }

    #[test]
    fn moonrise_inside_window_is_reported() {
        let series = series_from_scores(&[Some(80); 5]);
        let geo = geometries(&[60.0; 5]);
        let moons: BTreeMap<_, _> = [
            (hour(0), moon(85.0, -10.0, 70.0)),
            (hour(1), moon(85.0, -2.0, 65.0)),
            (hour(2), moon(86.0, 8.0, 60.0)),
            (hour(3), moon(86.0, 20.0, 55.0)),
            (hour(4), moon(87.0, 32.0, 50.0)),
        ]
        .into_iter()
        .collect();

        let plan = plan_timelapse(&series, &geo, &moons, Duration::hours(4), 30.0, 70).expect("plan");
        let m = plan.moon.expect("moon report");
        assert_eq!(m.rises_at, Some(hour(2)));
        assert_eq!(m.sets_at, None);
        assert_eq!(m.illumination, 86.0);
        assert_eq!(m.illumination_min, 85.0);
        assert_eq!(m.illumination_max, 87.0);
        assert_eq!(m.min_angular_separation, Some(50.0));
        assert!((m.avg_altitude - 9.6).abs() < 1e-9);
        assert_eq!(m.severity, InterferenceSeverity::Minor);
        assert!(m.warnings[0].starts_with("Moon rises at"));
        // interference is advisory only
        assert_eq!(plan.window.sample_count, 5);
    }

    #[test]
    fn moon_below_horizon_is_harmless() {
        let times: Vec<_> = (0..3).map(hour).collect();
        let moons: BTreeMap<_, _> = times.iter().map(|t| (*t, moon(100.0, -20.0, 10.0))).collect();
        let m = moon_interference(&times, &moons).expect("moon report");
        assert_eq!(m.severity, InterferenceSeverity::None);
        assert!(m.warnings.is_empty());
        assert_eq!(m.rises_at, None);
    }

    #[test]
    fn severity_levels() {
        assert_eq!(InterferenceSeverity::assess(100.0, -5.0, 5.0), InterferenceSeverity::None);
        assert_eq!(InterferenceSeverity::assess(10.0, 40.0, 50.0), InterferenceSeverity::None);
        assert_eq!(InterferenceSeverity::assess(10.0, 40.0, 20.0), InterferenceSeverity::Minor);
        assert_eq!(InterferenceSeverity::assess(30.0, 45.0, 90.0), InterferenceSeverity::Minor);
        assert_eq!(InterferenceSeverity::assess(60.0, 45.0, 90.0), InterferenceSeverity::Moderate);
        assert_eq!(InterferenceSeverity::assess(100.0, 60.0, 30.0), InterferenceSeverity::Severe);
        assert_eq!(InterferenceSeverity::assess(25.0, 10.0, 120.0), InterferenceSeverity::None);
    }
}
