//! Target geometry and moon state as delivered by an external ephemeris.
//!
//! Nothing here computes celestial positions. Positions arrive either from a
//! caller or from an [`EphemerisTable`] file exported by an ephemeris tool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::Path;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Planet,
    Moon,
    Galaxy,
    Nebula,
    OpenCluster,
    GlobularCluster,
    PlanetaryNebula,
    SupernovaRemnant,
    Star,
    DoubleStar,
    Asteroid,
    Comet,
    Other,
}

impl TargetKind {
    /// Faint extended objects that lose contrast under moonlight.
    pub fn is_deep_sky(self) -> bool {
        matches!(
            self,
            TargetKind::Galaxy
                | TargetKind::Nebula
                | TargetKind::OpenCluster
                | TargetKind::GlobularCluster
                | TargetKind::PlanetaryNebula
                | TargetKind::SupernovaRemnant
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub altitude: f64,
    pub azimuth: f64,
    /// `None` when the target is at or below the horizon.
    pub airmass: Option<f64>,
    pub is_above_horizon: bool,
}

impl TargetGeometry {
    /// Geometry with airmass derived from altitude.
    pub fn from_altitude(altitude: f64, azimuth: f64) -> Self {
        TargetGeometry {
            altitude,
            azimuth,
            airmass: airmass_for_altitude(altitude),
            is_above_horizon: altitude > 0.0,
        }
    }
}

/// Kasten & Young (1989) relative airmass. Undefined at or below the horizon.
pub fn airmass_for_altitude(altitude_deg: f64) -> Option<f64> {
    if !(altitude_deg > 0.0) {
        return None;
    }
    let h = altitude_deg.min(90.0);
    let x = 1.0 / (h.to_radians().sin() + 0.50572 * (h + 6.07995).powf(-1.6364));
    Some(x.max(1.0))
}

/// Sun altitude (°) below which the sky counts as astronomically dark.
pub const ASTRONOMICAL_NIGHT_SUN_ALTITUDE: f64 = -18.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoonState {
    pub illumination: f64,
    pub altitude: f64,
    #[serde(default)]
    pub angular_separation: Option<f64>,
}

impl MoonState {
    pub fn is_up(&self) -> bool {
        self.altitude > 0.0
    }
}

// =====================
// Ephemeris table file
// =====================

#[derive(Debug)]
pub enum EphemerisError {
    Io(std::io::Error),
    Json(serde_path_to_error::Error<serde_json::Error>),
    DuplicateTime(DateTime<Utc>),
}

impl Display for EphemerisError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EphemerisError::Io(e) => write!(f, "io error: {}", e),
            EphemerisError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
            EphemerisError::DuplicateTime(ts) => write!(f, "duplicate ephemeris timestamp {}", ts),
        }
    }
}

impl std::error::Error for EphemerisError {}

impl From<std::io::Error> for EphemerisError {
    fn from(value: std::io::Error) -> Self {
        EphemerisError::Io(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisPoint {
    pub time: DateTime<Utc>,
    pub altitude: f64,
    pub azimuth: f64,
    #[serde(default)]
    pub airmass: Option<f64>,
    #[serde(default)]
    pub sun_altitude: Option<f64>,
    #[serde(default)]
    pub moon: Option<MoonState>,
}

/// Per-timestamp target positions and moon state for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisTable {
    pub target: Target,
    pub points: Vec<EphemerisPoint>,
}

impl EphemerisTable {
    pub fn from_json_str(s: &str) -> Result<Self, EphemerisError> {
        let de = &mut serde_json::Deserializer::from_str(s);
        let table: EphemerisTable = serde_path_to_error::deserialize(de).map_err(EphemerisError::Json)?;
        let mut seen = std::collections::BTreeSet::new();
        for p in &table.points {
            if !seen.insert(p.time) {
                return Err(EphemerisError::DuplicateTime(p.time));
            }
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, EphemerisError> {
        let body = std::fs::read_to_string(path)?;
        Self::from_json_str(&body)
    }

    pub fn geometries(&self) -> BTreeMap<DateTime<Utc>, TargetGeometry> {
        self.points
            .iter()
            .map(|p| {
                let mut g = TargetGeometry::from_altitude(p.altitude, p.azimuth);
                // a supplied airmass wins, but never above the horizon check
                if g.is_above_horizon && p.airmass.is_some() {
                    g.airmass = p.airmass;
                }
                (p.time, g)
            })
            .collect()
    }

    pub fn moon_states(&self) -> BTreeMap<DateTime<Utc>, MoonState> {
        self.points
            .iter()
            .filter_map(|p| p.moon.map(|m| (p.time, m)))
            .collect()
    }

    /// Astronomical-night flag for every point that carries a sun altitude.
    pub fn night_hours(&self) -> BTreeMap<DateTime<Utc>, bool> {
        self.points
            .iter()
            .filter_map(|p| p.sun_altitude.map(|sun| (p.time, sun < ASTRONOMICAL_NIGHT_SUN_ALTITUDE)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airmass_is_one_at_zenith_and_undefined_below_horizon() {
        let zenith = airmass_for_altitude(90.0).unwrap();
        assert!((zenith - 1.0).abs() < 1e-3);
        let low = airmass_for_altitude(30.0).unwrap();
        assert!((low - 2.0).abs() < 0.01);
        assert_eq!(airmass_for_altitude(0.0), None);
        assert_eq!(airmass_for_altitude(-12.0), None);
    }

    #[test]
    fn deep_sky_classification() {
        assert!(TargetKind::Nebula.is_deep_sky());
        assert!(TargetKind::Galaxy.is_deep_sky());
        assert!(!TargetKind::Planet.is_deep_sky());
        assert!(!TargetKind::Moon.is_deep_sky());
    }

    #[test]
    fn parses_ephemeris_fixture() {
        let json = std::fs::read_to_string("tests/data/ephemeris-m42.json").expect("fixture present");
        let table = EphemerisTable::from_json_str(&json).expect("parse ephemeris");
        assert_eq!(table.target.kind, TargetKind::Nebula);
        let geometries = table.geometries();
        assert_eq!(geometries.len(), table.points.len());
        let below = geometries.values().find(|g| g.altitude <= 0.0).expect("fixture has a point below horizon");
        assert!(!below.is_above_horizon);
        assert_eq!(below.airmass, None);
        assert!(!table.moon_states().is_empty());

        let nights = table.night_hours();
        assert_eq!(nights.len(), table.points.len());
        assert_eq!(nights.values().filter(|n| **n).count(), 9);
        assert_eq!(nights.first_key_value().map(|(_, n)| *n), Some(false));
    }

    #[test]
    fn moon_is_up_only_above_horizon() {
        let moon = |altitude| MoonState {
            illumination: 50.0,
            altitude,
            angular_separation: None,
        };
        assert!(moon(0.5).is_up());
        assert!(!moon(0.0).is_up());
        assert!(!moon(-10.0).is_up());
    }

    #[test]
    fn malformed_ephemeris_names_the_field() {
        let json = r#"{"target":{"name":"M42","kind":"nebula"},"points":[{"time":"2025-01-01T00:00:00Z","altitude":"high","azimuth":0}]}"#;
        let err = EphemerisTable::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("points[0].altitude"), "{}", err);
    }
}
