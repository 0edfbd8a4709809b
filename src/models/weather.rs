//! Observing site and raw atmospheric samples.
//!
//! Units follow the Open-Meteo defaults where the provider offers a choice:
//! - surface wind and gusts in km/h
//! - wind shear (10 m to 80 m) and jet stream (250 hPa) in m/s
//! - temperatures in °C, percentages 0..=100

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level.
    #[serde(default)]
    pub elevation: f64,
    /// IANA timezone name; informational only, all timestamps are UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationError {
    Latitude(f64),
    Longitude(f64),
}

impl Display for LocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LocationError::Latitude(v) => write!(f, "latitude must be between -90 and 90, got {}", v),
            LocationError::Longitude(v) => write!(f, "longitude must be between -180 and 180, got {}", v),
        }
    }
}

impl std::error::Error for LocationError {}

impl Location {
    pub fn new(
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        elevation: f64,
        timezone: impl Into<String>,
    ) -> Result<Self, LocationError> {
        // NaN fails both range checks
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(LocationError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::Longitude(longitude));
        }
        Ok(Location {
            name: name.into(),
            latitude,
            longitude,
            elevation,
            timezone: timezone.into(),
        })
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let lat_dir = if self.latitude >= 0.0 { 'N' } else { 'S' };
        let lon_dir = if self.longitude >= 0.0 { 'E' } else { 'W' };
        write!(
            f,
            "{} ({:.2}{}, {:.2}{})",
            self.name,
            self.latitude.abs(),
            lat_dir,
            self.longitude.abs(),
            lon_dir
        )
    }
}

/// One hourly reading from the weather provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosphericSample {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub dew_point: f64,
    pub humidity: f64,
    pub cloud_cover: f64,
    pub wind_speed: f64,
    pub wind_gust: f64,
    pub wind_shear: f64,
    /// `None` when the provider has no upper-air data for this hour.
    pub jet_stream_speed: Option<f64>,
    pub precipitation_probability: f64,
    /// Precipitation amount in mm for the hour.
    #[serde(default)]
    pub precipitation: f64,
}

impl AtmosphericSample {
    /// Temperature minus dew point; larger means drier air.
    pub fn temperature_differential(&self) -> f64 {
        self.temperature - self.dew_point
    }
}
