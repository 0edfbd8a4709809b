//! Runtime configuration helpers.
//! Everything is read from the environment (optionally populated from a `.env` file).

use crate::models::weather::Location;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_FORECAST_HOURS: u32 = 48;
pub const MAX_FORECAST_HOURS: u32 = 384;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_CACHE_MAX_STALE_SECS: u64 = 6 * 3600;

/// Component weights of the composite score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub wind: f64,
    pub temp_differential: f64,
    pub cloud: f64,
    pub humidity: f64,
    pub jet_stream: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            wind: 0.30,
            temp_differential: 0.25,
            cloud: 0.20,
            humidity: 0.15,
            jet_stream: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.wind + self.temp_differential + self.cloud + self.humidity + self.jet_stream
    }

    /// Rescale so the weights sum to 1. Falls back to defaults for a non-positive sum.
    pub fn normalized(self) -> Self {
        let total = self.sum();
        if !(total > 0.0) {
            return ScoringWeights::default();
        }
        if (total - 1.0).abs() <= 0.01 {
            return self;
        }
        ScoringWeights {
            wind: self.wind / total,
            temp_differential: self.temp_differential / total,
            cloud: self.cloud / total,
            humidity: self.humidity / total,
            jet_stream: self.jet_stream / total,
        }
    }
}

/// Tunables of the score composer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Precipitation probability (%) above which the heavy penalty applies.
    pub precipitation_high_threshold: f64,
    /// Multiplier applied above `precipitation_high_threshold`.
    pub precipitation_ceiling: f64,
    /// Multiplier applied when precipitation is actually falling.
    pub active_precipitation_factor: f64,
    /// Largest fraction of the score a bright, high moon may remove.
    pub moon_max_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            weights: ScoringWeights::default(),
            precipitation_high_threshold: 80.0,
            precipitation_ceiling: 0.3,
            active_precipitation_factor: 0.1,
            moon_max_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` only when running on synthetic data.
    pub location: Option<Location>,
    pub forecast_hours: u32,
    pub open_meteo_url: String,
    pub max_request_retries: NonZeroU32,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub cache_max_stale: Duration,
    pub window_min_hours: u32,
    pub window_min_score: u8,
    pub timelapse_min_hours: u32,
    pub timelapse_min_altitude: f64,
    pub night_min_score: f64,
    /// Extra sites for `compare`, after the main location.
    pub compare_locations: Vec<Location>,
    /// Exported ephemeris table for the current target, if any.
    pub ephemeris_file: Option<PathBuf>,
    pub alert_conditions: Vec<String>,
    pub fake_data: bool,
    pub scoring: ScoringConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let fake_data = env_bool("FAKE_DATA", false);

        let location = match (env_f64("SEEING_LATITUDE")?, env_f64("SEEING_LONGITUDE")?) {
            (Some(lat), Some(lon)) => {
                let name = env_string("SEEING_LOCATION_NAME").unwrap_or_else(|| "Observer".to_string());
                let elevation = env_f64("SEEING_ELEVATION")?.unwrap_or(0.0);
                let timezone = env_string("SEEING_TIMEZONE").unwrap_or_else(|| "UTC".to_string());
                Some(Location::new(name, lat, lon, elevation, timezone).map_err(|e| format!("invalid location: {}", e))?)
            }
            (None, None) if fake_data => None,
            _ => {
                return Err("Missing location: set SEEING_LATITUDE and SEEING_LONGITUDE (or FAKE_DATA=1)".to_string());
            }
        };

        let forecast_hours = env_parse::<u32>("FORECAST_HOURS")?.unwrap_or(DEFAULT_FORECAST_HOURS);
        if forecast_hours == 0 || forecast_hours > MAX_FORECAST_HOURS {
            return Err(format!("FORECAST_HOURS must be between 1 and {}", MAX_FORECAST_HOURS));
        }

        let max_request_retries = match env_parse::<u32>("MAX_REQUEST_RETRIES")? {
            Some(n) => NonZeroU32::new(n).ok_or_else(|| "MAX_REQUEST_RETRIES must be at least 1".to_string())?,
            None => NonZeroU32::MIN.saturating_add(2),
        };

        let window_min_score = env_parse::<u8>("WINDOW_MIN_SCORE")?.unwrap_or(50);
        if window_min_score > 100 {
            return Err("WINDOW_MIN_SCORE must be between 0 and 100".to_string());
        }

        let defaults = ScoringWeights::default();
        let weights = ScoringWeights {
            wind: env_f64("SEEING_WEIGHT_WIND")?.unwrap_or(defaults.wind),
            temp_differential: env_f64("SEEING_WEIGHT_TEMP_DIFFERENTIAL")?.unwrap_or(defaults.temp_differential),
            cloud: env_f64("SEEING_WEIGHT_CLOUD")?.unwrap_or(defaults.cloud),
            humidity: env_f64("SEEING_WEIGHT_HUMIDITY")?.unwrap_or(defaults.humidity),
            jet_stream: env_f64("SEEING_WEIGHT_JET_STREAM")?.unwrap_or(defaults.jet_stream),
        };
        if [weights.wind, weights.temp_differential, weights.cloud, weights.humidity, weights.jet_stream]
            .iter()
            .any(|w| *w < 0.0)
        {
            return Err("SEEING_WEIGHT_* values must not be negative".to_string());
        }

        let night_min_score = env_f64("BEST_NIGHTS_MIN_SCORE")?.unwrap_or(60.0);
        if !(0.0..=100.0).contains(&night_min_score) {
            return Err("BEST_NIGHTS_MIN_SCORE must be between 0 and 100".to_string());
        }
        let compare_locations = match env_string("COMPARE_LOCATIONS") {
            Some(s) => parse_location_list(&s)?,
            None => Vec::new(),
        };

        let alert_conditions = env_string("ALERT_CONDITIONS")
            .map(|s| {
                s.split(';')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            location,
            forecast_hours,
            open_meteo_url: env_string("OPEN_METEO_URL").unwrap_or_else(|| DEFAULT_OPEN_METEO_URL.to_string()),
            max_request_retries,
            cache_dir: PathBuf::from(env_string("CACHE_DIR").unwrap_or_else(|| ".seeing-cache".to_string())),
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS")?.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            cache_max_stale: Duration::from_secs(
                env_parse("CACHE_MAX_STALE_SECS")?.unwrap_or(DEFAULT_CACHE_MAX_STALE_SECS),
            ),
            window_min_hours: env_parse("WINDOW_MIN_HOURS")?.unwrap_or(2),
            window_min_score,
            timelapse_min_hours: env_parse("TIMELAPSE_MIN_HOURS")?.unwrap_or(4),
            timelapse_min_altitude: env_f64("TIMELAPSE_MIN_ALTITUDE")?.unwrap_or(30.0),
            night_min_score,
            compare_locations,
            ephemeris_file: env_string("EPHEMERIS_FILE").map(PathBuf::from),
            alert_conditions,
            fake_data,
            scoring: ScoringConfig {
                weights: weights.normalized(),
                ..ScoringConfig::default()
            },
        })
    }
}

/// `Name=lat,lon;Other=lat,lon`. Sites share the UTC timezone and sea-level elevation.
fn parse_location_list(s: &str) -> Result<Vec<Location>, String> {
    s.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || format!("COMPARE_LOCATIONS entry must look like Name=lat,lon: {}", entry);
            let (name, coords) = entry.split_once('=').ok_or_else(invalid)?;
            let (lat, lon) = coords.split_once(',').ok_or_else(invalid)?;
            let lat = lat.trim().parse::<f64>().map_err(|_| invalid())?;
            let lon = lon.trim().parse::<f64>().map_err(|_| invalid())?;
            if name.trim().is_empty() {
                return Err(invalid());
            }
            Location::new(name.trim(), lat, lon, 0.0, "UTC")
                .map_err(|e| format!("COMPARE_LOCATIONS {}: {}", name.trim(), e))
        })
        .collect()
}

fn env_string(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
    match env_string(key) {
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("{} has an invalid value: {}", key, s)),
        None => Ok(None),
    }
}

fn env_f64(key: &str) -> Result<Option<f64>, String> {
    match env_parse::<f64>(key)? {
        Some(v) if !v.is_finite() => Err(format!("{} must be a finite number", key)),
        other => Ok(other),
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key)
        .map(|s| matches!(s.as_str(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}
