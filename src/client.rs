//! Blocking Open-Meteo forecast client.
//!
//! - One GET per forecast, hourly variables in UTC.
//! - Retries transport errors, HTTP 429 and 5xx with exponential backoff plus jitter.
//! - Hours missing a required variable are dropped, so they show up as gaps downstream.
//!
//! Unit conversions: surface winds stay in km/h. Shear is the 10 m to 80 m speed
//! difference in m/s, jet stream is the 250 hPa wind in m/s.

use crate::models::weather::{AtmosphericSample, Location};
use chrono::{DateTime, NaiveDateTime, Utc};
use http::StatusCode;
use log::{debug, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::cell::RefCell;
use std::num::NonZeroU32;
use std::time::Duration;

const HOURLY_VARIABLES: [&str; 10] = [
    "temperature_2m",
    "dew_point_2m",
    "relative_humidity_2m",
    "cloud_cover",
    "wind_speed_10m",
    "wind_speed_80m",
    "wind_gusts_10m",
    "wind_speed_250hPa",
    "precipitation",
    "precipitation_probability",
];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 8_000;
const JITTER_MAX_MS: u64 = 250;
const KMH_PER_MS: f64 = 3.6;

#[derive(Debug)]
pub enum WeatherClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
    Malformed(String),
}

impl core::fmt::Display for WeatherClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WeatherClientError::Transport(s) => write!(f, "transport error: {}", s),
            WeatherClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            WeatherClientError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
            WeatherClientError::Malformed(s) => write!(f, "malformed forecast: {}", s),
        }
    }
}

impl std::error::Error for WeatherClientError {}

impl From<ureq::Error> for WeatherClientError {
    fn from(value: ureq::Error) -> Self {
        WeatherClientError::Transport(value.to_string())
    }
}

impl WeatherClientError {
    fn is_retryable(&self) -> bool {
        match self {
            WeatherClientError::Transport(_) => true,
            WeatherClientError::Http { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..600).contains(status)
            }
            WeatherClientError::Json(_) | WeatherClientError::Malformed(_) => false,
        }
    }
}

pub struct OpenMeteoClient {
    agent: ureq::Agent,
    base_url: String,
    max_attempts: NonZeroU32,
    rng: RefCell<SmallRng>,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>, max_attempts: NonZeroU32) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();
        OpenMeteoClient {
            agent,
            base_url: base_url.into(),
            max_attempts,
            rng: RefCell::new(SmallRng::from_os_rng()),
        }
    }

    /// Hourly samples starting at the current hour.
    pub fn get_forecast(&self, location: &Location, hours: u32) -> Result<Vec<AtmosphericSample>, WeatherClientError> {
        let query = [
            ("latitude", format!("{:.4}", location.latitude)),
            ("longitude", format!("{:.4}", location.longitude)),
            ("elevation", format!("{:.0}", location.elevation)),
            ("hourly", HOURLY_VARIABLES.join(",")),
            ("forecast_hours", hours.to_string()),
            ("timezone", "UTC".to_string()),
            ("timeformat", "iso8601".to_string()),
        ];

        let mut attempt = 1;
        loop {
            match self.get_body(&query) {
                Ok(body) => {
                    let samples = parse_forecast(&body)?;
                    debug!("Open-Meteo returned {} usable hour(s) for {}", samples.len(), location);
                    return Ok(samples);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts.get() => {
                    let delay = backoff_delay(attempt, &mut *self.rng.borrow_mut());
                    warn!(
                        "Open-Meteo request failed (attempt {}/{}): {}; retrying in {}ms",
                        attempt,
                        self.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_body(&self, query: &[(&str, String)]) -> Result<String, WeatherClientError> {
        let mut req = self.agent.get(&self.base_url).header("Accept", "application/json");
        for (k, v) in query {
            req = req.query(k, v);
        }
        let mut res = req.call()?;
        let status = res.status();
        let body = res.body_mut().read_to_string().unwrap_or_else(|_| String::from("<no body>"));
        if !status.is_success() {
            return Err(WeatherClientError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

/// Exponential backoff for the given 1-based attempt, plus up to `JITTER_MAX_MS` of jitter.
fn backoff_delay<R: Rng>(attempt: u32, rng: &mut R) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let jitter = rng.random_range(0..=JITTER_MAX_MS);
    Duration::from_millis(exp.min(BACKOFF_MAX_MS) + jitter)
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: HourlyBlock,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    dew_point_2m: Vec<Option<f64>>,
    relative_humidity_2m: Vec<Option<f64>>,
    cloud_cover: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
    wind_gusts_10m: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_80m: Vec<Option<f64>>,
    #[serde(default, rename = "wind_speed_250hPa")]
    wind_speed_250hpa: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
}

fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten().filter(|v| v.is_finite())
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, WeatherClientError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .map(|n| n.and_utc())
        .map_err(|e| WeatherClientError::Malformed(format!("bad time '{}': {}", s, e)))
}

/// Decodes an Open-Meteo forecast body.
pub fn parse_forecast(body: &str) -> Result<Vec<AtmosphericSample>, WeatherClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    let resp: ForecastResponse = serde_path_to_error::deserialize(de).map_err(WeatherClientError::Json)?;
    let h = resp.hourly;

    let mut samples = Vec::with_capacity(h.time.len());
    let mut dropped = 0usize;
    for (i, t) in h.time.iter().enumerate() {
        let timestamp = parse_time(t)?;
        let required = (
            at(&h.temperature_2m, i),
            at(&h.dew_point_2m, i),
            at(&h.relative_humidity_2m, i),
            at(&h.cloud_cover, i),
            at(&h.wind_speed_10m, i),
            at(&h.wind_gusts_10m, i),
        );
        let (Some(temperature), Some(dew_point), Some(humidity), Some(cloud_cover), Some(wind_speed), Some(wind_gust)) =
            required
        else {
            dropped += 1;
            continue;
        };

        let wind_shear = at(&h.wind_speed_80m, i)
            .map(|w80| (w80 - wind_speed).abs() / KMH_PER_MS)
            .unwrap_or(0.0);
        samples.push(AtmosphericSample {
            timestamp,
            temperature,
            dew_point,
            humidity,
            cloud_cover,
            wind_speed,
            wind_gust,
            wind_shear,
            jet_stream_speed: at(&h.wind_speed_250hpa, i).map(|v| v / KMH_PER_MS),
            precipitation_probability: at(&h.precipitation_probability, i).unwrap_or(0.0),
            precipitation: at(&h.precipitation, i).unwrap_or(0.0),
        });
    }
    if dropped > 0 {
        warn!("Dropped {} forecast hour(s) with missing values", dropped);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_forecast_fixture() {
        let json = std::fs::read_to_string("tests/data/open-meteo-forecast.json").expect("fixture present");
        let samples = parse_forecast(&json).expect("parse forecast");

        // the 03:00 hour has a null temperature and is dropped
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[0].timestamp, Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap());
        assert!(samples.iter().all(|s| s.timestamp != Utc.with_ymd_and_hms(2025, 1, 10, 3, 0, 0).unwrap()));

        let first = &samples[0];
        assert_eq!(first.cloud_cover, 12.0);
        assert_eq!(first.wind_speed, 7.2);
        // |18.0 - 7.2| km/h
        assert!((first.wind_shear - 3.0).abs() < 1e-9);
        assert!((first.jet_stream_speed.unwrap() - 25.0).abs() < 1e-9);
        assert_eq!(first.precipitation_probability, 0.0);
    }

    #[test]
    fn optional_variables_fall_back() {
        let json = r#"{"hourly":{
            "time":["2025-01-10T00:00"],
            "temperature_2m":[10.0],"dew_point_2m":[5.9],"relative_humidity_2m":[78.0],
            "cloud_cover":[91.0],"wind_speed_10m":[4.7],"wind_gusts_10m":[4.7]}}"#;
        let samples = parse_forecast(json).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].jet_stream_speed, None);
        assert_eq!(samples[0].wind_shear, 0.0);
        assert_eq!(samples[0].precipitation, 0.0);
    }

    #[test]
    fn malformed_payload_names_the_field() {
        let json = r#"{"hourly":{"time":["2025-01-10T00:00"],"temperature_2m":["warm"]}}"#;
        let err = parse_forecast(json).unwrap_err();
        assert!(err.to_string().contains("hourly.temperature_2m"), "{}", err);
        assert!(!err.is_retryable());
    }

    #[test]
    fn bad_timestamp_is_malformed() {
        let json = r#"{"hourly":{
            "time":["yesterday"],
            "temperature_2m":[10.0],"dew_point_2m":[5.9],"relative_humidity_2m":[78.0],
            "cloud_cover":[91.0],"wind_speed_10m":[4.7],"wind_gusts_10m":[4.7]}}"#;
        assert!(matches!(parse_forecast(json), Err(WeatherClientError::Malformed(_))));
    }

    #[test]
    fn retry_classification() {
        assert!(WeatherClientError::Transport("reset".into()).is_retryable());
        assert!(WeatherClientError::Http { status: 429, message: String::new() }.is_retryable());
        assert!(WeatherClientError::Http { status: 503, message: String::new() }.is_retryable());
        assert!(!WeatherClientError::Http { status: 400, message: String::new() }.is_retryable());
        assert!(!WeatherClientError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let mut rng = SmallRng::seed_from_u64(7);
        let first = backoff_delay(1, &mut rng);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(750));
        let third = backoff_delay(3, &mut rng);
        assert!(third >= Duration::from_millis(2_000));
        let huge = backoff_delay(40, &mut rng);
        assert!(huge <= Duration::from_millis(BACKOFF_MAX_MS + JITTER_MAX_MS));
    }
}
