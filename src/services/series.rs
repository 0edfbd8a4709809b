//! Scores every sample of a forecast and lines up target geometry and moon state.

use crate::config::ScoringConfig;
use crate::models::astro::{MoonState, TargetGeometry};
use crate::models::seeing::{ScoreResult, duration_secs};
use crate::models::weather::AtmosphericSample;
use crate::services::composer::score_sample;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Assumed spacing when a series holds a single sample.
pub fn default_cadence() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesError {
    InsufficientData,
    NonIncreasing { index: usize, timestamp: DateTime<Utc> },
}

impl Display for SeriesError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SeriesError::InsufficientData => write!(f, "insufficient data: no samples to score"),
            SeriesError::NonIncreasing { index, timestamp } => {
                write!(f, "sample {} at {} is not after its predecessor", index, timestamp)
            }
        }
    }
}

impl std::error::Error for SeriesError {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPoint {
    pub sample: AtmosphericSample,
    pub geometry: Option<TargetGeometry>,
    pub moon: Option<MoonState>,
    pub score: ScoreResult,
}

impl ScoredPoint {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.sample.timestamp
    }
}

/// Strictly increasing, never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSeries {
    pub points: Vec<ScoredPoint>,
    #[serde(with = "duration_secs")]
    pub cadence: Duration,
    /// Expected timestamps the provider did not deliver.
    pub missing: Vec<DateTime<Utc>>,
}

impl ScoredSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when `points[index]` follows `points[index - 1]` by exactly one cadence step.
    pub fn is_contiguous_at(&self, index: usize) -> bool {
        index > 0
            && index < self.points.len()
            && self.points[index].timestamp() - self.points[index - 1].timestamp() == self.cadence
    }

    /// Latest point not after `now`, or the first point when the series starts later.
    pub fn point_at(&self, now: DateTime<Utc>) -> Option<&ScoredPoint> {
        self.points
            .iter()
            .take_while(|p| p.timestamp() <= now)
            .last()
            .or_else(|| self.points.first())
    }
}

pub fn build_series(
    samples: Vec<AtmosphericSample>,
    geometries: Option<&BTreeMap<DateTime<Utc>, TargetGeometry>>,
    moon_states: Option<&BTreeMap<DateTime<Utc>, MoonState>>,
    is_deep_sky: bool,
    cfg: &ScoringConfig,
) -> Result<ScoredSeries, SeriesError> {
    if samples.is_empty() {
        return Err(SeriesError::InsufficientData);
    }

    let mut cadence: Option<Duration> = None;
    for (i, pair) in samples.windows(2).enumerate() {
        let step = pair[1].timestamp - pair[0].timestamp;
        if step <= Duration::zero() {
            return Err(SeriesError::NonIncreasing {
                index: i + 1,
                timestamp: pair[1].timestamp,
            });
        }
        cadence = Some(cadence.map_or(step, |c| c.min(step)));
    }
    let cadence = cadence.unwrap_or_else(default_cadence);

    let mut missing = Vec::new();
    for pair in samples.windows(2) {
        let mut expected = pair[0].timestamp + cadence;
        while expected < pair[1].timestamp {
            missing.push(expected);
            expected += cadence;
        }
    }
    if !missing.is_empty() {
        warn!("Forecast has {} missing timestamp(s), first at {}", missing.len(), missing[0]);
    }

    let points: Vec<ScoredPoint> = samples
        .into_iter()
        .map(|sample| {
            let geometry = geometries.and_then(|g| g.get(&sample.timestamp)).copied();
            let moon = moon_states.and_then(|m| m.get(&sample.timestamp)).copied();
            let score = score_sample(&sample, geometry.as_ref(), moon.as_ref(), is_deep_sky, cfg);
            ScoredPoint {
                sample,
                geometry,
                moon,
                score,
            }
        })
        .collect();

    debug!(
        "Scored {} sample(s) at {}s cadence ({} with geometry)",
        points.len(),
        cadence.num_seconds(),
        points.iter().filter(|p| p.geometry.is_some()).count()
    );

    Ok(ScoredSeries {
        points,
        cadence,
        missing,
    })
}
