//! Scores, ratings and windows produced by the scoring services.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-factor subscores, each in `0.0..=100.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub wind: f64,
    pub temp_differential: f64,
    pub cloud: f64,
    pub humidity: f64,
    pub jet_stream: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyKind {
    Precipitation,
    Airmass,
    Moon,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub name: PenaltyKind,
    /// Score points removed by this penalty.
    pub magnitude: f64,
    /// Multiplier that was applied (0.0 for a forced "not observable").
    pub factor: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rating {
    Bad,
    Poor,
    Fair,
    Good,
    #[serde(rename = "Very Good")]
    VeryGood,
    Excellent,
}

impl Rating {
    pub fn from_score(score: u8) -> Self {
        match score {
            85.. => Rating::Excellent,
            70..=84 => Rating::VeryGood,
            55..=69 => Rating::Good,
            40..=54 => Rating::Fair,
            25..=39 => Rating::Poor,
            _ => Rating::Bad,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rating::Excellent => "Excellent",
            Rating::VeryGood => "Very Good",
            Rating::Good => "Good",
            Rating::Fair => "Fair",
            Rating::Poor => "Poor",
            Rating::Bad => "Bad",
        }
    }

    pub fn recommendation(self) -> &'static str {
        match self {
            Rating::Excellent => "Outstanding conditions! Perfect for imaging and visual observation.",
            Rating::VeryGood => "Very good conditions. Excellent for most observations.",
            Rating::Good => "Good conditions. Suitable for planetary and bright deep-sky objects.",
            Rating::Fair => "Fair conditions. Best for planets and the Moon.",
            Rating::Poor => "Poor conditions. Only bright objects recommended.",
            Rating::Bad => "Not recommended for serious observation tonight.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub timestamp: DateTime<Utc>,
    pub overall: u8,
    pub components: ComponentScores,
    /// In the order the penalties were applied.
    pub penalties_applied: Vec<Penalty>,
    pub rating: Rating,
}

/// A contiguous run of samples. `end` is exclusive: last sample plus one cadence step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub last_sample: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub mean_score: f64,
    pub min_score: u8,
    pub max_score: u8,
    pub peak_time: DateTime<Utc>,
    pub sample_count: usize,
    /// Index of the first sample in the series the window was cut from.
    #[serde(skip)]
    pub first_index: usize,
}

impl Window {
    pub fn duration_hours(&self) -> f64 {
        self.duration.num_seconds() as f64 / 3600.0
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.first_index..self.first_index + self.sample_count
    }
}

pub(crate) mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_thresholds() {
        assert_eq!(Rating::from_score(100), Rating::Excellent);
        assert_eq!(Rating::from_score(85), Rating::Excellent);
        assert_eq!(Rating::from_score(84), Rating::VeryGood);
        assert_eq!(Rating::from_score(70), Rating::VeryGood);
        assert_eq!(Rating::from_score(55), Rating::Good);
        assert_eq!(Rating::from_score(40), Rating::Fair);
        assert_eq!(Rating::from_score(39), Rating::Poor);
        assert_eq!(Rating::from_score(25), Rating::Poor);
        assert_eq!(Rating::from_score(24), Rating::Bad);
        assert_eq!(Rating::from_score(0), Rating::Bad);
    }

    #[test]
    fn rating_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Rating::VeryGood).unwrap(), "\"Very Good\"");
        assert_eq!(serde_json::to_string(&PenaltyKind::Airmass).unwrap(), "\"airmass\"");
    }
}
