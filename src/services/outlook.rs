//! Multi-night and multi-site views over scored forecasts.

use crate::models::seeing::ScoreResult;
use crate::models::weather::Location;
use crate::services::series::ScoredSeries;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;

/// Km/h below which a night reads as calm.
const CALM_WIND: f64 = 11.0;
/// Km/h below which a night reads as breezy but usable.
const LIGHT_WIND: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NightSummary {
    /// Date the night's evening falls on.
    pub date: NaiveDate,
    pub mean_score: f64,
    pub hours: usize,
    pub mean_cloud_cover: f64,
    pub mean_wind_speed: f64,
    pub summary: String,
}

/// Night an hour belongs to: shifting back half a day keeps the hours after
/// midnight with the evening they started on.
fn night_of(ts: DateTime<Utc>) -> NaiveDate {
    (ts - Duration::hours(12)).date_naive()
}

fn describe(mean_score: f64, cloud: f64, wind: f64) -> String {
    let quality = match mean_score {
        s if s >= 80.0 => "Excellent",
        s if s >= 65.0 => "Very good",
        s if s >= 55.0 => "Good",
        s if s >= 40.0 => "Fair",
        _ => "Poor",
    };
    let sky = match cloud {
        c if c < 20.0 => "clear skies",
        c if c < 50.0 => "partly cloudy",
        _ => "variable clouds",
    };
    let mut parts = vec![quality, sky];
    if wind < CALM_WIND {
        parts.push("calm");
    } else if wind < LIGHT_WIND {
        parts.push("light wind");
    }
    parts.join(". ")
}

/// Nights whose dark hours average at least `min_score`, best first.
///
/// Only hours flagged `true` in `night_hours` count; hours without a flag are
/// treated as daylight. Ties keep the earlier night first.
pub fn best_nights(
    series: &ScoredSeries,
    night_hours: &BTreeMap<DateTime<Utc>, bool>,
    min_score: f64,
) -> Vec<NightSummary> {
    let mut grouped: BTreeMap<NaiveDate, Vec<(u8, f64, f64)>> = BTreeMap::new();
    for p in &series.points {
        if night_hours.get(&p.timestamp()).copied().unwrap_or(false) {
            grouped
                .entry(night_of(p.timestamp()))
                .or_default()
                .push((p.score.overall, p.sample.cloud_cover, p.sample.wind_speed));
        }
    }

    let mut nights: Vec<NightSummary> = grouped
        .into_iter()
        .filter_map(|(date, hours)| {
            let n = hours.len() as f64;
            let mean_score = hours.iter().map(|h| f64::from(h.0)).sum::<f64>() / n;
            if mean_score < min_score {
                debug!("Night of {} averages {:.0}, below {}", date, mean_score, min_score);
                return None;
            }
            let mean_cloud_cover = hours.iter().map(|h| h.1).sum::<f64>() / n;
            let mean_wind_speed = hours.iter().map(|h| h.2).sum::<f64>() / n;
            Some(NightSummary {
                date,
                mean_score,
                hours: hours.len(),
                mean_cloud_cover,
                mean_wind_speed,
                summary: describe(mean_score, mean_cloud_cover, mean_wind_speed),
            })
        })
        .collect();
    // stable, and the map already yielded dates in order
    nights.sort_by(|a, b| b.mean_score.total_cmp(&a.mean_score));
    nights
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteReport {
    pub location: Location,
    pub score: ScoreResult,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationComparison {
    pub timestamp: DateTime<Utc>,
    /// Best overall score first; equal scores keep their input order.
    pub ranked: Vec<SiteReport>,
}

impl LocationComparison {
    pub fn best(&self) -> Option<&SiteReport> {
        self.ranked.first()
    }
}

pub fn compare_locations(timestamp: DateTime<Utc>, mut reports: Vec<SiteReport>) -> LocationComparison {
    reports.sort_by(|a, b| b.score.overall.cmp(&a.score.overall));
    LocationComparison {
        timestamp,
        ranked: reports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::series::tests::{hour, series_from_scores};

    /// Two nights in a 36-hour series starting 18:00: 20:00 to 04:00 is dark.
    fn flags(len: i64) -> BTreeMap<DateTime<Utc>, bool> {
        (0..len)
            .map(|h| (hour(h), (2..=10).contains(&h) || (26..=34).contains(&h)))
            .collect()
    }

    fn scores(first_night: u8, second_night: u8) -> Vec<Option<u8>> {
        (0..36)
            .map(|h| match h {
                2..=10 => Some(first_night),
                26..=34 => Some(second_night),
                _ => Some(100),
            })
            .collect()
    }

    #[test]
    fn groups_dark_hours_by_evening_and_ranks() {
        let series = series_from_scores(&scores(70, 90));
        let nights = best_nights(&series, &flags(36), 60.0);
        assert_eq!(nights.len(), 2);

        assert_eq!(nights[0].date, NaiveDate::from_ymd_opt(2025, 1, 11).unwrap());
        assert_eq!(nights[0].hours, 9);
        assert!((nights[0].mean_score - 90.0).abs() < 1e-9);
        assert_eq!(nights[0].summary, "Excellent. clear skies. calm");

        assert_eq!(nights[1].date, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
        assert_eq!(nights[1].summary, "Very good. clear skies. calm");
    }

    #[test]
    fn daylight_and_weak_nights_are_left_out() {
        let series = series_from_scores(&scores(70, 90));
        let nights = best_nights(&series, &flags(36), 80.0);
        assert_eq!(nights.len(), 1);
        assert_eq!(nights[0].hours, 9);

        assert!(best_nights(&series, &BTreeMap::new(), 0.0).is_empty());
    }

    #[test]
    fn equal_nights_keep_calendar_order() {
        let series = series_from_scores(&scores(75, 75));
        let nights = best_nights(&series, &flags(36), 0.0);
        assert_eq!(nights.len(), 2);
        assert!(nights[0].date < nights[1].date);
    }

    #[test]
    fn summary_wording() {
        assert_eq!(describe(58.0, 35.0, 18.0), "Good. partly cloudy. light wind");
        assert_eq!(describe(42.0, 70.0, 40.0), "Fair. variable clouds");
    }

    #[test]
    fn sites_rank_by_current_score() {
        let series = series_from_scores(&[Some(40), Some(85), Some(60), Some(85)]);
        let reports = ["Ridge", "Valley", "Coast", "Summit"]
            .iter()
            .zip(&series.points)
            .map(|(name, p)| SiteReport {
                location: Location::new(*name, 45.0, 7.0, 0.0, "UTC").unwrap(),
                score: p.score.clone(),
                stale: false,
            })
            .collect();

        let cmp = compare_locations(hour(0), reports);
        let order: Vec<&str> = cmp.ranked.iter().map(|r| r.location.name.as_str()).collect();
        assert_eq!(order, ["Valley", "Summit", "Coast", "Ridge"]);
        assert_eq!(cmp.best().map(|r| r.score.overall), Some(85));
        assert_eq!(cmp.ranked[3].score, series.points[0].score);
        assert!(compare_locations(hour(0), Vec::new()).best().is_none());
    }
}
