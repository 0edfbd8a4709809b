//! Weighted composite of the component subscores plus the penalty chain.
//!
//! Penalties are data: [`PENALTY_CHAIN`] lists pure transforms that run in a
//! fixed order (precipitation, airmass, moon). Each step that bites records
//! its name and the points it removed.

use crate::config::ScoringConfig;
use crate::models::astro::{MoonState, TargetGeometry, airmass_for_altitude};
use crate::models::seeing::{ComponentScores, Penalty, PenaltyKind, Rating, ScoreResult};
use crate::models::weather::AtmosphericSample;
use crate::services::normalizer::normalize;
use crate::utils::{clamp_finite, linear_interpolate, piecewise};
use chrono::{DateTime, Utc};

const AIRMASS_CURVE: [(f64, f64); 5] = [(1.2, 1.0), (1.5, 0.95), (2.0, 0.85), (3.0, 0.65), (5.0, 0.5)];
/// Moon altitude (°) at which its glare reaches full strength.
const MOON_FULL_EFFECT_ALTITUDE: f64 = 45.0;

/// Everything besides the subscores that can lower a score.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreContext<'a> {
    pub geometry: Option<&'a TargetGeometry>,
    pub moon: Option<&'a MoonState>,
    pub is_deep_sky: bool,
    pub precipitation_probability: f64,
    /// Precipitation amount (mm) for the hour.
    pub precipitation: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Draft {
    score: f64,
    penalties: Vec<Penalty>,
}

impl Draft {
    fn scaled(mut self, name: PenaltyKind, factor: f64) -> Self {
        let factor = clamp_finite(factor, 0.0, 1.0);
        if factor >= 1.0 {
            return self;
        }
        let before = self.score;
        self.score = before * factor;
        self.penalties.push(Penalty {
            name,
            magnitude: before - self.score,
            factor,
        });
        self
    }
}

type PenaltyStep = fn(Draft, &ScoreContext<'_>, &ScoringConfig) -> Draft;

const PENALTY_CHAIN: [PenaltyStep; 3] = [apply_precipitation, apply_airmass, apply_moon];

/// Normalize and compose in one go.
pub fn score_sample(
    sample: &AtmosphericSample,
    geometry: Option<&TargetGeometry>,
    moon: Option<&MoonState>,
    is_deep_sky: bool,
    cfg: &ScoringConfig,
) -> ScoreResult {
    let ctx = ScoreContext {
        geometry,
        moon,
        is_deep_sky,
        precipitation_probability: sample.precipitation_probability,
        precipitation: sample.precipitation,
    };
    compose(sample.timestamp, normalize(sample), &ctx, cfg)
}

pub fn compose(
    timestamp: DateTime<Utc>,
    components: ComponentScores,
    ctx: &ScoreContext<'_>,
    cfg: &ScoringConfig,
) -> ScoreResult {
    let draft = Draft {
        score: composite(&components, cfg).round(),
        penalties: Vec::new(),
    };
    let draft = PENALTY_CHAIN.iter().fold(draft, |d, step| step(d, ctx, cfg));

    let overall = clamp_finite(draft.score.round(), 0.0, 100.0) as u8;
    ScoreResult {
        timestamp,
        overall,
        components,
        penalties_applied: draft.penalties,
        rating: Rating::from_score(overall),
    }
}

/// Weighted sum of the subscores, before any penalty.
pub fn composite(c: &ComponentScores, cfg: &ScoringConfig) -> f64 {
    let w = cfg.weights.normalized();
    let sum = w.wind * clamp_finite(c.wind, 0.0, 100.0)
        + w.temp_differential * clamp_finite(c.temp_differential, 0.0, 100.0)
        + w.cloud * clamp_finite(c.cloud, 0.0, 100.0)
        + w.humidity * clamp_finite(c.humidity, 0.0, 100.0)
        + w.jet_stream * clamp_finite(c.jet_stream, 0.0, 100.0);
    clamp_finite(sum, 0.0, 100.0)
}

fn apply_precipitation(d: Draft, ctx: &ScoreContext<'_>, cfg: &ScoringConfig) -> Draft {
    d.scaled(
        PenaltyKind::Precipitation,
        precipitation_factor(ctx.precipitation_probability, ctx.precipitation, cfg),
    )
}

fn apply_airmass(d: Draft, ctx: &ScoreContext<'_>, _cfg: &ScoringConfig) -> Draft {
    match ctx.geometry {
        Some(g) => d.scaled(PenaltyKind::Airmass, airmass_factor(g)),
        None => d,
    }
}

fn apply_moon(d: Draft, ctx: &ScoreContext<'_>, cfg: &ScoringConfig) -> Draft {
    if !ctx.is_deep_sky {
        return d;
    }
    match ctx.moon {
        Some(m) => d.scaled(PenaltyKind::Moon, moon_factor(m, cfg)),
        None => d,
    }
}

pub fn precipitation_factor(probability: f64, amount_mm: f64, cfg: &ScoringConfig) -> f64 {
    if amount_mm > 0.0 {
        return cfg.active_precipitation_factor;
    }
    let p = clamp_finite(probability, 0.0, 100.0);
    let high = cfg.precipitation_high_threshold;
    if p > high {
        cfg.precipitation_ceiling
    } else if p > 50.0 {
        linear_interpolate(p, 50.0, high, 0.6, cfg.precipitation_ceiling)
    } else if p > 20.0 {
        linear_interpolate(p, 20.0, 50.0, 0.9, 0.6)
    } else {
        1.0
    }
}

/// 1.0 near the zenith, down to 0.5 at airmass 5; 0.0 when the target is not observable.
pub fn airmass_factor(g: &TargetGeometry) -> f64 {
    if !g.is_above_horizon || !(g.altitude > 0.0) {
        return 0.0;
    }
    match g.airmass.or_else(|| airmass_for_altitude(g.altitude)) {
        Some(x) if x.is_finite() => piecewise(x, &AIRMASS_CURVE),
        _ => 0.0,
    }
}

pub fn moon_factor(m: &MoonState, cfg: &ScoringConfig) -> f64 {
    if !m.is_up() {
        return 1.0;
    }
    let illumination = clamp_finite(m.illumination, 0.0, 100.0) / 100.0;
    let altitude = (m.altitude / MOON_FULL_EFFECT_ALTITUDE).min(1.0);
    // 1.0 right next to the target, 0.5 from 90° away
    let separation = m
        .angular_separation
        .map(|s| 1.0 - 0.5 * clamp_finite(s, 0.0, 90.0) / 90.0)
        .unwrap_or(1.0);
    1.0 - cfg.moon_max_penalty * illumination * altitude * separation
}
