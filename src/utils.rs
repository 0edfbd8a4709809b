use chrono::{DateTime, Duration, DurationRound, Utc};

/// Linear map of `value` from `[in_min, in_max]` onto `[out_min, out_max]`, unclamped.
pub fn linear_interpolate(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    if in_max == in_min {
        return out_min;
    }
    let ratio = (value - in_min) / (in_max - in_min);
    out_min + ratio * (out_max - out_min)
}

/// Piecewise-linear curve through `knots` (sorted by x). Flat beyond both ends.
pub fn piecewise(value: f64, knots: &[(f64, f64)]) -> f64 {
    let Some(&(first_x, first_y)) = knots.first() else {
        return 0.0;
    };
    if value.is_nan() || value <= first_x {
        return first_y;
    }
    for pair in knots.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if value <= x1 {
            return linear_interpolate(value, x0, x1, y0, y1);
        }
    }
    knots.last().map(|&(_, y)| y).unwrap_or(first_y)
}

/// Clamp that maps NaN to `min` instead of propagating it.
pub fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() { min } else { value.clamp(min, max) }
}

/// Truncate to the start of the hour; used for cache keys.
pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::hours(1)).unwrap_or(ts)
}

/// Human readable age such as `2h 05m`.
pub fn format_age(age: Duration) -> String {
    let minutes = age.num_minutes().max(0);
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}
