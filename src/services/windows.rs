//! Contiguous-run search over a scored series.
//!
//! [`find_runs`] is the one scan both the best-window search and the
//! timelapse planner use; they only differ in the per-sample predicate.

use crate::models::seeing::Window;
use crate::services::series::{ScoredPoint, ScoredSeries};
use chrono::Duration;
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;

pub const DEFAULT_MAX_ALTERNATES: usize = 3;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WindowSearch {
    pub best: Option<Window>,
    pub alternates: Vec<Window>,
}

/// Higher mean first, then longer, then earlier.
pub fn compare_windows(a: &Window, b: &Window) -> Ordering {
    b.mean_score
        .total_cmp(&a.mean_score)
        .then_with(|| b.duration.cmp(&a.duration))
        .then_with(|| a.start.cmp(&b.start))
}

/// Every maximal run of qualifying, gap-free samples lasting at least
/// `min_duration`, best first.
pub fn find_runs<F>(series: &ScoredSeries, qualifies: F, min_duration: Duration) -> Vec<Window>
where
    F: Fn(&ScoredPoint) -> bool,
{
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, point) in series.points.iter().enumerate() {
        let ok = qualifies(point);
        match run_start {
            Some(_) if ok && series.is_contiguous_at(i) => {}
            Some(start) => {
                runs.push((start, i));
                run_start = ok.then_some(i);
            }
            None if ok => run_start = Some(i),
            None => {}
        }
    }
    if let Some(start) = run_start {
        runs.push((start, series.points.len()));
    }

    let mut windows: Vec<Window> = runs
        .into_iter()
        .map(|(from, to)| window_from_run(series, from, to))
        .filter(|w| w.duration >= min_duration)
        .collect();
    windows.sort_by(compare_windows);
    windows
}

/// Builds the window for `points[from..to]`; the range must be non-empty.
fn window_from_run(series: &ScoredSeries, from: usize, to: usize) -> Window {
    let run = &series.points[from..to];
    let first = &run[0];
    let last = &run[run.len() - 1];

    let mut min_score = u8::MAX;
    let mut max_score = 0u8;
    let mut peak_time = first.timestamp();
    let mut total = 0u32;
    for p in run {
        let s = p.score.overall;
        total += u32::from(s);
        min_score = min_score.min(s);
        if s > max_score {
            max_score = s;
            peak_time = p.timestamp();
        }
    }

    let start = first.timestamp();
    let end = last.timestamp() + series.cadence;
    Window {
        start,
        end,
        last_sample: last.timestamp(),
        duration: end - start,
        mean_score: f64::from(total) / run.len() as f64,
        min_score,
        max_score,
        peak_time,
        sample_count: run.len(),
        first_index: from,
    }
}

/// Splits ranked runs into the winner and up to `max_alternates` runners-up.
pub fn pick(mut ranked: Vec<Window>, max_alternates: usize) -> WindowSearch {
    if ranked.is_empty() {
        return WindowSearch::default();
    }
    let best = ranked.remove(0);
    ranked.truncate(max_alternates);
    WindowSearch {
        best: Some(best),
        alternates: ranked,
    }
}

pub fn find_best_window(series: &ScoredSeries, min_duration: Duration, min_score: u8) -> WindowSearch {
    find_best_window_with(series, min_duration, min_score, DEFAULT_MAX_ALTERNATES)
}

pub fn find_best_window_with(
    series: &ScoredSeries,
    min_duration: Duration,
    min_score: u8,
    max_alternates: usize,
) -> WindowSearch {
    let ranked = find_runs(series, |p| p.score.overall >= min_score, min_duration);
    debug!(
        "Window search (min_score={}, min_duration={}h): {} candidate run(s)",
        min_score,
        min_duration.num_hours(),
        ranked.len()
    );
    pick(ranked, max_alternates)
}
