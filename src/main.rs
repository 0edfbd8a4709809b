pub mod models {
    pub mod astro;
    pub mod seeing;
    pub mod weather;
}

pub mod client;
pub mod config;
pub mod utils;
pub mod services {
    pub mod alerts;
    pub mod cache;
    pub mod composer;
    pub mod fake_data;
    pub mod normalizer;
    pub mod outlook;
    pub mod series;
    pub mod timelapse;
    pub mod windows;
}

use crate::client::OpenMeteoClient;
use crate::config::Config;
use crate::models::astro::EphemerisTable;
use crate::models::weather::{AtmosphericSample, Location};
use crate::services::alerts::{AlertVariables, Condition};
use crate::services::cache::{CacheKey, JsonFileStore};
use crate::services::outlook::SiteReport;
use crate::services::series::{ScoredSeries, build_series};
use crate::services::{alerts, cache, fake_data, outlook, timelapse, windows};
use crate::utils::floor_to_hour;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde_json::json;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    Now,
    Forecast,
    BestWindow,
    BestNights,
    Timelapse,
    Compare,
}

impl Command {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "now" => Some(Command::Now),
            "forecast" => Some(Command::Forecast),
            "best-window" => Some(Command::BestWindow),
            "best-nights" => Some(Command::BestNights),
            "timelapse" => Some(Command::Timelapse),
            "compare" => Some(Command::Compare),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Command,
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

/// Forecast samples plus where they came from.
struct Acquired {
    samples: Vec<AtmosphericSample>,
    fetched_at: DateTime<Utc>,
    is_stale: bool,
}

pub fn run(command: Command) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (location={}, forecast_hours={}, fake_data={}, cache_dir={}, cache_ttl={}s, max_request_retries={}, alerts={})",
        cfg.location
            .as_ref()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.forecast_hours,
        cfg.fake_data,
        cfg.cache_dir.display(),
        cfg.cache_ttl.as_secs(),
        cfg.max_request_retries.get(),
        cfg.alert_conditions.len()
    );
    let conditions = alerts::parse_all(&cfg.alert_conditions)
        .map_err(|(source, e)| format!("invalid alert condition '{}': {}", source, e))?;
    let now = Utc::now();
    if command == Command::Compare {
        return run_compare(&cfg, now);
    }

    // 2) Target positions, if any
    let ephemeris = load_ephemeris(&cfg, now)?;
    if command == Command::Timelapse && ephemeris.is_none() {
        return Err("timelapse needs target positions: set EPHEMERIS_FILE (or FAKE_DATA=1)".to_string());
    }

    // 3) Weather
    let acquired = acquire(&cfg, cfg.location.as_ref(), fake_data::DEFAULT_SEED, now)?;

    // 4) Score
    let geometries = ephemeris.as_ref().map(|e| e.geometries());
    let moon_states = ephemeris.as_ref().map(|e| e.moon_states());
    let is_deep_sky = ephemeris.as_ref().is_some_and(|e| e.target.kind.is_deep_sky());
    let series = build_series(
        acquired.samples,
        geometries.as_ref(),
        moon_states.as_ref(),
        is_deep_sky,
        &cfg.scoring,
    )
    .map_err(|e| format!("Scoring failed: {}", e))?;
    info!(
        "Scored {} hour(s) ({} missing){}",
        series.len(),
        series.missing.len(),
        ephemeris
            .as_ref()
            .map(|e| format!(" for target {}", e.target.name))
            .unwrap_or_default()
    );

    let triggered = evaluate_alerts(&conditions, &series, now);

    // 5) Report
    let header = json!({
        "location": cfg.location,
        "target": ephemeris.as_ref().map(|e| &e.target),
        "generated_at": now,
        "data_fetched_at": acquired.fetched_at,
        "stale": acquired.is_stale,
    });
    let body = match command {
        Command::Now => {
            let point = series.point_at(now).ok_or("empty forecast")?;
            json!({
                "score": point.score,
                "rating": point.score.rating.label(),
                "recommendation": point.score.rating.recommendation(),
                "sample": point.sample,
                "geometry": point.geometry,
                "moon": point.moon,
                "alerts_triggered": triggered,
            })
        }
        Command::Forecast => json!({
            "cadence_secs": series.cadence.num_seconds(),
            "missing": series.missing,
            "hours": series.points,
            "alerts_triggered": triggered,
        }),
        Command::BestWindow => {
            let min_duration = chrono::Duration::hours(i64::from(cfg.window_min_hours));
            let search = windows::find_best_window(&series, min_duration, cfg.window_min_score);
            match &search.best {
                Some(w) => info!(
                    "Best window {} - {} ({:.1}h, mean score {:.0})",
                    w.start,
                    w.end,
                    w.duration_hours(),
                    w.mean_score
                ),
                None => info!(
                    "No window of at least {}h with score >= {}",
                    cfg.window_min_hours, cfg.window_min_score
                ),
            }
            json!({ "best_window": search.best, "alternates": search.alternates })
        }
        Command::BestNights => {
            let night_hours = ephemeris.as_ref().map(|e| e.night_hours()).unwrap_or_default();
            if night_hours.is_empty() {
                return Err(
                    "best-nights needs sun altitudes: set EPHEMERIS_FILE with sun_altitude (or FAKE_DATA=1)".to_string(),
                );
            }
            let nights = outlook::best_nights(&series, &night_hours, cfg.night_min_score);
            info!("{} night(s) average at least {}", nights.len(), cfg.night_min_score);
            json!({ "nights": nights })
        }
        Command::Timelapse => {
            let (Some(geometries), Some(moon_states)) = (geometries.as_ref(), moon_states.as_ref()) else {
                return Err("timelapse needs target positions".to_string());
            };
            let min_duration = chrono::Duration::hours(i64::from(cfg.timelapse_min_hours));
            let plan = timelapse::plan_timelapse(
                &series,
                geometries,
                moon_states,
                min_duration,
                cfg.timelapse_min_altitude,
                cfg.window_min_score,
            );
            if plan.is_none() {
                info!(
                    "No imaging window of at least {}h above {}° with score >= {}",
                    cfg.timelapse_min_hours, cfg.timelapse_min_altitude, cfg.window_min_score
                );
            }
            json!({ "plan": plan })
        }
        Command::Compare => return Err("compare is handled separately".to_string()),
    };

    print_json(&merge(header, body))
}

fn load_ephemeris(cfg: &Config, now: DateTime<Utc>) -> Result<Option<EphemerisTable>, String> {
    if let Some(path) = &cfg.ephemeris_file {
        let table = EphemerisTable::load(path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        info!(
            "Loaded ephemeris for {} ({} point(s)) from {}",
            table.target.name,
            table.points.len(),
            path.display()
        );
        return Ok(Some(table));
    }
    if cfg.fake_data {
        return Ok(Some(fake_data::generate_ephemeris(
            now,
            cfg.forecast_hours,
            fake_data::demo_target(),
            fake_data::DEFAULT_SEED,
        )));
    }
    Ok(None)
}

/// Current conditions at every configured site, best first.
fn run_compare(cfg: &Config, now: DateTime<Utc>) -> Result<(), String> {
    let sites: Vec<&Location> = cfg.location.iter().chain(&cfg.compare_locations).collect();
    if sites.len() < 2 {
        return Err("compare needs at least two sites: set COMPARE_LOCATIONS".to_string());
    }

    let mut reports = Vec::with_capacity(sites.len());
    for site in sites {
        let acquired = acquire(cfg, Some(site), fake_data::seed_for(site), now)?;
        let series = build_series(acquired.samples, None, None, false, &cfg.scoring)
            .map_err(|e| format!("Scoring failed for {}: {}", site, e))?;
        let point = series
            .point_at(now)
            .ok_or_else(|| format!("empty forecast for {}", site))?;
        reports.push(SiteReport {
            location: site.clone(),
            score: point.score.clone(),
            stale: acquired.is_stale,
        });
    }

    let comparison = outlook::compare_locations(now, reports);
    if let Some(best) = comparison.best() {
        info!(
            "Best site: {} ({} {})",
            best.location,
            best.score.overall,
            best.score.rating.label()
        );
    }
    print_json(&json!({ "generated_at": now, "comparison": comparison }))
}

fn acquire(cfg: &Config, location: Option<&Location>, seed: u64, now: DateTime<Utc>) -> Result<Acquired, String> {
    if cfg.fake_data {
        return Ok(Acquired {
            samples: fake_data::generate_forecast(now, cfg.forecast_hours, seed),
            fetched_at: now,
            is_stale: false,
        });
    }

    let location = location.ok_or_else(|| "no location configured".to_string())?;
    let ttl = chrono::Duration::from_std(cfg.cache_ttl).map_err(|e| format!("CACHE_TTL_SECS out of range: {}", e))?;
    let max_stale = chrono::Duration::from_std(cfg.cache_max_stale)
        .map_err(|e| format!("CACHE_MAX_STALE_SECS out of range: {}", e))?;

    let client = OpenMeteoClient::new(&cfg.open_meteo_url, cfg.max_request_retries);
    let mut store = JsonFileStore::new(&cfg.cache_dir);
    let key = CacheKey::forecast(location, cfg.forecast_hours);
    let resolved = cache::resolve(&mut store, &key, now, ttl, max_stale, || {
        info!("Fetching {}h forecast for {}", cfg.forecast_hours, location);
        client.get_forecast(location, cfg.forecast_hours)
    })
    .map_err(|e| format!("Forecast acquisition failed: {}", e))?;

    Ok(Acquired {
        samples: upcoming_samples(resolved.payload, now),
        fetched_at: resolved.fetched_at,
        is_stale: resolved.is_stale,
    })
}

/// Drops hours that ended before the current one; a reused payload may start hours ago.
fn upcoming_samples(samples: Vec<AtmosphericSample>, now: DateTime<Utc>) -> Vec<AtmosphericSample> {
    let current_hour = floor_to_hour(now);
    let total = samples.len();
    let upcoming: Vec<AtmosphericSample> = samples.into_iter().filter(|s| s.timestamp >= current_hour).collect();
    if upcoming.len() < total {
        info!("Skipped {} past hour(s) of the forecast", total - upcoming.len());
    }
    upcoming
}

/// Conditions that hold for the current hour. Evaluation errors are logged, never fatal.
fn evaluate_alerts(conditions: &[Condition], series: &ScoredSeries, now: DateTime<Utc>) -> Vec<String> {
    let Some(point) = series.point_at(now) else {
        return Vec::new();
    };
    let vars = AlertVariables::from_point(point);
    conditions
        .iter()
        .filter(|c| match c.evaluate(&vars) {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Alert '{}' not evaluated: {}", c, e);
                false
            }
        })
        .map(|c| {
            warn!("Alert triggered at {}: {}", point.timestamp(), c);
            c.source().to_string()
        })
        .collect()
}

fn merge(mut header: serde_json::Value, body: serde_json::Value) -> serde_json::Value {
    if let (Some(h), serde_json::Value::Object(b)) = (header.as_object_mut(), body) {
        h.extend(b);
    }
    header
}

fn print_json(value: &serde_json::Value) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| format!("failed to encode output: {}", e))?;
    println!("{}", out);
    Ok(())
}

fn parse_args<I: IntoIterator<Item = OsString>>(args: I) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut command: Option<Command> = None;

    let mut set_env_file = |path: &str| -> Result<(), String> {
        if env_file.is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
        if path.is_empty() {
            return Err("`--env-file` requires a path argument".to_string());
        }
        env_file = Some(PathBuf::from(path));
        Ok(())
    };

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                let value = value.to_str().ok_or("argument contains invalid UTF-8")?;
                set_env_file(value)?;
            }
            Some(s) if s.starts_with("--env-file=") => set_env_file(&s["--env-file=".len()..])?,
            Some(s) if !s.starts_with('-') && command.is_none() => {
                command = Some(Command::parse(s).ok_or_else(|| format!("unknown command: {}", s))?);
            }
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    Ok(CliArgs {
        env_file,
        command: command.ok_or("usage: seeing-forecast [--env-file PATH] <now|forecast|best-window|best-nights|timelapse|compare>")?,
    })
}

fn load_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }
    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if !default_path.is_file() {
        return Ok(None);
    }
    load_env_file(&default_path)?;
    Ok(Some(LoadedEnvFile {
        path: default_path,
        explicit: false,
    }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let body = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in body.lines().enumerate() {
        let Some((key, value)) =
            parse_env_assignment(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // values already in the process environment win
        if std::env::var_os(&key).is_none() {
            // SAFETY: called before the logger or any other thread starts.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(char::is_whitespace) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_env_value(raw)?)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    match trimmed.chars().next() {
        Some(q @ ('"' | '\'')) => parse_quoted(&trimmed[1..], q),
        _ => Ok(trimmed.split('#').next().unwrap_or_default().trim_end().to_string()),
    }
}

/// Body of a quoted value; escapes are honoured inside double quotes only.
fn parse_quoted(input: &str, quote: char) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| "unterminated escape sequence in double-quoted value".to_string())?;
                result.push(match escaped {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    other => other,
                });
            }
            c if c == quote => {
                let rest = chars.as_str().trim();
                return if rest.is_empty() || rest.starts_with('#') {
                    Ok(result)
                } else {
                    Err("unexpected characters after closing quote".to_string())
                };
            }
            other => result.push(other),
        }
    }
    Err("unterminated quoted value".to_string())
}

fn main() {
    let loaded_env = match parse_args(std::env::args_os().skip(1)).and_then(|cli| {
        let env = load_env(cli.env_file)?;
        Ok((cli.command, env))
    }) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let (command, env_file) = loaded_env;

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = env_file.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "seeing-forecast {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn parses_command_and_env_file() {
        assert_eq!(
            parse_args(args(&["--env-file", "site.env", "best-window"])).unwrap(),
            CliArgs {
                env_file: Some(PathBuf::from("site.env")),
                command: Command::BestWindow
            }
        );
        assert_eq!(
            parse_args(args(&["timelapse", "--env-file=x.env"])).unwrap().command,
            Command::Timelapse
        );
        assert_eq!(parse_args(args(&["now"])).unwrap().env_file, None);
        assert_eq!(parse_args(args(&["best-nights"])).unwrap().command, Command::BestNights);
        assert_eq!(parse_args(args(&["compare"])).unwrap().command, Command::Compare);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["tomorrow"])).is_err());
        assert!(parse_args(args(&["now", "forecast"])).is_err());
        assert!(parse_args(args(&["--env-file"])).is_err());
        assert!(parse_args(args(&["--env-file=a", "--env-file=b", "now"])).is_err());
        assert!(parse_args(args(&["--verbose", "now"])).is_err());
    }

    #[test]
    fn parses_env_assignments() {
        assert_eq!(parse_env_assignment("  # comment").unwrap(), None);
        assert_eq!(parse_env_assignment("").unwrap(), None);
        assert_eq!(
            parse_env_assignment("export SEEING_LATITUDE=-29.18 # site").unwrap(),
            Some(("SEEING_LATITUDE".to_string(), "-29.18".to_string()))
        );
        assert_eq!(
            parse_env_assignment(r#"ALERT_CONDITIONS="score >= 70; cloud_cover < 20""#).unwrap(),
            Some(("ALERT_CONDITIONS".to_string(), "score >= 70; cloud_cover < 20".to_string()))
        );
        assert_eq!(
            parse_env_assignment(r#"NAME="a\"b\n""#).unwrap(),
            Some(("NAME".to_string(), "a\"b\n".to_string()))
        );
        assert_eq!(
            parse_env_assignment(r"RAW='c:\path # x'").unwrap(),
            Some(("RAW".to_string(), r"c:\path # x".to_string()))
        );
        assert_eq!(parse_env_assignment("EMPTY=").unwrap(), Some(("EMPTY".to_string(), String::new())));
    }

    #[test]
    fn rejects_malformed_env_lines() {
        assert!(parse_env_assignment("NO_EQUALS").is_err());
        assert!(parse_env_assignment("=value").is_err());
        assert!(parse_env_assignment("BAD KEY=1").is_err());
        assert!(parse_env_assignment(r#"OPEN="never closed"#).is_err());
        assert!(parse_env_assignment(r#"TRAIL="x" y"#).is_err());
    }

    #[test]
    fn reused_payload_starts_at_the_current_hour() {
        use chrono::TimeZone;
        let fetched = Utc.with_ymd_and_hms(2025, 1, 10, 13, 0, 0).unwrap();
        let samples = fake_data::generate_forecast(fetched, 48, 7);

        let later = Utc.with_ymd_and_hms(2025, 1, 10, 16, 30, 0).unwrap();
        let upcoming = upcoming_samples(samples.clone(), later);
        assert_eq!(upcoming.len(), 45);
        assert_eq!(upcoming[0].timestamp, Utc.with_ymd_and_hms(2025, 1, 10, 16, 0, 0).unwrap());
        assert_eq!(upcoming_samples(samples, fetched).len(), 48);
    }

    #[test]
    fn merge_flattens_body_into_header() {
        let merged = merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }
}
