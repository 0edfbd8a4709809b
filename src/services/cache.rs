//! Fetch-or-reuse policy in front of the weather provider.
//!
//! `now` is always passed in; nothing in here reads the clock.

use crate::models::seeing::duration_secs;
use crate::models::weather::Location;
use crate::utils::format_age;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

const FORECAST_PREFIX: &str = "forecast";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// `forecast:{lat}:{lon}:{hours}h` with coordinates at 2 decimals.
    ///
    /// The key names a site and horizon, not a start hour, so a later run can
    /// still find an older payload to fall back on.
    pub fn forecast(location: &Location, hours: u32) -> Self {
        CacheKey(format!(
            "{}:{:.2}:{:.2}:{}h",
            FORECAST_PREFIX, location.latitude, location.longitude, hours
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn file_name(&self) -> String {
        let safe: String = self
            .0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        format!("{}.json", safe)
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<P> {
    pub key: CacheKey,
    pub fetched_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub payload: P,
}

impl<P> CacheEntry<P> {
    /// `None` when the entry claims to be fetched after `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.fetched_at <= now).then(|| now - self.fetched_at)
    }
}

// =====================
// Storage
// =====================

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "cache io error: {}", e),
            StoreError::Json(e) => write!(f, "cache entry is not valid json: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Json(value)
    }
}

pub trait CacheStore<P> {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry<P>>, StoreError>;
    /// Replaces any existing entry for the same key wholesale.
    fn put(&mut self, entry: CacheEntry<P>) -> Result<(), StoreError>;
    /// Drops every entry, returning how many were removed.
    fn clear(&mut self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
pub struct MemoryStore<P> {
    entries: HashMap<CacheKey, CacheEntry<P>>,
}

impl<P> Default for MemoryStore<P> {
    fn default() -> Self {
        MemoryStore {
            entries: HashMap::new(),
        }
    }
}

impl<P: Clone> CacheStore<P> for MemoryStore<P> {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry<P>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, entry: CacheEntry<P>) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn clear(&mut self) -> Result<usize, StoreError> {
        let n = self.entries.len();
        self.entries.clear();
        Ok(n)
    }
}

/// One JSON file per key. Writes go to a temp file that is renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFileStore { dir: dir.into() }
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl<P: Serialize + DeserializeOwned> CacheStore<P> for JsonFileStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry<P>>, StoreError> {
        let body = match std::fs::read_to_string(self.path_for(key)) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry: CacheEntry<P> = serde_json::from_str(&body)?;
        // file names are lossy, so a collision reads as a miss
        Ok((entry.key == *key).then_some(entry))
    }

    fn put(&mut self, entry: CacheEntry<P>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Removes entry files only; anything else in the directory is left alone.
    fn clear(&mut self) -> Result<usize, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let is_entry = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FORECAST_PREFIX) && n.ends_with(".json"));
            if is_entry {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// =====================
// Policy
// =====================

#[derive(Debug, Clone, PartialEq)]
pub enum CacheError {
    /// Fetch failed and no usable entry was cached.
    AcquisitionFailure { key: CacheKey, reason: String },
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::AcquisitionFailure { key, reason } => {
                write!(f, "could not acquire {} and no usable cached copy: {}", key, reason)
            }
        }
    }
}

impl std::error::Error for CacheError {}

/// Warning carried when a stale entry stood in for a failed fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleDataUsed {
    pub key: CacheKey,
    pub fetched_at: DateTime<Utc>,
    pub age: Duration,
    pub reason: String,
}

impl Display for StaleDataUsed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "using cached data from {} ago ({}); refresh failed: {}",
            format_age(self.age),
            self.fetched_at.format("%Y-%m-%d %H:%M UTC"),
            self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<P> {
    pub payload: P,
    pub fetched_at: DateTime<Utc>,
    pub is_stale: bool,
    pub warning: Option<StaleDataUsed>,
}

pub fn resolve<P, S, E, F>(
    store: &mut S,
    key: &CacheKey,
    now: DateTime<Utc>,
    ttl: Duration,
    max_stale: Duration,
    fetch: F,
) -> Result<Resolved<P>, CacheError>
where
    P: Clone,
    S: CacheStore<P>,
    E: Display,
    F: FnOnce() -> Result<P, E>,
{
    let cached = match store.get(key) {
        Ok(Some(entry)) if entry.age(now).is_none() => {
            warn!(
                "Cache entry for {} is dated {} which is after now, treating as a miss",
                key, entry.fetched_at
            );
            None
        }
        Ok(entry) => entry,
        Err(e) => {
            warn!("Cache read for {} failed, treating as a miss: {}", key, e);
            None
        }
    };

    if let Some((entry, age)) = cached.as_ref().and_then(|e| e.age(now).map(|a| (e, a))) {
        if age <= ttl {
            debug!("Cache hit for {} (age {})", key, format_age(age));
            return Ok(Resolved {
                payload: entry.payload.clone(),
                fetched_at: entry.fetched_at,
                is_stale: false,
                warning: None,
            });
        }
    }

    match fetch() {
        Ok(payload) => {
            let entry = CacheEntry {
                key: key.clone(),
                fetched_at: now,
                ttl,
                payload: payload.clone(),
            };
            if let Err(e) = store.put(entry) {
                warn!("Cache write for {} failed: {}", key, e);
            } else {
                info!("Cached fresh data for {}", key);
            }
            Ok(Resolved {
                payload,
                fetched_at: now,
                is_stale: false,
                warning: None,
            })
        }
        Err(err) => {
            let reason = err.to_string();
            match cached.and_then(|e| e.age(now).map(|a| (e, a))) {
                Some((entry, age)) if age <= max_stale => {
                    let warning = StaleDataUsed {
                        key: key.clone(),
                        fetched_at: entry.fetched_at,
                        age,
                        reason,
                    };
                    warn!("{}", warning);
                    Ok(Resolved {
                        payload: entry.payload,
                        fetched_at: entry.fetched_at,
                        is_stale: true,
                        warning: Some(warning),
                    })
                }
                _ => Err(CacheError::AcquisitionFailure {
                    key: key.clone(),
                    reason,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 20, 30, 0).unwrap()
    }

    fn site() -> Location {
        Location::new("Test", -29.1834, -49.6412, 10.0, "UTC").unwrap()
    }

    fn key() -> CacheKey {
        CacheKey::forecast(&site(), 48)
    }

    fn seeded(fetched_at: DateTime<Utc>, payload: &str) -> MemoryStore<String> {
        let mut store = MemoryStore::default();
        store
            .put(CacheEntry {
                key: key(),
                fetched_at,
                ttl: Duration::hours(1),
                payload: payload.to_string(),
            })
            .unwrap();
        store
    }

    #[test]
    fn key_rounds_coordinates() {
        assert_eq!(key().as_str(), "forecast:-29.18:-49.64:48h");
        assert_eq!(key().file_name(), "forecast_-29.18_-49.64_48h.json");
        assert_ne!(key(), CacheKey::forecast(&site(), 24));
    }

    #[test]
    fn later_run_falls_back_to_earlier_fetch() {
        let first_run = Utc.with_ymd_and_hms(2025, 1, 10, 13, 30, 0).unwrap();
        let second_run = first_run + Duration::hours(3);
        let mut store = MemoryStore::<String>::default();

        let fetched = resolve(
            &mut store,
            &CacheKey::forecast(&site(), 48),
            first_run,
            Duration::hours(1),
            Duration::hours(6),
            || Ok::<_, String>("13:30 payload".to_string()),
        )
        .unwrap();
        assert!(!fetched.is_stale);

        let r = resolve(
            &mut store,
            &CacheKey::forecast(&site(), 48),
            second_run,
            Duration::hours(1),
            Duration::hours(6),
            || Err::<String, _>("offline"),
        )
        .unwrap();
        assert_eq!(r.payload, "13:30 payload");
        assert_eq!(r.fetched_at, first_run);
        assert!(r.is_stale);
        assert_eq!(r.warning.map(|w| w.age), Some(Duration::hours(3)));
    }

    #[test]
    fn entry_from_the_future_is_a_miss() {
        let mut store = seeded(now() + Duration::minutes(30), "future");
        let calls = Cell::new(0);
        let r = resolve(&mut store, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            calls.set(calls.get() + 1);
            Ok::<_, String>("fetched".to_string())
        })
        .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(r.payload, "fetched");

        let mut store = seeded(now() + Duration::minutes(30), "future");
        assert!(resolve(&mut store, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            Err::<String, _>("offline")
        })
        .is_err());
        assert_eq!(store.get(&key()).unwrap().and_then(|e| e.age(now())), None);
    }

    #[test]
    fn fresh_entry_is_returned_without_fetching() {
        let mut store = seeded(now() - Duration::minutes(20), "cached");
        let calls = Cell::new(0);
        let r = resolve(&mut store, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            calls.set(calls.get() + 1);
            Err::<String, _>("offline")
        })
        .unwrap();
        assert_eq!(calls.get(), 0);
        assert_eq!(r.payload, "cached");
        assert!(!r.is_stale);
        assert!(r.warning.is_none());
    }

    #[test]
    fn expired_entry_is_refreshed_and_replaced() {
        let mut store = seeded(now() - Duration::hours(2), "old");
        let r = resolve(&mut store, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            Ok::<_, String>("new".to_string())
        })
        .unwrap();
        assert_eq!(r.payload, "new");
        assert_eq!(r.fetched_at, now());
        let stored = store.get(&key()).unwrap().unwrap();
        assert_eq!(stored.payload, "new");
        assert_eq!(stored.fetched_at, now());
    }

    #[test]
    fn failed_fetch_falls_back_to_stale_entry() {
        let mut store = seeded(now() - Duration::hours(3), "old");
        let r = resolve(&mut store, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            Err::<String, _>("timeout")
        })
        .unwrap();
        assert_eq!(r.payload, "old");
        assert!(r.is_stale);
        let warning = r.warning.expect("stale warning");
        assert_eq!(warning.age, Duration::hours(3));
        assert!(warning.to_string().contains("3h 00m"));
        assert!(warning.to_string().contains("timeout"));
    }

    #[test]
    fn failed_fetch_without_usable_entry_propagates() {
        let mut store = seeded(now() - Duration::hours(7), "ancient");
        let err = resolve(&mut store, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            Err::<String, _>("dns failure")
        })
        .unwrap_err();
        assert_eq!(
            err,
            CacheError::AcquisitionFailure {
                key: key(),
                reason: "dns failure".to_string()
            }
        );

        let mut empty = MemoryStore::<String>::default();
        assert!(resolve(&mut empty, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            Err::<String, _>("dns failure")
        })
        .is_err());
    }

    #[test]
    fn json_store_round_trips_and_clears() {
        let dir = std::env::temp_dir().join(format!("seeing-cache-test-{}", std::process::id()));
        let mut store = JsonFileStore::new(&dir);
        let _ = CacheStore::<Vec<u8>>::clear(&mut store);

        let entry = CacheEntry {
            key: key(),
            fetched_at: now(),
            ttl: Duration::hours(1),
            payload: vec![1u8, 2, 3],
        };
        CacheStore::<Vec<u8>>::put(&mut store, entry.clone()).unwrap();
        assert!(!dir.join(format!("{}.tmp", key().file_name())).exists());
        assert_eq!(CacheStore::<Vec<u8>>::get(&store, &key()).unwrap(), Some(entry));

        std::fs::write(dir.join("notes.json"), "{}").unwrap();
        assert_eq!(CacheStore::<Vec<u8>>::clear(&mut store).unwrap(), 1);
        assert_eq!(CacheStore::<Vec<u8>>::get(&store, &key()).unwrap(), None);
        assert!(dir.join("notes.json").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_reads_as_miss() {
        let dir = std::env::temp_dir().join(format!("seeing-cache-corrupt-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut store = JsonFileStore::new(&dir);
        std::fs::write(dir.join(key().file_name()), "{not json").unwrap();

        assert!(CacheStore::<String>::get(&store, &key()).is_err());
        let r = resolve(&mut store, &key(), now(), Duration::hours(1), Duration::hours(6), || {
            Ok::<_, String>("fresh".to_string())
        })
        .unwrap();
        assert_eq!(r.payload, "fresh");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
