//! Crime store adapters and the per-request crime snapshot.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use h3o::Resolution;
use itertools::Itertools;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Error;
use crate::geometry::{BoundingBox, haversine_m, polyline_distance_m};
use crate::model::{Coordinate, CrimeReport};
use crate::spatial::CrimeIndex;

/// Read-only access to the external crime-report store.
pub trait CrimeSource: Send + Sync {
    /// Reports located inside `area`.
    ///
    /// # Errors
    ///
    /// [`Error::UpstreamDataUnavailable`] when the store cannot be reached.
    fn fetch(&self, area: &BoundingBox) -> Result<Vec<CrimeReport>, Error>;
}

/// Fixed in-memory report set.
#[derive(Debug, Clone, Default)]
pub struct StaticCrimeSource {
    reports: Vec<CrimeReport>,
}

impl StaticCrimeSource {
    pub fn new(reports: Vec<CrimeReport>) -> Self {
        Self { reports }
    }
}

impl CrimeSource for StaticCrimeSource {
    fn fetch(&self, area: &BoundingBox) -> Result<Vec<CrimeReport>, Error> {
        Ok(self
            .reports
            .iter()
            .filter(|r| area.contains(r.location))
            .cloned()
            .collect())
    }
}

/// JSON array of reports on disk, re-read on every fetch so that an external
/// exporter can replace the file at any time.
#[derive(Debug, Clone)]
pub struct JsonFileCrimeSource {
    path: PathBuf,
}

impl JsonFileCrimeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CrimeSource for JsonFileCrimeSource {
    fn fetch(&self, area: &BoundingBox) -> Result<Vec<CrimeReport>, Error> {
        let file = File::open(&self.path).map_err(|e| {
            Error::UpstreamDataUnavailable(format!("{}: {e}", self.path.display()))
        })?;
        let reports: Vec<CrimeReport> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| {
                // The exporter may be mid-write, so this is worth retrying.
                Error::UpstreamDataUnavailable(format!("{}: {e}", self.path.display()))
            })?;
        let total = reports.len();
        let reports: Vec<CrimeReport> = reports
            .into_iter()
            .filter(|r| area.contains(r.location))
            .collect();
        debug!(
            "Read {total} crime reports from {}, {} inside the query area",
            self.path.display(),
            reports.len()
        );
        Ok(reports)
    }
}

struct CacheEntry {
    fetched_at: Instant,
    area: BoundingBox,
    reports: Arc<Vec<CrimeReport>>,
}

/// Reuses the last fetch for up to `ttl` when the query area is unchanged.
pub struct CachedCrimeSource<S> {
    inner: S,
    ttl: Duration,
    entry: Mutex<Option<CacheEntry>>,
}

impl<S: CrimeSource> CachedCrimeSource<S> {
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }
}

impl<S: CrimeSource> CrimeSource for CachedCrimeSource<S> {
    fn fetch(&self, area: &BoundingBox) -> Result<Vec<CrimeReport>, Error> {
        if let Some(entry) = self.entry.lock().as_ref() {
            if entry.area == *area && entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.reports.as_ref().clone());
            }
        }

        // Fetch outside the lock so a slow store does not serialise readers.
        let reports = Arc::new(self.inner.fetch(area)?);
        *self.entry.lock() = Some(CacheEntry {
            fetched_at: Instant::now(),
            area: *area,
            reports: Arc::clone(&reports),
        });
        Ok(reports.as_ref().clone())
    }
}

/// Immutable view of the crime reports used for one request.
pub struct CrimeSnapshot {
    reports: Vec<CrimeReport>,
    index: CrimeIndex,
    reference_time: DateTime<Utc>,
}

impl CrimeSnapshot {
    /// Builds the snapshot, dropping reports older than `lookback`.
    ///
    /// Reports are ordered by id so that risk sums do not depend on the order
    /// the store returned them in.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCoordinates`] when a report lies outside `area`.
    pub fn new(
        mut reports: Vec<CrimeReport>,
        reference_time: DateTime<Utc>,
        area: Option<&BoundingBox>,
        lookback: Option<chrono::Duration>,
        resolution: Resolution,
    ) -> Result<Self, Error> {
        if let Some(area) = area {
            if let Some(outside) = reports.iter().find(|r| !area.contains(r.location)) {
                return Err(Error::InvalidCoordinates(format!(
                    "crime report {} at ({}, {}) is outside the serviceable region",
                    outside.id, outside.location.lat, outside.location.lng
                )));
            }
        }
        if let Some(lookback) = lookback {
            let cutoff = reference_time - lookback;
            let before = reports.len();
            reports.retain(|r| r.time >= cutoff);
            if reports.len() < before {
                debug!("Dropped {} reports older than {cutoff}", before - reports.len());
            }
        }
        reports.sort_by(|a, b| a.id.cmp(&b.id));

        let index = CrimeIndex::build(&reports, resolution)?;
        debug!("Crime snapshot holds {} reports", reports.len());
        Ok(Self {
            reports,
            index,
            reference_time,
        })
    }

    pub fn empty(reference_time: DateTime<Utc>) -> Self {
        Self {
            reports: Vec::new(),
            index: CrimeIndex::empty(Resolution::Nine),
            reference_time,
        }
    }

    pub fn reports(&self) -> &[CrimeReport] {
        &self.reports
    }

    pub fn report(&self, i: usize) -> &CrimeReport {
        &self.reports[i]
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Time recency is measured against.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    /// Reports within `radius_m` of `center`, with their distance, in report order.
    pub fn within(&self, center: Coordinate, radius_m: f64) -> Vec<(usize, f64)> {
        self.index
            .candidates_within(center, radius_m)
            .into_iter()
            .map(|i| (i, haversine_m(center, self.reports[i].location)))
            .filter(|(_, d)| *d <= radius_m)
            .collect()
    }

    /// Reports within `radius_m` of any segment of `points`, with the minimum
    /// distance to the polyline, in report order.
    pub fn near_polyline(&self, points: &[Coordinate], radius_m: f64) -> Vec<(usize, f64)> {
        if self.reports.is_empty() || points.is_empty() {
            return Vec::new();
        }

        // Every point of a segment lies within half its length of the midpoint.
        let mut candidates = BTreeSet::new();
        if let [single] = points {
            candidates.extend(self.index.candidates_within(*single, radius_m));
        }
        for (a, b) in points.iter().tuple_windows() {
            let mid = Coordinate::new((a.lat + b.lat) / 2.0, (a.lng + b.lng) / 2.0);
            let reach = radius_m + haversine_m(*a, *b) / 2.0 + 1.0;
            candidates.extend(self.index.candidates_within(mid, reach));
        }

        candidates
            .into_iter()
            .filter_map(|i| {
                let (d, _) = polyline_distance_m(self.reports[i].location, points)?;
                (d <= radius_m).then_some((i, d))
            })
            .collect()
    }
}
