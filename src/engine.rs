//! Request orchestration: snapshot, fetch, snap, search.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use h3o::Resolution;
use tracing::{debug, info};

use crate::alternatives::{AlternativeSet, generate_alternatives};
use crate::config::Config;
use crate::crime::{CachedCrimeSource, CrimeSnapshot, CrimeSource, JsonFileCrimeSource};
use crate::diagnostics::{
    EdgeDiagnostic, EdgeImpact, ProximityVerdict, crime_impact, explain_path, passes_near,
};
use crate::error::Error;
use crate::model::{Coordinate, CrimeType, RouteRequest};
use crate::path::{Path, PathKind};
use crate::retry::with_retry;
use crate::safety::RiskWeighting;
use crate::search::{SearchBudget, astar};
use crate::spatial::Snap;
use crate::store::{NetworkSnapshot, NetworkStore};
use crate::view::{CostModel, WeightedGraphView};

/// Primary route and alternatives for one request, with the network snapshot
/// they index into.
pub struct RouteOutcome {
    pub network: Arc<NetworkSnapshot>,
    pub primary: Path,
    pub alternatives: AlternativeSet,
    pub start: Snap,
    pub goal: Snap,
    pub crime_count: usize,
}

pub struct ProximityOutcome {
    pub verdict: ProximityVerdict,
    pub route: RouteOutcome,
}

pub struct RouteExplanation {
    pub route: RouteOutcome,
    pub edges: Vec<EdgeDiagnostic>,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkInfo {
    pub version: u64,
    pub nodes: usize,
    pub edges: usize,
    pub loaded_at: DateTime<Utc>,
}

/// Inputs shared by every search of one request.
struct Prepared {
    network: Arc<NetworkSnapshot>,
    crimes: CrimeSnapshot,
    start: Snap,
    goal: Snap,
    budget: SearchBudget,
}

pub struct RouteEngine {
    config: Config,
    store: Arc<NetworkStore>,
    crimes: Box<dyn CrimeSource>,
    weighting: RiskWeighting,
    resolution: Resolution,
    fixed_time: Option<DateTime<Utc>>,
}

impl RouteEngine {
    pub fn new(
        config: Config,
        store: Arc<NetworkStore>,
        crimes: Box<dyn CrimeSource>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let resolution = Resolution::try_from(config.crimes.h3_resolution)
            .map_err(|e| Error::InvalidConfig(format!("crimes.h3_resolution: {e}")))?;
        Ok(Self {
            weighting: RiskWeighting::new(&config.risk),
            config,
            store,
            crimes,
            resolution,
            fixed_time: None,
        })
    }

    /// Engine reading crimes from the configured JSON export, cached for
    /// `crimes.cache_ttl_secs`.
    pub fn from_config(config: Config, store: Arc<NetworkStore>) -> Result<Self, Error> {
        let source = JsonFileCrimeSource::new(config.crimes.path.clone());
        let crimes: Box<dyn CrimeSource> = match config.crimes.cache_ttl_secs {
            0 => Box::new(source),
            ttl => Box::new(CachedCrimeSource::new(source, Duration::from_secs(ttl))),
        };
        Self::new(config, store, crimes)
    }

    /// Measures report recency against `time` instead of the wall clock.
    pub fn with_fixed_time(mut self, time: DateTime<Utc>) -> Self {
        self.fixed_time = Some(time);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<NetworkStore> {
        &self.store
    }

    pub fn network_info(&self) -> NetworkInfo {
        let snapshot = self.store.snapshot();
        NetworkInfo {
            version: snapshot.version,
            nodes: snapshot.network.node_count(),
            edges: snapshot.network.edge_count(),
            loaded_at: snapshot.loaded_at,
        }
    }

    pub fn compute_safest_route(&self, request: &RouteRequest) -> Result<RouteOutcome, Error> {
        self.run(request, PathKind::Primary, |_, _| ())
            .map(|(route, ())| route)
    }

    /// Computes the route and checks whether it passes within the configured
    /// proximity threshold of `crime`. The point need not be a known report.
    pub fn debug_crime_proximity(
        &self,
        crime: Coordinate,
        request: &RouteRequest,
    ) -> Result<ProximityOutcome, Error> {
        if !crime.is_valid() {
            return Err(Error::InvalidCoordinates(format!(
                "crime point ({}, {}) is not a valid coordinate",
                crime.lat, crime.lng
            )));
        }
        let threshold = self.config.diagnostics.proximity_threshold_m;
        let (route, verdict) = self.run(request, PathKind::Debug, |view, path| {
            passes_near(view.network(), path, crime, threshold)
        })?;
        info!(
            "Proximity check: route {} within {threshold} m of ({}, {}), closest {:.1} m",
            if verdict.near { "passes" } else { "does not pass" },
            crime.lat,
            crime.lng,
            verdict.closest_distance_m
        );
        Ok(ProximityOutcome { verdict, route })
    }

    /// Primary route with the per-edge cost breakdown.
    pub fn explain_route(&self, request: &RouteRequest) -> Result<RouteExplanation, Error> {
        let (route, edges) = self.run(request, PathKind::Debug, explain_path)?;
        Ok(RouteExplanation { route, edges })
    }

    /// Edges a new report of `crime_type` at `point` would penalize.
    pub fn crime_impact(
        &self,
        point: Coordinate,
        crime_type: CrimeType,
    ) -> Result<Vec<EdgeImpact>, Error> {
        let snapshot = self.store.snapshot();
        if !snapshot.region.contains(point) {
            return Err(Error::InvalidCoordinates(format!(
                "({}, {}) is outside the serviceable region",
                point.lat, point.lng
            )));
        }
        Ok(crime_impact(
            &snapshot.network,
            &snapshot.index,
            &self.weighting,
            point,
            crime_type,
            self.now(),
        ))
    }

    fn now(&self) -> DateTime<Utc> {
        self.fixed_time.unwrap_or_else(Utc::now)
    }

    fn run<T>(
        &self,
        request: &RouteRequest,
        kind: PathKind,
        inspect: impl FnOnce(&WeightedGraphView<'_>, &Path) -> T,
    ) -> Result<(RouteOutcome, T), Error> {
        let started = Instant::now();
        let prepared = self.prepare(request)?;
        let network = &prepared.network.network;
        let view = WeightedGraphView::new(network, request.mode, &self.weighting, &prepared.crimes);

        let found = astar(&view, prepared.start.node, prepared.goal.node, &prepared.budget)?;
        let primary = Path::from_edges(&view, &found.edges, kind, prepared.start.node)?;
        let alternatives = generate_alternatives(
            &view,
            &primary,
            prepared.goal.node,
            &self.config.alternatives,
            &prepared.budget,
        )?;
        let extra = inspect(&view, &primary);

        info!(
            "Route {} -> {} ({}): {} edges, base {:.1}, risk {:.1}, {} alternatives, {} crimes, {:?}",
            network.node(prepared.start.node).id,
            network.node(prepared.goal.node).id,
            request.mode,
            primary.len(),
            primary.base_cost,
            primary.risk_cost,
            alternatives.accepted.len(),
            prepared.crimes.len(),
            started.elapsed()
        );
        debug!(
            "Primary search expanded {} nodes, risk computed for {} edges",
            found.expanded,
            view.cached_edges()
        );

        let crime_count = prepared.crimes.len();
        drop(view);
        Ok((
            RouteOutcome {
                network: prepared.network,
                primary,
                alternatives,
                start: prepared.start,
                goal: prepared.goal,
                crime_count,
            },
            extra,
        ))
    }

    fn prepare(&self, request: &RouteRequest) -> Result<Prepared, Error> {
        let budget = SearchBudget::with_timeout(self.config.search.timeout())
            .max_expansions(self.config.search.max_expansions);
        let network = self.store.snapshot();

        for (label, coord) in [("start", request.start), ("end", request.end)] {
            if !network.region.contains(coord) {
                return Err(Error::InvalidCoordinates(format!(
                    "{label} ({}, {}) is outside the serviceable region",
                    coord.lat, coord.lng
                )));
            }
        }
        let area = network
            .region
            .bounding_box()
            .ok_or_else(|| Error::UpstreamDataUnavailable("road network is empty".into()))?;

        // Fetch retries share the request deadline with the searches.
        let reports = with_retry(
            "crime store",
            self.config.crimes.fetch_attempts,
            Duration::from_millis(self.config.crimes.retry_backoff_ms),
            || {
                if budget.is_expired() {
                    return Err(Error::Timeout { expanded: 0 });
                }
                self.crimes.fetch(&area)
            },
        )?;
        let crimes = CrimeSnapshot::new(
            reports,
            self.now(),
            Some(&area),
            self.config.crimes.lookback_days.map(chrono::Duration::days),
            self.resolution,
        )?;

        let max_snap = self.config.search.max_snap_distance_m;
        let start = network
            .index
            .nearest_node(&network.network, request.start, request.mode, max_snap)?;
        let goal = network
            .index
            .nearest_node(&network.network, request.end, request.mode, max_snap)?;
        debug!(
            "Snapped start {:.1} m, end {:.1} m from the request",
            start.distance_m, goal.distance_m
        );

        Ok(Prepared {
            network,
            crimes,
            start,
            goal,
            budget,
        })
    }
}
