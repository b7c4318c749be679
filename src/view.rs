//! Cost functions consumed by the search.

use std::collections::HashMap;

use parking_lot::RwLock;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::crime::CrimeSnapshot;
use crate::graph::RoadNetwork;
use crate::model::TravelMode;
use crate::safety::{EdgeRisk, RiskWeighting};

/// What the search sees of the network: mode-filtered adjacency and a
/// non-negative cost per edge.
pub trait CostModel {
    fn network(&self) -> &RoadNetwork;

    fn mode(&self) -> TravelMode;

    fn base_cost(&self, edge: EdgeIndex) -> f64 {
        self.network().edge(edge).base_cost
    }

    fn risk_cost(&self, edge: EdgeIndex) -> f64;

    /// Cost the search minimises.
    fn cost(&self, edge: EdgeIndex) -> f64 {
        self.base_cost(edge) + self.risk_cost(edge)
    }

    fn usable(&self, edge: EdgeIndex) -> bool {
        self.network().edge(edge).modes.allows(self.mode())
    }

    /// Usable outgoing edges of `node` with their targets, in graph order.
    fn neighbors(&self, node: NodeIndex) -> impl Iterator<Item = (EdgeIndex, NodeIndex)> + '_ {
        self.network()
            .graph
            .edges(node)
            .filter(move |e| self.usable(e.id()))
            .map(|e| (e.id(), e.target()))
    }
}

/// Road network + travel mode + risk weighting over one crime snapshot.
///
/// Risk is computed lazily the first time an edge is costed and kept for the
/// life of the view, which is one request.
pub struct WeightedGraphView<'a> {
    network: &'a RoadNetwork,
    mode: TravelMode,
    weighting: &'a RiskWeighting,
    crimes: &'a CrimeSnapshot,
    risk_cache: RwLock<HashMap<EdgeIndex, f64>>,
}

impl<'a> WeightedGraphView<'a> {
    pub fn new(
        network: &'a RoadNetwork,
        mode: TravelMode,
        weighting: &'a RiskWeighting,
        crimes: &'a CrimeSnapshot,
    ) -> Self {
        Self {
            network,
            mode,
            weighting,
            crimes,
            risk_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn crimes(&self) -> &CrimeSnapshot {
        self.crimes
    }

    pub fn weighting(&self) -> &RiskWeighting {
        self.weighting
    }

    /// Full breakdown for one edge, bypassing the cache.
    pub fn edge_risk(&self, edge: EdgeIndex) -> EdgeRisk {
        self.weighting
            .edge_risk(&self.network.edge(edge).geometry, self.crimes)
    }

    /// Number of edges whose risk has been computed so far.
    pub fn cached_edges(&self) -> usize {
        self.risk_cache.read().len()
    }
}

impl CostModel for WeightedGraphView<'_> {
    fn network(&self) -> &RoadNetwork {
        self.network
    }

    fn mode(&self) -> TravelMode {
        self.mode
    }

    fn risk_cost(&self, edge: EdgeIndex) -> f64 {
        if let Some(risk) = self.risk_cache.read().get(&edge) {
            return *risk;
        }
        let risk = self
            .weighting
            .edge_penalty(&self.network.edge(edge).geometry, self.crimes);
        self.risk_cache.write().insert(edge, risk);
        risk
    }
}

/// Wraps a view and multiplies the cost of previously used edges by
/// `factor^uses`. Base and risk costs are passed through untouched so that
/// paths built from this view still report true costs.
pub struct PenalizedView<'v, V> {
    inner: &'v V,
    factor: f64,
    uses: HashMap<EdgeIndex, i32>,
}

impl<'v, V: CostModel> PenalizedView<'v, V> {
    pub fn new(inner: &'v V, factor: f64) -> Self {
        Self {
            inner,
            factor,
            uses: HashMap::new(),
        }
    }

    pub fn penalize(&mut self, edges: impl IntoIterator<Item = EdgeIndex>) {
        for edge in edges {
            *self.uses.entry(edge).or_default() += 1;
        }
    }

    pub fn uses(&self, edge: EdgeIndex) -> i32 {
        self.uses.get(&edge).copied().unwrap_or(0)
    }
}

impl<V: CostModel> CostModel for PenalizedView<'_, V> {
    fn network(&self) -> &RoadNetwork {
        self.inner.network()
    }

    fn mode(&self) -> TravelMode {
        self.inner.mode()
    }

    fn base_cost(&self, edge: EdgeIndex) -> f64 {
        self.inner.base_cost(edge)
    }

    fn risk_cost(&self, edge: EdgeIndex) -> f64 {
        self.inner.risk_cost(edge)
    }

    fn cost(&self, edge: EdgeIndex) -> f64 {
        let cost = self.inner.cost(edge);
        match self.uses(edge) {
            0 => cost,
            n => cost * self.factor.powi(n),
        }
    }

    fn usable(&self, edge: EdgeIndex) -> bool {
        self.inner.usable(edge)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use h3o::Resolution;

    use super::*;
    use crate::config::{Falloff, RiskConfig};
    use crate::graph::EdgeSpec;
    use crate::model::{Coordinate, CrimeReport, CrimeType, ModeSet};

    fn network() -> RoadNetwork {
        let mut builder = RoadNetwork::builder();
        builder.add_node(1, Coordinate::new(0.0, 0.0));
        builder.add_node(2, Coordinate::new(0.0, 0.001));
        builder.add_node(3, Coordinate::new(0.001, 0.0));
        builder.add_edge(1, 2, EdgeSpec::new(ModeSet::DRIVE).cost(10.0)).unwrap();
        builder.add_edge(1, 3, EdgeSpec::new(ModeSet::WALK).cost(10.0)).unwrap();
        builder.build()
    }

    fn weighting() -> RiskWeighting {
        RiskWeighting::new(&RiskConfig {
            radius_m: 20.0,
            falloff: Falloff::Constant,
            multiplier: 2.0,
            recency_decay: false,
            ..RiskConfig::default()
        })
    }

    #[test]
    fn test_neighbors_filter_by_mode() {
        let network = network();
        let weighting = weighting();
        let crimes = CrimeSnapshot::empty(Utc::now());
        let start = network.node_by_id(1).unwrap();

        let drive = WeightedGraphView::new(&network, TravelMode::Drive, &weighting, &crimes);
        let targets: Vec<i64> = drive
            .neighbors(start)
            .map(|(_, n)| network.node(n).id)
            .collect();
        assert_eq!(targets, [2]);

        let walk = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);
        let targets: Vec<i64> = walk
            .neighbors(start)
            .map(|(_, n)| network.node(n).id)
            .collect();
        assert_eq!(targets, [3]);
    }

    #[test]
    fn test_risk_is_cached_per_view() {
        let network = network();
        let weighting = weighting();
        let crimes = CrimeSnapshot::new(
            vec![CrimeReport {
                id: "r".into(),
                crime_type: CrimeType::Theft,
                location: Coordinate::new(0.0, 0.0005),
                time: Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
                severity: None,
            }],
            Utc.with_ymd_and_hms(2026, 10, 2, 0, 0, 0).unwrap(),
            None,
            None,
            Resolution::Nine,
        )
        .unwrap();
        let view = WeightedGraphView::new(&network, TravelMode::Drive, &weighting, &crimes);
        let start = network.node_by_id(1).unwrap();
        let (edge, _) = view.neighbors(start).next().unwrap();

        assert_eq!(view.cached_edges(), 0);
        assert_eq!(view.risk_cost(edge), 6.0);
        assert_eq!(view.cost(edge), 16.0);
        assert_eq!(view.cached_edges(), 1);
        assert_eq!(view.edge_risk(edge).contributions.len(), 1);
    }

    #[test]
    fn test_penalized_view_multiplies_cost_only() {
        let network = network();
        let weighting = weighting();
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Drive, &weighting, &crimes);
        let start = network.node_by_id(1).unwrap();
        let (edge, _) = view.neighbors(start).next().unwrap();

        let mut penalized = PenalizedView::new(&view, 10.0);
        assert_eq!(penalized.cost(edge), 10.0);
        penalized.penalize([edge]);
        penalized.penalize([edge]);
        assert_eq!(penalized.uses(edge), 2);
        assert_eq!(penalized.cost(edge), 1000.0);
        assert_eq!(penalized.base_cost(edge), 10.0);
        assert_eq!(penalized.risk_cost(edge), 0.0);
    }
}
