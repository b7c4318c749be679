use std::collections::HashSet;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::Serialize;

use crate::error::Error;
use crate::graph::RoadNetwork;
use crate::model::Coordinate;
use crate::view::CostModel;

/// Role a path plays in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Primary,
    Alternative { rank: usize },
    /// Considered by the alternative generator, not necessarily accepted
    Candidate,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Leg {
    pub edge: EdgeIndex,
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub base_cost: f64,
    pub risk_cost: f64,
}

/// Ordered, cycle-free sequence of adjacent edges with un-penalized costs.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub kind: PathKind,
    pub start: NodeIndex,
    pub legs: Vec<Leg>,
    pub base_cost: f64,
    pub risk_cost: f64,
    /// Flattened geometry for rendering
    pub points: Vec<Coordinate>,
}

/// Edge record in the wire format used by the map UI.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub from_lat: f64,
    pub from_lng: f64,
    pub to_lat: f64,
    pub to_lng: f64,
    pub weight: f64,
}

impl Path {
    /// Builds a path from search output, costing each edge with `view`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidData`] when the edges are not a simple chain starting
    /// at `start`.
    pub fn from_edges<V: CostModel>(
        view: &V,
        edges: &[EdgeIndex],
        kind: PathKind,
        start: NodeIndex,
    ) -> Result<Self, Error> {
        let network = view.network();
        let mut legs = Vec::with_capacity(edges.len());
        let mut seen = HashSet::with_capacity(edges.len());
        let mut at = start;

        for &edge in edges {
            let (from, to) = network.endpoints(edge);
            if from != at {
                return Err(Error::InvalidData(format!(
                    "path edge {} does not continue from node {}",
                    edge.index(),
                    network.node(at).id
                )));
            }
            if !seen.insert(edge) {
                return Err(Error::InvalidData(format!(
                    "path uses edge {} twice",
                    edge.index()
                )));
            }
            legs.push(Leg {
                edge,
                from,
                to,
                base_cost: view.base_cost(edge),
                risk_cost: view.risk_cost(edge),
            });
            at = to;
        }

        let mut points = vec![network.coord(start)];
        for leg in &legs {
            let geometry = &network.edge(leg.edge).geometry;
            // The first point repeats the previous leg's last one.
            points.extend(geometry.iter().skip(1).copied());
        }

        Ok(Self {
            kind,
            start,
            base_cost: legs.iter().map(|l| l.base_cost).sum(),
            risk_cost: legs.iter().map(|l| l.risk_cost).sum(),
            legs,
            points,
        })
    }

    pub fn with_kind(mut self, kind: PathKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn total_cost(&self) -> f64 {
        self.base_cost + self.risk_cost
    }

    /// Crime score shown next to the path.
    pub fn score(&self) -> f64 {
        self.risk_cost
    }

    pub fn len(&self) -> usize {
        self.legs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }

    pub fn end(&self) -> NodeIndex {
        self.legs.last().map_or(self.start, |l| l.to)
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.legs.iter().map(|l| l.edge)
    }

    /// Shared edges divided by the edge count of the shorter path; 1 when
    /// either is empty.
    pub fn overlap(&self, other: &Path) -> f64 {
        let shorter = self.len().min(other.len());
        if shorter == 0 {
            return 1.0;
        }
        let mine: HashSet<EdgeIndex> = self.edges().collect();
        let shared = other.edges().filter(|e| mine.contains(e)).count();
        shared as f64 / shorter as f64
    }

    pub fn same_edges(&self, other: &Path) -> bool {
        self.edges().eq(other.edges())
    }

    pub fn edge_records(&self, network: &RoadNetwork) -> Vec<EdgeRecord> {
        self.legs
            .iter()
            .map(|leg| {
                let from = network.coord(leg.from);
                let to = network.coord(leg.to);
                EdgeRecord {
                    from_lat: from.lat,
                    from_lng: from.lng,
                    to_lat: to.lat,
                    to_lng: to.lng,
                    weight: leg.risk_cost,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::RiskConfig;
    use crate::crime::CrimeSnapshot;
    use crate::graph::EdgeSpec;
    use crate::model::TravelMode;
    use crate::safety::RiskWeighting;
    use crate::view::WeightedGraphView;

    fn line() -> RoadNetwork {
        let mut builder = RoadNetwork::builder();
        builder.add_node(1, Coordinate::new(0.0, 0.0));
        builder.add_node(2, Coordinate::new(0.0, 0.001));
        builder.add_node(3, Coordinate::new(0.0, 0.002));
        builder
            .add_edge(
                1,
                2,
                EdgeSpec::default()
                    .cost(1.0)
                    .via(vec![Coordinate::new(0.0001, 0.0005)]),
            )
            .unwrap();
        builder.add_edge(2, 3, EdgeSpec::default().cost(2.0)).unwrap();
        builder.build()
    }

    #[test]
    fn test_from_edges_flattens_geometry() {
        let network = line();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);
        let edges: Vec<EdgeIndex> = network.graph.edge_indices().collect();
        let start = network.node_by_id(1).unwrap();

        let path = Path::from_edges(&view, &edges, PathKind::Primary, start).unwrap();
        assert_eq!(path.points.len(), 4);
        assert_eq!(path.base_cost, 3.0);
        assert_eq!(path.risk_cost, 0.0);
        assert_eq!(path.end(), network.node_by_id(3).unwrap());
        assert_eq!(path.legs[0].to, path.legs[1].from);

        let records = path.edge_records(&network);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].to_lng, 0.002);
        let json = serde_json::to_value(records[0]).unwrap();
        assert!(json.get("fromLat").is_some());
    }

    #[test]
    fn test_rejects_broken_chains() {
        let network = line();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);
        let edges: Vec<EdgeIndex> = network.graph.edge_indices().collect();

        let wrong_start = network.node_by_id(2).unwrap();
        assert!(Path::from_edges(&view, &edges, PathKind::Debug, wrong_start).is_err());
        let start = network.node_by_id(1).unwrap();
        let repeated = [edges[0], edges[0]];
        assert!(Path::from_edges(&view, &repeated, PathKind::Debug, start).is_err());
    }

    #[test]
    fn test_overlap() {
        let network = line();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);
        let edges: Vec<EdgeIndex> = network.graph.edge_indices().collect();
        let start = network.node_by_id(1).unwrap();

        let full = Path::from_edges(&view, &edges, PathKind::Primary, start).unwrap();
        let half = Path::from_edges(&view, &edges[..1], PathKind::Candidate, start).unwrap();
        let empty = Path::from_edges(&view, &[], PathKind::Candidate, start).unwrap();
        assert_eq!(full.overlap(&half), 1.0);
        assert_eq!(half.overlap(&full), 1.0);
        assert_eq!(full.overlap(&empty), 1.0);
        assert_eq!(empty.points, [Coordinate::new(0.0, 0.0)]);
        assert!(full.same_edges(&full.clone().with_kind(PathKind::Debug)));
    }
}
