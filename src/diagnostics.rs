//! Instrumented views of a route, for verifying the risk model by hand.

use chrono::{DateTime, Utc};
use petgraph::graph::EdgeIndex;
use serde::Serialize;

use crate::geometry::polyline_distance_m;
use crate::graph::RoadNetwork;
use crate::model::{Coordinate, CrimeReport, CrimeType};
use crate::path::Path;
use crate::safety::{RiskContribution, RiskWeighting};
use crate::spatial::NetworkIndex;
use crate::view::{CostModel, WeightedGraphView};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDiagnostic {
    pub from_id: i64,
    pub to_id: i64,
    pub from: Coordinate,
    pub to: Coordinate,
    pub length_m: f64,
    pub base_cost: f64,
    pub risk_cost: f64,
    pub contributions: Vec<RiskContribution>,
}

/// Per-edge breakdown of `path`, including the reports behind each penalty.
pub fn explain_path(view: &WeightedGraphView<'_>, path: &Path) -> Vec<EdgeDiagnostic> {
    let network = view.network();
    path.legs
        .iter()
        .map(|leg| {
            let edge = network.edge(leg.edge);
            let risk = view.edge_risk(leg.edge);
            EdgeDiagnostic {
                from_id: network.node(leg.from).id,
                to_id: network.node(leg.to).id,
                from: network.coord(leg.from),
                to: network.coord(leg.to),
                length_m: edge.length_m,
                base_cost: leg.base_cost,
                risk_cost: risk.penalty,
                contributions: risk.contributions,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityVerdict {
    pub near: bool,
    pub closest_distance_m: f64,
    /// Position of the closest leg in the path, `None` for an empty path
    pub closest_leg: Option<usize>,
}

/// Whether any part of `path` comes within `threshold_m` of `point`
/// (inclusive). An empty path is tested at its single node.
pub fn passes_near(
    network: &RoadNetwork,
    path: &Path,
    point: Coordinate,
    threshold_m: f64,
) -> ProximityVerdict {
    let closest = path
        .legs
        .iter()
        .enumerate()
        .filter_map(|(i, leg)| {
            polyline_distance_m(point, &network.edge(leg.edge).geometry).map(|(d, _)| (d, i))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0));

    let (closest_distance_m, closest_leg) = match closest {
        Some((d, i)) => (d, Some(i)),
        None => {
            let d = polyline_distance_m(point, &path.points).map_or(f64::INFINITY, |(d, _)| d);
            (d, None)
        }
    };

    ProximityVerdict {
        near: closest_distance_m <= threshold_m,
        closest_distance_m,
        closest_leg,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeImpact {
    pub edge: usize,
    pub from_id: i64,
    pub to_id: i64,
    pub distance_m: f64,
    pub penalty: f64,
}

/// Edges a report of `crime_type` at `point` and time `at` would penalize,
/// with the penalty it alone would add, in edge order.
pub fn crime_impact(
    network: &RoadNetwork,
    index: &NetworkIndex,
    weighting: &RiskWeighting,
    point: Coordinate,
    crime_type: CrimeType,
    at: DateTime<Utc>,
) -> Vec<EdgeImpact> {
    let report = CrimeReport {
        id: "hypothetical".to_string(),
        crime_type,
        location: point,
        time: at,
        severity: None,
    };
    let weight = weighting.multiplier() * weighting.report_weight(&report, at);

    index
        .edges_within(network, point, weighting.radius_m())
        .into_iter()
        .map(|(edge, distance_m): (EdgeIndex, f64)| {
            let (from, to) = network.endpoints(edge);
            EdgeImpact {
                edge: edge.index(),
                from_id: network.node(from).id,
                to_id: network.node(to).id,
                distance_m,
                penalty: weight * weighting.falloff(distance_m),
            }
        })
        .filter(|impact| impact.penalty > 0.0)
        .collect()
}
