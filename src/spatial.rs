//! Spatial lookups over the road network and the crime snapshot.
//!
//! The network index is an R-tree over node positions and edge segments in a
//! metric projection around the network centre. It is only used to shortlist
//! candidates; every returned distance is recomputed with the exact helpers
//! in [`crate::geometry`]. Crime reports are bucketed into H3 cells.

use std::collections::{BTreeSet, HashMap};

use h3o::{CellIndex, LatLng, Resolution};
use itertools::Itertools;
use petgraph::graph::{EdgeIndex, NodeIndex};
use rstar::RTree;
use rstar::primitives::{GeomWithData, Line};

use crate::error::Error;
use crate::geometry::{LocalProjection, haversine_m, polyline_distance_m};
use crate::graph::RoadNetwork;
use crate::model::{Coordinate, CrimeReport, TravelMode};

/// Slack applied to projected distances before the exact check. The
/// equirectangular projection drifts by a few percent at the edges of a
/// country-sized network.
const PROJECTION_SLACK: f64 = 1.25;

type IndexedNode = GeomWithData<[f64; 2], NodeIndex>;
type IndexedSegment = GeomWithData<Line<[f64; 2]>, EdgeIndex>;

/// A request endpoint attached to the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snap {
    pub node: NodeIndex,
    pub distance_m: f64,
}

pub struct NetworkIndex {
    projection: LocalProjection,
    nodes: RTree<IndexedNode>,
    segments: RTree<IndexedSegment>,
}

impl NetworkIndex {
    pub fn build(network: &RoadNetwork) -> Self {
        let origin = network
            .bounds()
            .map_or(Coordinate::new(0.0, 0.0), |b| b.center());
        let projection = LocalProjection::new(origin);

        let nodes = network
            .graph
            .node_indices()
            .map(|n| GeomWithData::new(projection.project(network.coord(n)), n))
            .collect();

        let segments = network
            .graph
            .edge_indices()
            .flat_map(|e| {
                network
                    .edge(e)
                    .geometry
                    .iter()
                    .tuple_windows()
                    .map(move |(a, b)| (e, *a, *b))
            })
            .map(|(e, a, b)| {
                GeomWithData::new(Line::new(projection.project(a), projection.project(b)), e)
            })
            .collect();

        Self {
            projection,
            nodes: RTree::bulk_load(nodes),
            segments: RTree::bulk_load(segments),
        }
    }

    /// Nearest node that has at least one edge usable under `mode`.
    ///
    /// # Errors
    ///
    /// [`Error::NoNetworkNearby`] when no such node lies within `max_distance_m`.
    pub fn nearest_node(
        &self,
        network: &RoadNetwork,
        coord: Coordinate,
        mode: TravelMode,
        max_distance_m: f64,
    ) -> Result<Snap, Error> {
        let query = self.projection.project(coord);
        let cutoff = max_distance_m * PROJECTION_SLACK;
        let mut best: Option<Snap> = None;

        for (item, distance_2) in self.nodes.nearest_neighbor_iter_with_distance_2(&query) {
            let projected = distance_2.sqrt();
            if projected > cutoff {
                break;
            }
            if let Some(found) = best {
                // Projected order is approximate, keep scanning only while a
                // closer node is still plausible.
                if projected > found.distance_m * PROJECTION_SLACK {
                    break;
                }
            }
            let node = item.data;
            if !network.is_usable(node, mode) {
                continue;
            }
            let distance_m = haversine_m(coord, network.coord(node));
            if distance_m <= max_distance_m
                && best.is_none_or(|b| {
                    distance_m < b.distance_m || (distance_m == b.distance_m && node < b.node)
                })
            {
                best = Some(Snap { node, distance_m });
            }
        }

        best.ok_or(Error::NoNetworkNearby {
            lat: coord.lat,
            lng: coord.lng,
            max_distance_m,
        })
    }

    /// Every edge whose polyline passes within `radius_m` of `coord`, with the
    /// exact distance, ordered by edge index.
    pub fn edges_within(
        &self,
        network: &RoadNetwork,
        coord: Coordinate,
        radius_m: f64,
    ) -> Vec<(EdgeIndex, f64)> {
        let query = self.projection.project(coord);
        let reach = radius_m * PROJECTION_SLACK;
        let candidates: BTreeSet<EdgeIndex> = self
            .segments
            .locate_within_distance(query, reach * reach)
            .map(|segment| segment.data)
            .collect();

        candidates
            .into_iter()
            .filter_map(|e| {
                let (distance, _) = polyline_distance_m(coord, &network.edge(e).geometry)?;
                (distance <= radius_m).then_some((e, distance))
            })
            .collect()
    }
}

/// Crime reports bucketed by H3 cell.
pub struct CrimeIndex {
    resolution: Resolution,
    cells: HashMap<CellIndex, Vec<usize>>,
}

impl CrimeIndex {
    /// # Errors
    ///
    /// [`Error::InvalidCoordinates`] when a report location is not a valid
    /// latitude/longitude.
    pub fn build(reports: &[CrimeReport], resolution: Resolution) -> Result<Self, Error> {
        let mut cells: HashMap<CellIndex, Vec<usize>> = HashMap::new();
        for (i, report) in reports.iter().enumerate() {
            let cell = to_cell(report.location, resolution).ok_or_else(|| {
                Error::InvalidCoordinates(format!(
                    "crime report {} has invalid location ({}, {})",
                    report.id, report.location.lat, report.location.lng
                ))
            })?;
            cells.entry(cell).or_default().push(i);
        }
        Ok(Self { resolution, cells })
    }

    pub fn empty(resolution: Resolution) -> Self {
        Self {
            resolution,
            cells: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Indices of reports in the cells covering a disk of `radius_m`, sorted
    /// and de-duplicated. Callers must still filter by exact distance.
    pub fn candidates_within(&self, center: Coordinate, radius_m: f64) -> Vec<usize> {
        if self.cells.is_empty() {
            return Vec::new();
        }
        let Some(origin) = to_cell(center, self.resolution) else {
            return Vec::new();
        };
        // Neighbouring centres are sqrt(3) edge lengths apart, so one ring per
        // edge length over-covers the disk.
        let rings = (radius_m / self.resolution.edge_length_m()).ceil() as u32 + 1;
        let mut found = BTreeSet::new();
        for cell in origin.grid_disk::<Vec<_>>(rings) {
            if let Some(indices) = self.cells.get(&cell) {
                found.extend(indices.iter().copied());
            }
        }
        found.into_iter().collect()
    }
}

fn to_cell(coord: Coordinate, resolution: Resolution) -> Option<CellIndex> {
    if !coord.is_valid() {
        return None;
    }
    LatLng::new(coord.lat, coord.lng)
        .ok()
        .map(|ll| ll.to_cell(resolution))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::geometry::METERS_PER_DEG_LAT;
    use crate::graph::EdgeSpec;
    use crate::model::{CrimeType, ModeSet};

    fn grid_network() -> RoadNetwork {
        // 3x3 grid, ~111 m spacing near the equator; the centre row is walk-only.
        let mut builder = RoadNetwork::builder();
        for row in 0..3 {
            for col in 0..3 {
                let id = row * 3 + col;
                builder.add_node(id, Coordinate::new(row as f64 * 0.001, col as f64 * 0.001));
            }
        }
        for row in 0..3 {
            let modes = if row == 1 { ModeSet::WALK } else { ModeSet::BOTH };
            for col in 0..2 {
                let a = row * 3 + col;
                builder.add_edge(a, a + 1, EdgeSpec::new(modes)).unwrap();
                builder.add_edge(a + 1, a, EdgeSpec::new(modes)).unwrap();
            }
        }
        builder.build()
    }

    fn report(id: &str, lat: f64, lng: f64) -> CrimeReport {
        CrimeReport {
            id: id.to_string(),
            crime_type: CrimeType::Theft,
            location: Coordinate::new(lat, lng),
            time: Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap(),
            severity: None,
        }
    }

    #[test]
    fn test_nearest_node() {
        let network = grid_network();
        let index = NetworkIndex::build(&network);
        let snap = index
            .nearest_node(&network, Coordinate::new(0.0011, 0.0009), TravelMode::Walk, 100.0)
            .unwrap();
        assert_eq!(network.node(snap.node).id, 4);
        assert!(snap.distance_m < 20.0);
    }

    #[test]
    fn test_nearest_node_respects_mode() {
        let network = grid_network();
        let index = NetworkIndex::build(&network);
        let snap = index
            .nearest_node(&network, Coordinate::new(0.0011, 0.0009), TravelMode::Drive, 500.0)
            .unwrap();
        let id = network.node(snap.node).id;
        assert!(id != 4 && (id < 3 || id > 5), "snapped to walk-only node {id}");
    }

    #[test]
    fn test_nearest_node_too_far() {
        let network = grid_network();
        let index = NetworkIndex::build(&network);
        let err = index
            .nearest_node(&network, Coordinate::new(0.05, 0.05), TravelMode::Walk, 500.0)
            .unwrap_err();
        assert!(matches!(err, Error::NoNetworkNearby { .. }));
    }

    #[test]
    fn test_edges_within() {
        let network = grid_network();
        let index = NetworkIndex::build(&network);
        // 20 m north of the bottom row, between node 0 and node 1
        let point = Coordinate::new(20.0 / METERS_PER_DEG_LAT, 0.0005);
        let hits = index.edges_within(&network, point, 25.0);
        assert_eq!(hits.len(), 2, "both directions of edge 0-1");
        assert!(hits.iter().all(|(_, d)| (*d - 20.0).abs() < 0.01));
        assert!(index.edges_within(&network, point, 15.0).is_empty());
    }

    #[test]
    fn test_crime_candidates() {
        let reports = vec![
            report("near", 23.7500, 90.3900),
            report("also-near", 23.7504, 90.3900),
            report("far", 23.8000, 90.4500),
        ];
        let index = CrimeIndex::build(&reports, Resolution::Nine).unwrap();
        assert_eq!(index.len(), 3);

        let found = index.candidates_within(Coordinate::new(23.7502, 90.3900), 60.0);
        assert!(found.contains(&0));
        assert!(found.contains(&1));
        assert!(!found.contains(&2));
    }

    #[test]
    fn test_crime_index_rejects_invalid_location() {
        let reports = vec![report("bad", 123.0, 90.0)];
        assert!(matches!(
            CrimeIndex::build(&reports, Resolution::Nine),
            Err(Error::InvalidCoordinates(_))
        ));
    }
}
