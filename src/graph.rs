use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use lazy_static::lazy_static;
use osmpbf::{Element, ElementReader};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::Error;
use crate::geometry::{BoundingBox, haversine_m, polyline_length_m};
use crate::model::{Coordinate, GeoNode, ModeSet, RoadEdge, TravelMode};

pub type NetworkGraph = DiGraph<GeoNode, RoadEdge>;

lazy_static! {
    static ref WALKABLE_HIGHWAYS: HashSet<&'static str> = [
        "footway",
        "path",
        "steps",
        "pedestrian",
        "living_street",
        "residential",
        "tertiary",
        "tertiary_link",
        "service",
        "unclassified",
        "track",
    ]
    .into_iter()
    .collect();
    static ref DRIVABLE_HIGHWAYS: HashSet<&'static str> = [
        "motorway",
        "motorway_link",
        "trunk",
        "trunk_link",
        "primary",
        "primary_link",
        "secondary",
        "secondary_link",
        "tertiary",
        "tertiary_link",
        "unclassified",
        "residential",
        "living_street",
        "service",
    ]
    .into_iter()
    .collect();
}

/// On-disk formats the network provider hands us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkFormat {
    /// Decide from the file extension
    #[default]
    Auto,
    Pbf,
    Json,
}

/// Immutable road network shared by every request.
pub struct RoadNetwork {
    pub graph: NetworkGraph,
    node_ids: HashMap<i64, NodeIndex>,
    heuristic_scale: f64,
    bounds: Option<BoundingBox>,
}

impl RoadNetwork {
    pub fn builder() -> RoadNetworkBuilder {
        RoadNetworkBuilder::default()
    }

    pub fn load(path: &Path, format: NetworkFormat) -> Result<Self, Error> {
        let format = match format {
            NetworkFormat::Auto => {
                let name = path.to_string_lossy().to_ascii_lowercase();
                if name.ends_with(".pbf") {
                    NetworkFormat::Pbf
                } else {
                    NetworkFormat::Json
                }
            }
            other => other,
        };
        match format {
            NetworkFormat::Pbf => Self::from_pbf(path),
            _ => Self::from_json_path(path),
        }
    }

    pub fn from_pbf(path: &Path) -> Result<Self, Error> {
        info!("Parsing OSM PBF: {}", path.display());

        let mut builder = RoadNetworkBuilder::default();
        let mut temp_nodes = HashMap::new();

        // PASS 1: Nodes
        let reader = ElementReader::from_path(path).map_err(pbf_error)?;
        reader
            .for_each(|element| match element {
                Element::Node(node) => {
                    temp_nodes.insert(node.id(), Coordinate::new(node.lat(), node.lon()));
                }
                Element::DenseNode(node) => {
                    temp_nodes.insert(node.id(), Coordinate::new(node.lat(), node.lon()));
                }
                _ => {}
            })
            .map_err(pbf_error)?;

        info!("Loaded {} nodes. Building edges...", temp_nodes.len());

        // PASS 2: Ways
        let mut skipped = 0usize;
        let reader = ElementReader::from_path(path).map_err(pbf_error)?;
        reader
            .for_each(|element| {
                let Element::Way(way) = element else {
                    return;
                };
                let tags: HashMap<&str, &str> = way.tags().collect();
                let access = classify_way(&tags);
                if access.forward.is_empty() && access.backward.is_empty() {
                    return;
                }

                let refs: Vec<i64> = way.refs().collect();
                for window in refs.windows(2) {
                    let (id_a, id_b) = (window[0], window[1]);
                    let (Some(&a), Some(&b)) = (temp_nodes.get(&id_a), temp_nodes.get(&id_b)) else {
                        skipped += 1;
                        continue;
                    };
                    builder.add_node(id_a, a);
                    builder.add_node(id_b, b);

                    for (from, to, modes) in [(id_a, id_b, access.forward), (id_b, id_a, access.backward)] {
                        if modes.is_empty() {
                            continue;
                        }
                        if let Err(e) = builder.add_edge(from, to, EdgeSpec::new(modes)) {
                            warn!("Skipping way {} segment: {e}", way.id());
                            skipped += 1;
                        }
                    }
                }
            })
            .map_err(pbf_error)?;

        if skipped > 0 {
            warn!("Skipped {skipped} way segments with missing or invalid nodes");
        }
        let network = builder.build();
        info!(
            "Graph built: {} nodes, {} edges",
            network.node_count(),
            network.edge_count()
        );
        Ok(network)
    }

    /// Reads the JSON graph format: `{ nodes: [{id, lat, lng}], edges: [{from, to, geometry, ...}] }`.
    pub fn from_json_path(path: &Path) -> Result<Self, Error> {
        info!("Loading JSON road network: {}", path.display());
        let reader = BufReader::new(File::open(path)?);
        let raw: RawNetwork = serde_json::from_reader(reader)
            .map_err(|e| Error::InvalidData(format!("{}: {e}", path.display())))?;
        Self::from_raw(raw)
    }

    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        let raw: RawNetwork =
            serde_json::from_str(json).map_err(|e| Error::InvalidData(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawNetwork) -> Result<Self, Error> {
        let mut builder = RoadNetworkBuilder::default();
        for node in &raw.nodes {
            let coord = Coordinate::new(node.lat, node.lng);
            if !coord.is_valid() {
                return Err(Error::InvalidData(format!(
                    "node {} has invalid coordinates",
                    node.id
                )));
            }
            builder.add_node(node.id, coord);
        }

        let mut skipped = 0usize;
        for edge in raw.edges {
            if !builder.contains(edge.from) || !builder.contains(edge.to) {
                skipped += 1;
                continue;
            }
            let modes = edge
                .modes
                .as_deref()
                .map_or(ModeSet::BOTH, |m| m.iter().copied().collect());
            let via: Vec<Coordinate> = edge
                .geometry
                .iter()
                .map(|[lat, lng]| Coordinate::new(*lat, *lng))
                .collect();
            let cost = edge.base_cost.or(edge.length);

            let mut spec = EdgeSpec::new(modes).via(via.clone());
            if let Some(cost) = cost {
                spec = spec.cost(cost);
            }
            builder.add_edge(edge.from, edge.to, spec)?;

            if edge.bidirectional {
                let mut reversed = via;
                reversed.reverse();
                let mut spec = EdgeSpec::new(modes).via(reversed);
                if let Some(cost) = cost {
                    spec = spec.cost(cost);
                }
                builder.add_edge(edge.to, edge.from, spec)?;
            }
        }
        if skipped > 0 {
            warn!("Skipped {skipped} edges referencing unknown nodes");
        }

        let network = builder.build();
        info!(
            "Graph built: {} nodes, {} edges",
            network.node_count(),
            network.edge_count()
        );
        Ok(network)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, node: NodeIndex) -> &GeoNode {
        &self.graph[node]
    }

    pub fn coord(&self, node: NodeIndex) -> Coordinate {
        self.graph[node].coord
    }

    pub fn edge(&self, edge: EdgeIndex) -> &RoadEdge {
        &self.graph[edge]
    }

    pub fn endpoints(&self, edge: EdgeIndex) -> (NodeIndex, NodeIndex) {
        let raw = &self.graph.raw_edges()[edge.index()];
        (raw.source(), raw.target())
    }

    pub fn node_by_id(&self, id: i64) -> Option<NodeIndex> {
        self.node_ids.get(&id).copied()
    }

    /// Ratio applied to great-circle distance so that it never exceeds base cost.
    pub fn heuristic_scale(&self) -> f64 {
        self.heuristic_scale
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.bounds
    }

    /// Whether any edge touching `node` may be used under `mode`.
    pub fn is_usable(&self, node: NodeIndex, mode: TravelMode) -> bool {
        [Direction::Outgoing, Direction::Incoming].into_iter().any(|dir| {
            self.graph
                .edges_directed(node, dir)
                .any(|e| e.weight().modes.allows(mode))
        })
    }
}

fn pbf_error(e: osmpbf::Error) -> Error {
    Error::UpstreamDataUnavailable(format!("OSM PBF: {e}"))
}

/// Modes allowed along and against the way direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WayAccess {
    forward: ModeSet,
    backward: ModeSet,
}

fn classify_way(tags: &HashMap<&str, &str>) -> WayAccess {
    let highway = tags.get("highway").copied().unwrap_or("");
    let foot = tags.get("foot").copied().unwrap_or("");
    let sidewalk = tags.get("sidewalk").copied().unwrap_or("");
    let access = tags.get("access").copied().unwrap_or("");
    let motor = tags.get("motor_vehicle").copied().unwrap_or("");
    let oneway = tags.get("oneway").copied().unwrap_or("");

    let is_motor_road = matches!(highway, "motorway" | "trunk" | "primary" | "secondary");
    let foot_allowed = matches!(foot, "yes" | "designated" | "permissive");
    let has_sidewalk = matches!(sidewalk, "both" | "left" | "right" | "yes" | "separate");
    let closed = matches!(access, "no" | "private");

    let walk = !closed
        && foot != "no"
        && (WALKABLE_HIGHWAYS.contains(highway) || (is_motor_road && (foot_allowed || has_sidewalk)));
    let drive = !closed && motor != "no" && DRIVABLE_HIGHWAYS.contains(highway);

    let mut forward = ModeSet::NONE;
    let mut backward = ModeSet::NONE;
    if walk {
        forward = forward.with(TravelMode::Walk);
        backward = backward.with(TravelMode::Walk);
    }
    if drive {
        match oneway {
            "yes" | "true" | "1" => forward = forward.with(TravelMode::Drive),
            "-1" | "reverse" => backward = backward.with(TravelMode::Drive),
            _ => {
                forward = forward.with(TravelMode::Drive);
                backward = backward.with(TravelMode::Drive);
            }
        }
    }
    WayAccess { forward, backward }
}

#[derive(Deserialize)]
struct RawNetwork {
    nodes: Vec<RawNode>,
    edges: Vec<RawEdge>,
}

#[derive(Deserialize)]
struct RawNode {
    id: i64,
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEdge {
    from: i64,
    to: i64,
    /// `[lat, lng]` pairs
    #[serde(default)]
    geometry: Vec<[f64; 2]>,
    length: Option<f64>,
    base_cost: Option<f64>,
    modes: Option<Vec<TravelMode>>,
    #[serde(default)]
    bidirectional: bool,
}

/// Describes one directed edge to add to a [`RoadNetworkBuilder`].
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    via: Vec<Coordinate>,
    base_cost: Option<f64>,
    modes: ModeSet,
}

impl EdgeSpec {
    pub fn new(modes: ModeSet) -> Self {
        Self {
            via: Vec::new(),
            base_cost: None,
            modes,
        }
    }

    /// Explicit base cost; defaults to the polyline length in metres.
    pub fn cost(mut self, base_cost: f64) -> Self {
        self.base_cost = Some(base_cost);
        self
    }

    /// Intermediate shape points between the two nodes.
    pub fn via(mut self, points: Vec<Coordinate>) -> Self {
        self.via = points;
        self
    }
}

impl Default for EdgeSpec {
    fn default() -> Self {
        Self::new(ModeSet::BOTH)
    }
}

#[derive(Default)]
pub struct RoadNetworkBuilder {
    graph: NetworkGraph,
    node_ids: HashMap<i64, NodeIndex>,
}

impl RoadNetworkBuilder {
    /// Adds a node, or returns the existing index when the id is known.
    pub fn add_node(&mut self, id: i64, coord: Coordinate) -> NodeIndex {
        *self
            .node_ids
            .entry(id)
            .or_insert_with(|| self.graph.add_node(GeoNode { id, coord }))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.node_ids.contains_key(&id)
    }

    pub fn add_edge(&mut self, from: i64, to: i64, spec: EdgeSpec) -> Result<EdgeIndex, Error> {
        let (Some(&a), Some(&b)) = (self.node_ids.get(&from), self.node_ids.get(&to)) else {
            return Err(Error::InvalidData(format!(
                "edge {from} -> {to} references an unknown node"
            )));
        };
        if spec.modes.is_empty() {
            return Err(Error::InvalidData(format!(
                "edge {from} -> {to} is not usable by any travel mode"
            )));
        }

        let mut geometry = Vec::with_capacity(spec.via.len() + 2);
        geometry.push(self.graph[a].coord);
        geometry.extend(spec.via);
        geometry.push(self.graph[b].coord);
        geometry.dedup();
        if geometry.iter().any(|c| !c.is_valid()) {
            return Err(Error::InvalidData(format!(
                "edge {from} -> {to} has invalid geometry"
            )));
        }

        let length_m = polyline_length_m(&geometry);
        let base_cost = spec.base_cost.unwrap_or(length_m);
        if !base_cost.is_finite() || base_cost < 0.0 {
            return Err(Error::InvalidData(format!(
                "edge {from} -> {to} has invalid base cost {base_cost}"
            )));
        }

        Ok(self.graph.add_edge(
            a,
            b,
            RoadEdge {
                geometry,
                base_cost,
                length_m,
                modes: spec.modes,
            },
        ))
    }

    pub fn build(self) -> RoadNetwork {
        let heuristic_scale = compute_heuristic_scale(&self.graph);
        let bounds = BoundingBox::covering(self.graph.node_weights().map(|n| &n.coord));
        RoadNetwork {
            graph: self.graph,
            node_ids: self.node_ids,
            heuristic_scale,
            bounds,
        }
    }
}

/// Largest factor `s` with `s * chord(e) <= base_cost(e)` for every edge.
///
/// Since any path is at least as long as the great-circle distance between
/// its ends, `s * haversine(n, goal)` never exceeds the remaining base cost.
fn compute_heuristic_scale(graph: &NetworkGraph) -> f64 {
    let scale = graph
        .edge_references()
        .filter_map(|e| {
            let chord = haversine_m(graph[e.source()].coord, graph[e.target()].coord);
            (chord > 0.0).then(|| e.weight().base_cost / chord)
        })
        .fold(f64::INFINITY, f64::min);
    if scale.is_finite() { scale } else { 0.0 }
}
