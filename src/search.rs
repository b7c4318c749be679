//! A* over a [`CostModel`].

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use petgraph::graph::{EdgeIndex, NodeIndex};
use tracing::debug;

use crate::error::Error;
use crate::geometry::haversine_m;
use crate::graph::RoadNetwork;
use crate::model::Coordinate;
use crate::view::CostModel;

/// How often the deadline is polled, in expansions.
const DEADLINE_CHECK_INTERVAL: usize = 256;

/// Limits shared by every search of one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchBudget {
    deadline: Option<Instant>,
    max_expansions: Option<usize>,
}

impl SearchBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            max_expansions: None,
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            max_expansions: None,
        }
    }

    /// Caps the number of node expansions of each search.
    pub fn max_expansions(mut self, max: Option<usize>) -> Self {
        self.max_expansions = max;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Edges from start to goal
    pub edges: Vec<EdgeIndex>,
    /// Cost under the view that was searched
    pub cost: f64,
    pub expanded: usize,
}

/// Straight-line lower bound on the remaining base cost from `node` to `goal`.
pub fn heuristic(network: &RoadNetwork, node: NodeIndex, goal: NodeIndex) -> f64 {
    heuristic_to(network, node, network.coord(goal))
}

fn heuristic_to(network: &RoadNetwork, node: NodeIndex, goal: Coordinate) -> f64 {
    network.heuristic_scale() * haversine_m(network.coord(node), goal)
}

#[derive(Debug, Clone, Copy)]
struct State {
    f: f64,
    g: f64,
    hops: usize,
    seq: u64,
    node: NodeIndex,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    // Reversed for a min-heap: lowest f first, then fewer edges, then the
    // entry pushed first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy)]
struct Label {
    g: f64,
    hops: usize,
    via: Option<(EdgeIndex, NodeIndex)>,
}

/// Minimum-cost path from `start` to `goal` under `view`.
///
/// # Errors
///
/// [`Error::NoPathFound`] when the frontier empties, [`Error::Timeout`] when
/// the budget runs out first. A partial path is never returned.
pub fn astar<V: CostModel>(
    view: &V,
    start: NodeIndex,
    goal: NodeIndex,
    budget: &SearchBudget,
) -> Result<SearchResult, Error> {
    if start == goal {
        return Ok(SearchResult {
            edges: Vec::new(),
            cost: 0.0,
            expanded: 0,
        });
    }

    let network = view.network();
    let goal_coord = network.coord(goal);
    let mut labels: HashMap<NodeIndex, Label> = HashMap::new();
    let mut closed: HashSet<NodeIndex> = HashSet::new();
    let mut heap = BinaryHeap::new();
    let mut seq = 0;
    let mut expanded = 0;

    labels.insert(
        start,
        Label {
            g: 0.0,
            hops: 0,
            via: None,
        },
    );
    heap.push(State {
        f: heuristic_to(network, start, goal_coord),
        g: 0.0,
        hops: 0,
        seq,
        node: start,
    });

    while let Some(State { g, hops, node, .. }) = heap.pop() {
        if node == goal {
            let edges = trace_back(&labels, goal);
            debug!(
                "A* reached goal after {expanded} expansions, {} edges, cost {g:.3}",
                edges.len()
            );
            return Ok(SearchResult {
                edges,
                cost: g,
                expanded,
            });
        }
        // Stale entry superseded by a better label.
        if labels.get(&node).is_some_and(|l| l.g < g || (l.g == g && l.hops < hops)) {
            continue;
        }
        if !closed.insert(node) {
            continue;
        }

        expanded += 1;
        if budget.max_expansions.is_some_and(|max| expanded > max)
            || (expanded % DEADLINE_CHECK_INTERVAL == 0 && budget.is_expired())
        {
            debug!("A* budget exhausted after {expanded} expansions");
            return Err(Error::Timeout { expanded });
        }

        for (edge, next) in view.neighbors(node) {
            if closed.contains(&next) {
                continue;
            }
            let next_g = g + view.cost(edge);
            let next_hops = hops + 1;
            let improved = match labels.entry(next) {
                Entry::Vacant(slot) => {
                    slot.insert(Label {
                        g: next_g,
                        hops: next_hops,
                        via: Some((edge, node)),
                    });
                    true
                }
                Entry::Occupied(mut slot) => {
                    let label = slot.get_mut();
                    if next_g < label.g || (next_g == label.g && next_hops < label.hops) {
                        *label = Label {
                            g: next_g,
                            hops: next_hops,
                            via: Some((edge, node)),
                        };
                        true
                    } else {
                        false
                    }
                }
            };
            if improved {
                seq += 1;
                heap.push(State {
                    f: next_g + heuristic_to(network, next, goal_coord),
                    g: next_g,
                    hops: next_hops,
                    seq,
                    node: next,
                });
            }
        }
    }

    debug!("A* frontier exhausted after {expanded} expansions");
    Err(Error::NoPathFound)
}

fn trace_back(labels: &HashMap<NodeIndex, Label>, goal: NodeIndex) -> Vec<EdgeIndex> {
    let mut edges = Vec::new();
    let mut current = goal;
    while let Some((edge, prev)) = labels.get(&current).and_then(|l| l.via) {
        edges.push(edge);
        current = prev;
    }
    edges.reverse();
    edges
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::RiskConfig;
    use crate::crime::CrimeSnapshot;
    use crate::graph::EdgeSpec;
    use crate::model::{Coordinate, ModeSet, TravelMode};
    use crate::safety::RiskWeighting;
    use crate::view::{PenalizedView, WeightedGraphView};

    /// Square 1-2-4 / 1-3-4 where the upper route is cheaper.
    fn diamond() -> RoadNetwork {
        let mut builder = RoadNetwork::builder();
        builder.add_node(1, Coordinate::new(0.0, 0.0));
        builder.add_node(2, Coordinate::new(0.001, 0.001));
        builder.add_node(3, Coordinate::new(-0.001, 0.001));
        builder.add_node(4, Coordinate::new(0.0, 0.002));
        builder.add_edge(1, 2, EdgeSpec::default().cost(200.0)).unwrap();
        builder.add_edge(2, 4, EdgeSpec::default().cost(200.0)).unwrap();
        builder.add_edge(1, 3, EdgeSpec::default().cost(250.0)).unwrap();
        builder.add_edge(3, 4, EdgeSpec::default().cost(250.0)).unwrap();
        builder.build()
    }

    fn ids(network: &RoadNetwork, edges: &[EdgeIndex]) -> Vec<(i64, i64)> {
        edges
            .iter()
            .map(|e| {
                let (a, b) = network.endpoints(*e);
                (network.node(a).id, network.node(b).id)
            })
            .collect()
    }

    #[test]
    fn test_finds_cheapest_path() {
        let network = diamond();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);
        let start = network.node_by_id(1).unwrap();
        let goal = network.node_by_id(4).unwrap();

        let result = astar(&view, start, goal, &SearchBudget::unlimited()).unwrap();
        assert_eq!(ids(&network, &result.edges), [(1, 2), (2, 4)]);
        assert_eq!(result.cost, 400.0);

        let mut penalized = PenalizedView::new(&view, 10.0);
        penalized.penalize(result.edges.iter().copied());
        let detour = astar(&penalized, start, goal, &SearchBudget::unlimited()).unwrap();
        assert_eq!(ids(&network, &detour.edges), [(1, 3), (3, 4)]);
    }

    #[test]
    fn test_start_equals_goal() {
        let network = diamond();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);
        let node = network.node_by_id(2).unwrap();
        let result = astar(&view, node, node, &SearchBudget::unlimited()).unwrap();
        assert!(result.edges.is_empty());
        assert_eq!(result.cost, 0.0);
    }

    #[test]
    fn test_unreachable_under_mode() {
        let mut builder = RoadNetwork::builder();
        builder.add_node(1, Coordinate::new(0.0, 0.0));
        builder.add_node(2, Coordinate::new(0.0, 0.001));
        builder.add_edge(1, 2, EdgeSpec::new(ModeSet::WALK)).unwrap();
        let network = builder.build();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Drive, &weighting, &crimes);
        let err = astar(
            &view,
            network.node_by_id(1).unwrap(),
            network.node_by_id(2).unwrap(),
            &SearchBudget::unlimited(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoPathFound));
    }

    #[test]
    fn test_equal_cost_prefers_fewer_edges() {
        // 1 -> 4 directly (cost 2) or via 2 and 3 (cost 1 + 0.5 + 0.5)
        let mut builder = RoadNetwork::builder();
        builder.add_node(1, Coordinate::new(0.0, 0.0));
        builder.add_node(2, Coordinate::new(0.0, 0.0001));
        builder.add_node(3, Coordinate::new(0.0, 0.0002));
        builder.add_node(4, Coordinate::new(0.0, 0.0003));
        builder.add_edge(1, 2, EdgeSpec::default().cost(1.0)).unwrap();
        builder.add_edge(2, 3, EdgeSpec::default().cost(0.5)).unwrap();
        builder.add_edge(3, 4, EdgeSpec::default().cost(0.5)).unwrap();
        builder.add_edge(1, 4, EdgeSpec::default().cost(2.0)).unwrap();
        let network = builder.build();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);

        let result = astar(
            &view,
            network.node_by_id(1).unwrap(),
            network.node_by_id(4).unwrap(),
            &SearchBudget::unlimited(),
        )
        .unwrap();
        assert_eq!(ids(&network, &result.edges), [(1, 4)]);
    }

    #[test]
    fn test_budget_exhaustion_is_timeout() {
        let network = diamond();
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = CrimeSnapshot::empty(Utc::now());
        let view = WeightedGraphView::new(&network, TravelMode::Walk, &weighting, &crimes);
        let budget = SearchBudget::unlimited().max_expansions(Some(1));
        let err = astar(
            &view,
            network.node_by_id(1).unwrap(),
            network.node_by_id(4).unwrap(),
            &budget,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { expanded: 2 }));
    }

    #[test]
    fn test_heuristic_never_exceeds_direct_edge() {
        let network = diamond();
        for e in network.graph.edge_indices() {
            let (a, b) = network.endpoints(e);
            assert!(heuristic(&network, a, b) <= network.edge(e).base_cost + 1e-9);
        }
    }
}
