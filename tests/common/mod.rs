#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use rand::rngs::StdRng;
use saferoute::config::{Config, Falloff, RiskConfig};
use saferoute::crime::{CrimeSource, StaticCrimeSource};
use saferoute::graph::EdgeSpec;
use saferoute::model::ModeSet;
use saferoute::store::NetworkStore;
use saferoute::{Coordinate, CrimeReport, CrimeType, RoadNetwork, RouteEngine};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

pub fn report(id: &str, crime_type: CrimeType, location: Coordinate) -> CrimeReport {
    CrimeReport {
        id: id.to_string(),
        crime_type,
        location,
        time: now() - chrono::Duration::hours(2),
        severity: None,
    }
}

/// Constant falloff and no recency decay, so a report's penalty is
/// `multiplier * weight` anywhere inside the radius.
pub fn flat_risk(radius_m: f64, multiplier: f64) -> RiskConfig {
    RiskConfig {
        radius_m,
        falloff: Falloff::Constant,
        multiplier,
        recency_decay: false,
        ..RiskConfig::default()
    }
}

pub fn engine_with_source(
    network: RoadNetwork,
    source: Box<dyn CrimeSource>,
    config: Config,
) -> RouteEngine {
    let store = Arc::new(NetworkStore::new(network, config.region.clone()));
    RouteEngine::new(config, store, source)
        .unwrap()
        .with_fixed_time(now())
}

pub fn engine(network: RoadNetwork, reports: Vec<CrimeReport>, config: Config) -> RouteEngine {
    engine_with_source(network, Box::new(StaticCrimeSource::new(reports)), config)
}

/// A-B-C along the equator plus a direct A->C edge that bows 220 m north.
pub fn abc_network() -> RoadNetwork {
    let mut builder = RoadNetwork::builder();
    builder.add_node(1, Coordinate::new(0.0, 0.0));
    builder.add_node(2, Coordinate::new(0.0, 0.001));
    builder.add_node(3, Coordinate::new(0.0, 0.002));
    builder.add_edge(1, 2, EdgeSpec::default().cost(1.0)).unwrap();
    builder.add_edge(2, 3, EdgeSpec::default().cost(1.0)).unwrap();
    builder
        .add_edge(
            1,
            3,
            EdgeSpec::default()
                .cost(3.0)
                .via(vec![Coordinate::new(0.002, 0.001)]),
        )
        .unwrap();
    builder.build()
}

/// `size` x `size` grid with ~111 m spacing, two-way edges usable by both modes.
pub fn grid(size: i64) -> RoadNetwork {
    let mut builder = RoadNetwork::builder();
    let id = |row: i64, col: i64| row * size + col;
    for row in 0..size {
        for col in 0..size {
            builder.add_node(
                id(row, col),
                Coordinate::new(row as f64 * 0.001, col as f64 * 0.001),
            );
        }
    }
    for row in 0..size {
        for col in 0..size {
            if col + 1 < size {
                builder.add_edge(id(row, col), id(row, col + 1), EdgeSpec::default()).unwrap();
                builder.add_edge(id(row, col + 1), id(row, col), EdgeSpec::default()).unwrap();
            }
            if row + 1 < size {
                builder.add_edge(id(row, col), id(row + 1, col), EdgeSpec::default()).unwrap();
                builder.add_edge(id(row + 1, col), id(row, col), EdgeSpec::default()).unwrap();
            }
        }
    }
    builder.build()
}

/// Random connected network: a two-way chain through every node plus random
/// one-way shortcuts, with base costs from half to three times the length.
pub fn random_network(rng: &mut StdRng, nodes: i64, extra_edges: usize) -> RoadNetwork {
    let mut builder = RoadNetwork::builder();
    let coords: Vec<Coordinate> = (0..nodes)
        .map(|_| Coordinate::new(rng.gen_range(0.0..0.01), rng.gen_range(0.0..0.01)))
        .collect();
    for (id, coord) in coords.iter().enumerate() {
        builder.add_node(id as i64, *coord);
    }

    let mut add = |rng: &mut StdRng, a: i64, b: i64| {
        let length = saferoute::geometry::haversine_m(coords[a as usize], coords[b as usize]);
        let cost = length * rng.gen_range(0.5..3.0);
        builder
            .add_edge(a, b, EdgeSpec::new(ModeSet::BOTH).cost(cost))
            .unwrap();
    };
    for id in 1..nodes {
        add(rng, id - 1, id);
        add(rng, id, id - 1);
    }
    for _ in 0..extra_edges {
        let a = rng.gen_range(0..nodes);
        let b = rng.gen_range(0..nodes);
        if a != b {
            add(rng, a, b);
        }
    }
    builder.build()
}
