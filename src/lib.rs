//! Safest-route engine: A* over a road network whose edge costs are raised by
//! nearby crime reports, with diverse alternatives and diagnostics.

pub mod alternatives;
pub mod api;
pub mod config;
pub mod crime;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod model;
pub mod path;
pub mod region;
pub mod retry;
pub mod safety;
pub mod search;
pub mod spatial;
pub mod store;
pub mod view;

pub use config::Config;
pub use engine::RouteEngine;
pub use error::Error;
pub use graph::RoadNetwork;
pub use model::{Coordinate, CrimeReport, CrimeType, RouteRequest, TravelMode};
pub use path::{Path, PathKind};
