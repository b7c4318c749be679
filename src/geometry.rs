//! Distance helpers shared by the index, the risk model and diagnostics.
//!
//! Great-circle distances come from `geo`'s haversine implementation.
//! Point-to-segment distances are measured in an equirectangular projection
//! centred on the query point, which is exact along the meridian and accurate
//! to well under a metre for street-scale segments.

use geo::{EuclideanDistance, HaversineDistance, Line, Point};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::Coordinate;

/// Mean earth radius used by `geo`'s haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Metres per degree of latitude on the mean-radius sphere.
pub const METERS_PER_DEG_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

pub fn haversine_m(a: Coordinate, b: Coordinate) -> f64 {
    a.to_point().haversine_distance(&b.to_point())
}

/// Length of a polyline as the sum of its haversine segment lengths.
pub fn polyline_length_m(points: &[Coordinate]) -> f64 {
    points
        .iter()
        .tuple_windows()
        .map(|(a, b)| haversine_m(*a, *b))
        .sum()
}

/// Local flat-earth projection to metres around an origin.
#[derive(Debug, Clone, Copy)]
pub struct LocalProjection {
    origin: Coordinate,
    meters_per_deg_lng: f64,
}

impl LocalProjection {
    pub fn new(origin: Coordinate) -> Self {
        Self {
            origin,
            meters_per_deg_lng: METERS_PER_DEG_LAT * origin.lat.to_radians().cos(),
        }
    }

    pub fn project(&self, c: Coordinate) -> [f64; 2] {
        [
            (c.lng - self.origin.lng) * self.meters_per_deg_lng,
            (c.lat - self.origin.lat) * METERS_PER_DEG_LAT,
        ]
    }
}

/// Shortest distance in metres from `p` to the segment `a`-`b`.
pub fn point_segment_distance_m(p: Coordinate, a: Coordinate, b: Coordinate) -> f64 {
    let projection = LocalProjection::new(p);
    let [ax, ay] = projection.project(a);
    let [bx, by] = projection.project(b);
    let line = Line::new((ax, ay), (bx, by));
    Point::new(0.0, 0.0).euclidean_distance(&line)
}

/// Shortest distance from `p` to any segment of `points`, paired with the
/// index of the closest segment. A single point counts as a degenerate
/// segment. Returns `None` for an empty polyline.
pub fn polyline_distance_m(p: Coordinate, points: &[Coordinate]) -> Option<(f64, usize)> {
    match points {
        [] => None,
        [single] => Some((point_segment_distance_m(p, *single, *single), 0)),
        _ => points
            .iter()
            .tuple_windows()
            .map(|(a, b)| point_segment_distance_m(p, *a, *b))
            .enumerate()
            .map(|(i, d)| (d, i))
            .min_by(|x, y| x.0.total_cmp(&y.0)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Smallest box covering every coordinate, `None` when empty.
    pub fn covering<'a>(coords: impl IntoIterator<Item = &'a Coordinate>) -> Option<Self> {
        coords.into_iter().fold(None, |acc, c| {
            Some(match acc {
                None => Self::new(c.lat, c.lng, c.lat, c.lng),
                Some(b) => Self::new(
                    b.min_lat.min(c.lat),
                    b.min_lng.min(c.lng),
                    b.max_lat.max(c.lat),
                    b.max_lng.max(c.lng),
                ),
            })
        })
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        c.lat >= self.min_lat && c.lat <= self.max_lat && c.lng >= self.min_lng && c.lng <= self.max_lng
    }

    /// Grows the box by `meters` on every side.
    pub fn expand_m(&self, meters: f64) -> Self {
        let lat_pad = meters / METERS_PER_DEG_LAT;
        let widest = self.min_lat.abs().max(self.max_lat.abs()).min(89.0);
        let lng_pad = meters / (METERS_PER_DEG_LAT * widest.to_radians().cos());
        Self::new(
            (self.min_lat - lat_pad).max(-90.0),
            (self.min_lng - lng_pad).max(-180.0),
            (self.max_lat + lat_pad).min(90.0),
            (self.max_lng + lng_pad).min(180.0),
        )
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}
