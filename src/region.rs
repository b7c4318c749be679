use crate::config::{District, RegionConfig};
use crate::geometry::BoundingBox;
use crate::graph::RoadNetwork;
use crate::model::Coordinate;

/// Area inside which request endpoints and crime reports are accepted.
#[derive(Debug, Clone)]
pub struct ServiceRegion {
    districts: Vec<District>,
    fallback: Option<BoundingBox>,
}

impl ServiceRegion {
    /// Configured districts when present, otherwise the network's bounding
    /// box grown by the configured margin.
    pub fn for_network(config: &RegionConfig, network: &RoadNetwork) -> Self {
        Self {
            districts: config.districts.clone(),
            fallback: network.bounds().map(|b| b.expand_m(config.margin_m)),
        }
    }

    pub fn contains(&self, coord: Coordinate) -> bool {
        if !coord.is_valid() {
            return false;
        }
        if self.districts.is_empty() {
            return self.fallback.is_some_and(|b| b.contains(coord));
        }
        self.district_for(coord).is_some()
    }

    /// Box covering the whole region, used as the crime-store query area.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        if self.districts.is_empty() {
            return self.fallback;
        }
        self.districts
            .iter()
            .map(|d| BoundingBox::new(d.min_lat, d.min_lng, d.max_lat, d.max_lng))
            .reduce(|a, b| {
                BoundingBox::new(
                    a.min_lat.min(b.min_lat),
                    a.min_lng.min(b.min_lng),
                    a.max_lat.max(b.max_lat),
                    a.max_lng.max(b.max_lng),
                )
            })
    }

    /// First configured district containing `coord`.
    pub fn district_for(&self, coord: Coordinate) -> Option<&str> {
        self.districts
            .iter()
            .find(|d| {
                BoundingBox::new(d.min_lat, d.min_lng, d.max_lat, d.max_lng).contains(coord)
            })
            .map(|d| d.name.as_str())
    }
}
