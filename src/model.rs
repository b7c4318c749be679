use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumIter, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub(crate) fn to_point(self) -> geo::Point<f64> {
        geo::Point::new(self.lng, self.lat)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TravelMode {
    Drive,
    Walk,
}

/// Travel modes an edge may be used under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeSet {
    drive: bool,
    walk: bool,
}

impl ModeSet {
    pub const NONE: ModeSet = ModeSet {
        drive: false,
        walk: false,
    };
    pub const DRIVE: ModeSet = ModeSet {
        drive: true,
        walk: false,
    };
    pub const WALK: ModeSet = ModeSet {
        drive: false,
        walk: true,
    };
    pub const BOTH: ModeSet = ModeSet {
        drive: true,
        walk: true,
    };

    pub fn allows(self, mode: TravelMode) -> bool {
        match mode {
            TravelMode::Drive => self.drive,
            TravelMode::Walk => self.walk,
        }
    }

    pub fn with(mut self, mode: TravelMode) -> Self {
        match mode {
            TravelMode::Drive => self.drive = true,
            TravelMode::Walk => self.walk = true,
        }
        self
    }

    pub fn is_empty(self) -> bool {
        !self.drive && !self.walk
    }
}

impl FromIterator<TravelMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = TravelMode>>(iter: I) -> Self {
        iter.into_iter().fold(ModeSet::NONE, ModeSet::with)
    }
}

/// Road network node (intersection or way endpoint)
#[derive(Debug, Clone, Copy)]
pub struct GeoNode {
    /// Provider id of the node
    pub id: i64,
    pub coord: Coordinate,
}

/// Directed road segment
#[derive(Debug, Clone)]
pub struct RoadEdge {
    /// Points from the source node to the target node, both included
    pub geometry: Vec<Coordinate>,
    /// Cost the search minimises before any risk is added
    pub base_cost: f64,
    pub length_m: f64,
    pub modes: ModeSet,
}

/// Reported crime categories, as offered by the reporting form.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CrimeType {
    Murder,
    Rape,
    Kidnap,
    Assault,
    Robbery,
    Harassment,
    Theft,
    #[strum(to_string = "other", serialize = "others")]
    Other,
}

impl CrimeType {
    /// Unknown labels fall back to [`CrimeType::Other`].
    pub fn from_label(label: &str) -> Self {
        label.trim().parse().unwrap_or(CrimeType::Other)
    }
}

impl Serialize for CrimeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

impl<'de> Deserialize<'de> for CrimeType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(CrimeType::from_label(&label))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeReport {
    pub id: String,
    #[serde(rename = "type")]
    pub crime_type: CrimeType,
    pub location: Coordinate,
    #[serde(alias = "timestamp")]
    pub time: DateTime<Utc>,
    /// Overrides the type weight when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteRequest {
    pub start: Coordinate,
    pub end: Coordinate,
    pub mode: TravelMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_set() {
        assert!(ModeSet::BOTH.allows(TravelMode::Drive));
        assert!(ModeSet::BOTH.allows(TravelMode::Walk));
        assert!(!ModeSet::WALK.allows(TravelMode::Drive));
        assert!(ModeSet::NONE.is_empty());

        let set: ModeSet = [TravelMode::Walk].into_iter().collect();
        assert_eq!(set, ModeSet::WALK);
        assert_eq!(set.with(TravelMode::Drive), ModeSet::BOTH);
    }

    #[test]
    fn test_crime_type_labels() {
        assert_eq!(CrimeType::from_label("Robbery"), CrimeType::Robbery);
        assert_eq!(CrimeType::from_label("others"), CrimeType::Other);
        assert_eq!(CrimeType::from_label("arson"), CrimeType::Other);
        assert_eq!(CrimeType::Harassment.to_string(), "harassment");
    }

    #[test]
    fn test_crime_report_json() {
        let raw = r#"{
            "id": "r-1",
            "type": "theft",
            "location": { "lat": 23.75, "lng": 90.39 },
            "timestamp": "2026-10-01T18:30:00Z"
        }"#;
        let report: CrimeReport = serde_json::from_str(raw).unwrap();
        assert_eq!(report.crime_type, CrimeType::Theft);
        assert_eq!(report.severity, None);
        assert_eq!(report.location, Coordinate::new(23.75, 90.39));

        let back = serde_json::to_value(&report).unwrap();
        assert_eq!(back["type"], "theft");
        assert!(back.get("severity").is_none());
    }

    #[test]
    fn test_travel_mode_parse() {
        assert_eq!("walk".parse::<TravelMode>().unwrap(), TravelMode::Walk);
        assert_eq!("DRIVE".parse::<TravelMode>().unwrap(), TravelMode::Drive);
        let mode: TravelMode = serde_json::from_str("\"drive\"").unwrap();
        assert_eq!(mode, TravelMode::Drive);
    }
}
