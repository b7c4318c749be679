//! TOML configuration. Every section has defaults so an empty file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use strum::IntoEnumIterator;

use crate::error::Error;
use crate::graph::NetworkFormat;
use crate::model::CrimeType;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub crimes: CrimeSourceConfig,
    pub risk: RiskConfig,
    pub search: SearchConfig,
    pub alternatives: AlternativeConfig,
    pub diagnostics: DiagnosticConfig,
    pub region: RegionConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(raw).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if !(self.risk.radius_m.is_finite() && self.risk.radius_m >= 0.0) {
            return invalid(format!("risk.radius_m must be >= 0, got {}", self.risk.radius_m));
        }
        if !(self.risk.multiplier.is_finite() && self.risk.multiplier >= 0.0) {
            return invalid(format!(
                "risk.multiplier must be >= 0, got {}",
                self.risk.multiplier
            ));
        }
        match self.risk.falloff {
            Falloff::Inverse { scale_m } if !(scale_m > 0.0) => {
                return invalid("risk.falloff.scale_m must be > 0".into());
            }
            Falloff::Gaussian { sigma_m } if !(sigma_m > 0.0) => {
                return invalid("risk.falloff.sigma_m must be > 0".into());
            }
            _ => {}
        }
        if let Some((crime, weight)) = self
            .risk
            .type_weights
            .iter()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return invalid(format!("risk.type_weights.{crime} must be >= 0, got {weight}"));
        }
        if h3o::Resolution::try_from(self.crimes.h3_resolution).is_err() {
            return invalid(format!(
                "crimes.h3_resolution must be 0..=15, got {}",
                self.crimes.h3_resolution
            ));
        }
        if self.search.timeout_ms >= self.server.request_timeout_ms {
            return invalid(format!(
                "search.timeout_ms ({}) must be below server.request_timeout_ms ({})",
                self.search.timeout_ms, self.server.request_timeout_ms
            ));
        }
        if !(self.search.max_snap_distance_m > 0.0) {
            return invalid("search.max_snap_distance_m must be > 0".into());
        }
        if !(self.alternatives.penalty_factor.is_finite() && self.alternatives.penalty_factor >= 1.0)
        {
            return invalid(format!(
                "alternatives.penalty_factor must be >= 1, got {}",
                self.alternatives.penalty_factor
            ));
        }
        if !(self.alternatives.overlap_threshold > 0.0 && self.alternatives.overlap_threshold <= 1.0)
        {
            return invalid("alternatives.overlap_threshold must be in (0, 1]".into());
        }
        if self.alternatives.max_consecutive_rejections == 0 {
            return invalid("alternatives.max_consecutive_rejections must be >= 1".into());
        }
        if !(self.diagnostics.proximity_threshold_m >= 0.0) {
            return invalid("diagnostics.proximity_threshold_m must be >= 0".into());
        }
        for d in &self.region.districts {
            if d.min_lat > d.max_lat || d.min_lng > d.max_lng {
                return invalid(format!("region district {} has an inverted box", d.name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
    /// Upper bound on a whole request, search included
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub path: PathBuf,
    pub format: NetworkFormat,
    /// Reload the network this often; `None` loads once at startup
    pub refresh_interval_secs: Option<u64>,
    pub load_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("assets/network.osm.pbf"),
            format: NetworkFormat::Auto,
            refresh_interval_secs: None,
            load_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrimeSourceConfig {
    pub path: PathBuf,
    /// How long a fetched report set may be reused; 0 disables caching
    pub cache_ttl_secs: u64,
    pub fetch_attempts: u32,
    pub retry_backoff_ms: u64,
    /// Reports older than this are ignored; `None` keeps everything
    pub lookback_days: Option<i64>,
    pub h3_resolution: u8,
}

impl Default for CrimeSourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("assets/crimes.json"),
            cache_ttl_secs: 30,
            fetch_attempts: 3,
            retry_backoff_ms: 200,
            lookback_days: Some(365),
            h3_resolution: 9,
        }
    }
}

/// How a report's influence fades with distance from an edge.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Falloff {
    /// Full weight anywhere inside the radius
    Constant,
    /// `1 - d / radius`
    Linear,
    /// `1 / (1 + d / scale_m)`
    Inverse { scale_m: f64 },
    /// `exp(-d² / 2σ²)`
    Gaussian { sigma_m: f64 },
}

impl Default for Falloff {
    fn default() -> Self {
        Falloff::Gaussian { sigma_m: 25.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskConfig {
    pub radius_m: f64,
    pub falloff: Falloff,
    /// Converts summed crime weight into base-cost units
    pub multiplier: f64,
    pub type_weights: BTreeMap<CrimeType, f64>,
    pub recency_decay: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            radius_m: 50.0,
            falloff: Falloff::default(),
            multiplier: 50.0,
            type_weights: default_type_weights(),
            recency_decay: true,
        }
    }
}

impl RiskConfig {
    pub fn type_weight(&self, crime: CrimeType) -> f64 {
        self.type_weights
            .get(&crime)
            .copied()
            .unwrap_or_else(|| default_type_weight(crime))
    }
}

fn default_type_weight(crime: CrimeType) -> f64 {
    match crime {
        CrimeType::Murder => 10.0,
        CrimeType::Rape => 9.0,
        CrimeType::Kidnap => 8.0,
        CrimeType::Robbery => 7.0,
        CrimeType::Assault | CrimeType::Harassment => 6.0,
        CrimeType::Theft => 3.0,
        CrimeType::Other => 1.0,
    }
}

fn default_type_weights() -> BTreeMap<CrimeType, f64> {
    CrimeType::iter()
        .map(|crime| (crime, default_type_weight(crime)))
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub max_snap_distance_m: f64,
    pub timeout_ms: u64,
    pub max_expansions: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_snap_distance_m: 500.0,
            timeout_ms: 5_000,
            max_expansions: None,
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlternativeConfig {
    /// Maximum number of alternatives besides the primary route
    pub count: usize,
    /// Cost multiplier applied once per accepted or rejected use of an edge
    pub penalty_factor: f64,
    /// Candidates sharing this fraction of edges with an accepted path are rejected
    pub overlap_threshold: f64,
    /// Searches are capped at `count * max_attempts_factor`
    pub max_attempts_factor: usize,
    pub max_consecutive_rejections: usize,
}

impl Default for AlternativeConfig {
    fn default() -> Self {
        Self {
            count: 3,
            penalty_factor: 10.0,
            overlap_threshold: 0.5,
            max_attempts_factor: 3,
            max_consecutive_rejections: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticConfig {
    pub proximity_threshold_m: f64,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_m: 50.0,
        }
    }
}

/// Named bounding box inside which requests are served.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct District {
    pub name: String,
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegionConfig {
    /// When empty, the network's bounding box grown by `margin_m` is used
    pub districts: Vec<District>,
    pub margin_m: f64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            districts: Vec::new(),
            margin_m: 2_000.0,
        }
    }
}
