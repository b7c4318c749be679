use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Falloff, RiskConfig};
use crate::crime::CrimeSnapshot;
use crate::model::{Coordinate, CrimeReport, CrimeType};

/// One report's share of an edge penalty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskContribution {
    pub report_id: String,
    pub crime_type: CrimeType,
    pub distance_m: f64,
    /// Already scaled by the global multiplier
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeRisk {
    pub penalty: f64,
    pub contributions: Vec<RiskContribution>,
}

/// Turns nearby crime reports into a non-negative per-edge penalty.
///
/// Pure: the result depends only on the geometry, the snapshot (including its
/// reference time) and the configuration.
#[derive(Debug, Clone)]
pub struct RiskWeighting {
    config: RiskConfig,
}

impl RiskWeighting {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn radius_m(&self) -> f64 {
        self.config.radius_m
    }

    pub fn multiplier(&self) -> f64 {
        self.config.multiplier
    }

    /// Severity (or type weight) scaled by how recent the report is.
    pub fn report_weight(&self, report: &CrimeReport, reference_time: DateTime<Utc>) -> f64 {
        let base = report
            .severity
            .filter(|s| s.is_finite())
            .unwrap_or_else(|| self.config.type_weight(report.crime_type));
        let recency = if self.config.recency_decay {
            recency_factor(report.time, reference_time)
        } else {
            1.0
        };
        (base * recency).max(0.0)
    }

    /// Distance attenuation in `[0, 1]`; zero beyond the radius.
    pub fn falloff(&self, distance_m: f64) -> f64 {
        let radius = self.config.radius_m;
        if !(distance_m <= radius) {
            return 0.0;
        }
        let d = distance_m.max(0.0);
        match self.config.falloff {
            Falloff::Constant => 1.0,
            Falloff::Linear if radius > 0.0 => 1.0 - d / radius,
            Falloff::Linear => 1.0,
            Falloff::Inverse { scale_m } => 1.0 / (1.0 + d / scale_m),
            Falloff::Gaussian { sigma_m } => (-(d * d) / (2.0 * sigma_m * sigma_m)).exp(),
        }
    }

    /// Penalty for an edge with the given polyline, with the contribution of
    /// every report that counted. Contributions are summed in report order.
    pub fn edge_risk(&self, geometry: &[Coordinate], crimes: &CrimeSnapshot) -> EdgeRisk {
        if crimes.is_empty() || self.config.multiplier == 0.0 {
            return EdgeRisk::default();
        }

        let mut risk = EdgeRisk::default();
        for (i, distance_m) in crimes.near_polyline(geometry, self.config.radius_m) {
            let report = crimes.report(i);
            let amount = self.config.multiplier
                * self.report_weight(report, crimes.reference_time())
                * self.falloff(distance_m);
            if amount <= 0.0 {
                continue;
            }
            risk.penalty += amount;
            risk.contributions.push(RiskContribution {
                report_id: report.id.clone(),
                crime_type: report.crime_type,
                distance_m,
                amount,
            });
        }
        risk
    }

    pub fn edge_penalty(&self, geometry: &[Coordinate], crimes: &CrimeSnapshot) -> f64 {
        self.edge_risk(geometry, crimes).penalty
    }
}

/// Older reports count for less, in coarse day buckets.
fn recency_factor(time: DateTime<Utc>, reference_time: DateTime<Utc>) -> f64 {
    let age_days = (reference_time - time).num_days();
    match age_days {
        ..1 => 1.0,
        1..7 => 0.8,
        7..21 => 0.6,
        21..42 => 0.4,
        42..56 => 0.2,
        _ => 0.1,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use h3o::Resolution;

    use super::*;
    use crate::geometry::METERS_PER_DEG_LAT;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn report(id: &str, crime_type: CrimeType, lat: f64, lng: f64, days_ago: i64) -> CrimeReport {
        CrimeReport {
            id: id.to_string(),
            crime_type,
            location: Coordinate::new(lat, lng),
            time: at() - chrono::Duration::days(days_ago),
            severity: None,
        }
    }

    fn snapshot(reports: Vec<CrimeReport>) -> CrimeSnapshot {
        CrimeSnapshot::new(reports, at(), None, None, Resolution::Nine).unwrap()
    }

    fn segment() -> [Coordinate; 2] {
        [Coordinate::new(23.75, 90.39), Coordinate::new(23.75, 90.40)]
    }

    fn constant(radius_m: f64) -> RiskConfig {
        RiskConfig {
            radius_m,
            falloff: Falloff::Constant,
            multiplier: 1.0,
            recency_decay: false,
            ..RiskConfig::default()
        }
    }

    #[test]
    fn test_no_reports_is_exactly_zero() {
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let risk = weighting.edge_risk(&segment(), &CrimeSnapshot::empty(at()));
        assert_eq!(risk.penalty, 0.0);
        assert!(risk.contributions.is_empty());

        // Reports exist but none are within the radius
        let far = snapshot(vec![report("far", CrimeType::Murder, 23.80, 90.39, 0)]);
        assert_eq!(weighting.edge_penalty(&segment(), &far), 0.0);
    }

    #[test]
    fn test_type_weights_and_constant_falloff() {
        let weighting = RiskWeighting::new(&constant(50.0));
        let on_road = 23.75 + 10.0 / METERS_PER_DEG_LAT;
        let crimes = snapshot(vec![
            report("a", CrimeType::Murder, on_road, 90.395, 0),
            report("b", CrimeType::Theft, on_road, 90.396, 0),
        ]);
        let risk = weighting.edge_risk(&segment(), &crimes);
        assert!((risk.penalty - 13.0).abs() < 1e-9);
        assert_eq!(risk.contributions.len(), 2);
        assert_eq!(risk.contributions[0].report_id, "a");
    }

    #[test]
    fn test_severity_overrides_type_weight() {
        let weighting = RiskWeighting::new(&constant(50.0));
        let mut r = report("a", CrimeType::Murder, 23.75, 90.395, 0);
        r.severity = Some(2.5);
        assert_eq!(weighting.report_weight(&r, at()), 2.5);
    }

    #[test]
    fn test_recency_buckets() {
        let config = RiskConfig {
            recency_decay: true,
            ..constant(50.0)
        };
        let weighting = RiskWeighting::new(&config);
        let weight = |days| weighting.report_weight(&report("x", CrimeType::Other, 0.0, 0.0, days), at());
        assert_eq!(weight(0), 1.0);
        assert_eq!(weight(3), 0.8);
        assert_eq!(weight(10), 0.6);
        assert_eq!(weight(30), 0.4);
        assert_eq!(weight(50), 0.2);
        assert_eq!(weight(100), 0.1);
    }

    #[test]
    fn test_falloff_shapes() {
        let linear = RiskWeighting::new(&RiskConfig {
            falloff: Falloff::Linear,
            ..constant(50.0)
        });
        assert_eq!(linear.falloff(0.0), 1.0);
        assert!((linear.falloff(25.0) - 0.5).abs() < 1e-12);
        assert_eq!(linear.falloff(50.1), 0.0);

        let gaussian = RiskWeighting::new(&RiskConfig {
            falloff: Falloff::Gaussian { sigma_m: 25.0 },
            ..constant(50.0)
        });
        assert!((gaussian.falloff(25.0) - (-0.5f64).exp()).abs() < 1e-12);
        assert!(gaussian.falloff(10.0) > gaussian.falloff(20.0));

        let inverse = RiskWeighting::new(&RiskConfig {
            falloff: Falloff::Inverse { scale_m: 10.0 },
            ..constant(50.0)
        });
        assert!((inverse.falloff(10.0) - 0.5).abs() < 1e-12);
        assert_eq!(inverse.falloff(f64::NAN), 0.0);
    }

    #[test]
    fn test_edge_risk_is_pure() {
        let weighting = RiskWeighting::new(&RiskConfig::default());
        let crimes = snapshot(vec![
            report("a", CrimeType::Robbery, 23.7502, 90.395, 2),
            report("b", CrimeType::Assault, 23.7498, 90.392, 30),
        ]);
        let first = weighting.edge_risk(&segment(), &crimes);
        let second = weighting.edge_risk(&segment(), &crimes);
        assert!(first.penalty > 0.0);
        assert_eq!(first, second);
        assert_eq!(first.penalty.to_bits(), second.penalty.to_bits());
    }
}
