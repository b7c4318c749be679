//! Alternative routes by iterative penalty re-search.

use petgraph::graph::NodeIndex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AlternativeConfig;
use crate::error::Error;
use crate::path::{Path, PathKind};
use crate::search::{SearchBudget, astar};
use crate::view::{CostModel, PenalizedView};

/// Why generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Found the requested number of alternatives
    Complete,
    /// Too many consecutive candidates overlapped an accepted path
    Rejected,
    AttemptsExhausted,
    /// The penalized search returned a path it had already produced
    Duplicate,
    NoPath,
    Budget,
}

#[derive(Debug, Clone)]
pub struct AlternativeSet {
    /// Accepted alternatives ranked by total cost, primary excluded
    pub accepted: Vec<Path>,
    /// Every candidate the re-search produced, in discovery order
    pub considered: Vec<Path>,
    pub attempts: usize,
    pub stop: StopReason,
}

/// Up to `config.count` paths from `primary.start` to `goal` that each share
/// less than `config.overlap_threshold` of their edges with the primary and
/// with each other.
///
/// Costs on the returned paths come from `view`, not from the penalized
/// search. Running out of budget ends generation early but is not an error;
/// neither is returning fewer alternatives than asked for.
pub fn generate_alternatives<V: CostModel>(
    view: &V,
    primary: &Path,
    goal: NodeIndex,
    config: &AlternativeConfig,
    budget: &SearchBudget,
) -> Result<AlternativeSet, Error> {
    let start = primary.start;
    let mut set = AlternativeSet {
        accepted: Vec::new(),
        considered: Vec::new(),
        attempts: 0,
        stop: StopReason::Complete,
    };
    if config.count == 0 || primary.is_empty() {
        return Ok(set);
    }

    let max_attempts = config.count * config.max_attempts_factor.max(1);
    let mut penalized = PenalizedView::new(view, config.penalty_factor);
    penalized.penalize(primary.edges());
    let mut kept = vec![primary.clone()];
    let mut rejections = 0;

    while kept.len() <= config.count {
        if set.attempts >= max_attempts {
            set.stop = StopReason::AttemptsExhausted;
            break;
        }
        set.attempts += 1;

        let found = match astar(&penalized, start, goal, budget) {
            Ok(found) => found,
            Err(Error::NoPathFound) => {
                set.stop = StopReason::NoPath;
                break;
            }
            Err(Error::Timeout { expanded }) => {
                warn!(
                    "Alternative search ran out of budget after {expanded} expansions, returning {} alternatives",
                    kept.len() - 1
                );
                set.stop = StopReason::Budget;
                break;
            }
            Err(e) => return Err(e),
        };
        let candidate = Path::from_edges(view, &found.edges, PathKind::Candidate, start)?;

        if kept
            .iter()
            .chain(&set.considered)
            .any(|p| p.same_edges(&candidate))
        {
            set.stop = StopReason::Duplicate;
            break;
        }
        penalized.penalize(candidate.edges());

        let overlap = kept
            .iter()
            .map(|p| p.overlap(&candidate))
            .fold(0.0, f64::max);
        set.considered.push(candidate.clone());

        if overlap < config.overlap_threshold {
            debug!(
                "Accepted alternative {} with overlap {overlap:.2}, cost {:.1}",
                kept.len(),
                candidate.total_cost()
            );
            kept.push(candidate);
            rejections = 0;
        } else {
            debug!("Rejected candidate with overlap {overlap:.2}");
            rejections += 1;
            if rejections >= config.max_consecutive_rejections {
                set.stop = StopReason::Rejected;
                break;
            }
        }
    }

    let mut accepted: Vec<Path> = kept.into_iter().skip(1).collect();
    accepted.sort_by(|a, b| a.total_cost().total_cmp(&b.total_cost()));
    set.accepted = accepted
        .into_iter()
        .enumerate()
        .map(|(i, p)| p.with_kind(PathKind::Alternative { rank: i + 1 }))
        .collect();
    Ok(set)
}
