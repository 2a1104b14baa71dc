//! Migration Planner - decides which migrations a run touches, in what order.
//!
//! Planning is pure: it sees the registry, the applied set, a direction and an
//! optional target id, and never talks to the database.

use std::collections::BTreeSet;

use super::definitions::{Migration, MigrationDirection};
use super::registry::MigrationRegistry;

/// Ordered steps for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub direction: MigrationDirection,
    pub target: Option<i64>,
    steps: Vec<Migration>,
}

impl MigrationPlan {
    pub fn steps(&self) -> &[Migration] {
        &self.steps
    }

    pub fn ids(&self) -> Vec<i64> {
        self.steps.iter().map(|m| m.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

pub struct MigrationPlanner;

impl MigrationPlanner {
    /// Compute the plan.
    ///
    /// Up: pending migrations ascending, stopping before the first id above
    /// `target`. Down: applied migrations descending, stopping before the first
    /// id below `target`; without a target only the most recent one.
    pub fn plan(
        registry: &MigrationRegistry,
        applied: &BTreeSet<i64>,
        direction: MigrationDirection,
        target: Option<i64>,
    ) -> MigrationPlan {
        let steps = match direction {
            MigrationDirection::Up => {
                let mut pending: Vec<&Migration> =
                    registry.iter().filter(|m| !applied.contains(&m.id)).collect();
                pending.sort_by_key(|m| m.id);

                pending
                    .into_iter()
                    .take_while(|m| target.map_or(true, |t| m.id <= t))
                    .cloned()
                    .collect()
            }
            MigrationDirection::Down => {
                let mut rollbacks: Vec<&Migration> =
                    registry.iter().filter(|m| applied.contains(&m.id)).collect();
                rollbacks.sort_by_key(|m| std::cmp::Reverse(m.id));

                match target {
                    Some(t) => rollbacks
                        .into_iter()
                        .take_while(|m| m.id >= t)
                        .cloned()
                        .collect(),
                    None => rollbacks.into_iter().take(1).cloned().collect(),
                }
            }
        };

        MigrationPlan {
            direction,
            target,
            steps,
        }
    }

    /// Applied ids that the registry does not know about, ascending
    pub fn orphaned(registry: &MigrationRegistry, applied: &BTreeSet<i64>) -> Vec<i64> {
        applied
            .iter()
            .copied()
            .filter(|id| !registry.contains(*id))
            .collect()
    }
}
