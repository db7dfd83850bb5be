//! Pending-set computation.
//!
//! Pure functions over the registry's ordered units and the ledger's applied
//! set; the runner owns their output for one invocation.

use std::collections::BTreeSet;
use std::sync::Arc;

use keel_core::migration::{MigrationUnit, Version};

/// Units to apply: registered but not applied, ascending, at most `limit`.
pub fn pending_up(
    ordered: &[Arc<dyn MigrationUnit>],
    applied: &BTreeSet<Version>,
    limit: Option<usize>,
) -> Vec<Arc<dyn MigrationUnit>> {
    ordered
        .iter()
        .filter(|unit| !applied.contains(&unit.version()))
        .take(limit.unwrap_or(usize::MAX))
        .cloned()
        .collect()
}

/// Units to revert: registered and applied, descending, at most `steps`.
pub fn rollback_candidates(
    ordered: &[Arc<dyn MigrationUnit>],
    applied: &BTreeSet<Version>,
    steps: usize,
) -> Vec<Arc<dyn MigrationUnit>> {
    ordered
        .iter()
        .rev()
        .filter(|unit| applied.contains(&unit.version()))
        .take(steps)
        .cloned()
        .collect()
}

/// Units to revert for explicit targets, descending.
///
/// Targets that are not applied or not registered are skipped.
pub fn revert_candidates(
    ordered: &[Arc<dyn MigrationUnit>],
    applied: &BTreeSet<Version>,
    targets: &[Version],
) -> Vec<Arc<dyn MigrationUnit>> {
    let targets: BTreeSet<Version> = targets.iter().copied().collect();
    ordered
        .iter()
        .rev()
        .filter(|unit| targets.contains(&unit.version()) && applied.contains(&unit.version()))
        .cloned()
        .collect()
}

/// Applied versions with no registered unit.
pub fn orphaned(ordered: &[Arc<dyn MigrationUnit>], applied: &BTreeSet<Version>) -> Vec<Version> {
    let known: BTreeSet<Version> = ordered.iter().map(|unit| unit.version()).collect();
    applied.difference(&known).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::error::KeelError;
    use keel_core::migration::FnMigration;

    fn units(versions: &[i64]) -> Vec<Arc<dyn MigrationUnit>> {
        versions
            .iter()
            .map(|v| {
                Arc::new(FnMigration::irreversible(
                    Version::new(*v),
                    format!("m{}", v),
                    |_tx, _log| Box::pin(async move { Ok::<(), KeelError>(()) }),
                )) as Arc<dyn MigrationUnit>
            })
            .collect()
    }

    fn set(versions: &[i64]) -> BTreeSet<Version> {
        versions.iter().map(|v| Version::new(*v)).collect()
    }

    fn versions(units: &[Arc<dyn MigrationUnit>]) -> Vec<i64> {
        units.iter().map(|u| u.version().as_i64()).collect()
    }

    #[test]
    fn test_pending_up_skips_applied() {
        let ordered = units(&[1, 2, 3, 4]);
        let pending = pending_up(&ordered, &set(&[1, 3]), None);
        assert_eq!(versions(&pending), vec![2, 4]);
    }

    #[test]
    fn test_pending_up_limit() {
        let ordered = units(&[1, 2, 3]);
        assert_eq!(versions(&pending_up(&ordered, &set(&[]), Some(2))), vec![1, 2]);
        assert!(pending_up(&ordered, &set(&[]), Some(0)).is_empty());
    }

    #[test]
    fn test_pending_up_nothing_left() {
        let ordered = units(&[1]);
        assert!(pending_up(&ordered, &set(&[1]), None).is_empty());
    }

    #[test]
    fn test_rollback_descending() {
        let ordered = units(&[1, 2, 3]);
        let applied = set(&[1, 2]);
        assert_eq!(versions(&rollback_candidates(&ordered, &applied, 1)), vec![2]);
        assert_eq!(
            versions(&rollback_candidates(&ordered, &applied, 10)),
            vec![2, 1]
        );
    }

    #[test]
    fn test_revert_intersects_applied() {
        let ordered = units(&[1, 2, 3]);
        let applied = set(&[1, 3]);
        let targets = [Version::new(1), Version::new(2), Version::new(3), Version::new(9)];
        assert_eq!(
            versions(&revert_candidates(&ordered, &applied, &targets)),
            vec![3, 1]
        );
    }

    #[test]
    fn test_orphaned() {
        let ordered = units(&[1, 2]);
        assert_eq!(
            orphaned(&ordered, &set(&[1, 5])),
            vec![Version::new(5)]
        );
    }
}
