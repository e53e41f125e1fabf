//! Pure planning: which units to run, in which order, given what is applied.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::errors::MigrationError;
use crate::unit::{MigrationUnit, Reversibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

/// How far a run should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every pending unit (up) or every applied unit (down).
    All,
    /// At most `n` units up; exactly `n` units down.
    Count(usize),
    /// Up: through this id inclusive. Down: everything applied after this id.
    To(String),
}

/// Units sorted by id, rejecting duplicates.
fn ordered<'a>(
    units: &[&'a dyn MigrationUnit],
) -> Result<Vec<&'a dyn MigrationUnit>, MigrationError> {
    let mut ordered = units.to_vec();
    ordered.sort_by(|a, b| a.id().cmp(b.id()));
    if let Some(pair) = ordered.windows(2).find(|pair| pair[0].id() == pair[1].id()) {
        return Err(MigrationError::DuplicateUnit {
            unit_id: pair[0].id().to_string(),
        });
    }
    Ok(ordered)
}

/// Length of the applied prefix, or `OutOfOrderState` when `applied` is not one.
fn applied_prefix(
    applied: &BTreeSet<String>,
    ordered: &[&dyn MigrationUnit],
) -> Result<usize, MigrationError> {
    if let Some(unknown) = applied
        .iter()
        .find(|id| !ordered.iter().any(|unit| unit.id() == id.as_str()))
    {
        return Err(MigrationError::OutOfOrderState {
            detail: format!("applied unit '{unknown}' is not in the known unit list"),
        });
    }

    let prefix = ordered.iter().take_while(|unit| applied.contains(unit.id())).count();
    if prefix != applied.len() {
        let gap = ordered[prefix].id();
        let later = ordered[prefix..]
            .iter()
            .find(|unit| applied.contains(unit.id()))
            .map(|unit| unit.id())
            .unwrap_or_default();
        return Err(MigrationError::OutOfOrderState {
            detail: format!("'{gap}' is pending but later unit '{later}' is applied"),
        });
    }
    Ok(prefix)
}

fn position(ordered: &[&dyn MigrationUnit], id: &str) -> Result<usize, MigrationError> {
    ordered
        .iter()
        .position(|unit| unit.id() == id)
        .ok_or_else(|| MigrationError::UnknownUnit { unit_id: id.to_string() })
}

/// Pending units in id order. Input order is irrelevant.
pub fn plan_up<'a>(
    applied: &BTreeSet<String>,
    units: &[&'a dyn MigrationUnit],
) -> Result<Vec<&'a dyn MigrationUnit>, MigrationError> {
    let ordered = ordered(units)?;
    let prefix = applied_prefix(applied, &ordered)?;
    Ok(ordered[prefix..].to_vec())
}

/// The `count` most recently applied units, most recent first.
pub fn plan_down<'a>(
    applied: &BTreeSet<String>,
    units: &[&'a dyn MigrationUnit],
    count: usize,
) -> Result<Vec<&'a dyn MigrationUnit>, MigrationError> {
    let ordered = ordered(units)?;
    let prefix = applied_prefix(applied, &ordered)?;
    if count > prefix {
        return Err(MigrationError::InvalidRevertCount {
            requested: count,
            applied: prefix,
        });
    }
    Ok(ordered[prefix - count..prefix].iter().rev().copied().collect())
}

/// Resolve a direction and target into the exact units to run.
///
/// A down plan that would cross an irreversible unit fails here, before
/// anything is reverted.
pub fn plan<'a>(
    direction: Direction,
    target: &Target,
    applied: &BTreeSet<String>,
    units: &[&'a dyn MigrationUnit],
) -> Result<Vec<&'a dyn MigrationUnit>, MigrationError> {
    match direction {
        Direction::Up => {
            let pending = plan_up(applied, units)?;
            match target {
                Target::All => Ok(pending),
                Target::Count(n) => Ok(pending.into_iter().take(*n).collect()),
                Target::To(id) => {
                    let ordered = ordered(units)?;
                    let through = position(&ordered, id)? + 1;
                    let already = ordered.len() - pending.len();
                    Ok(pending.into_iter().take(through.saturating_sub(already)).collect())
                }
            }
        }
        Direction::Down => {
            let ordered = ordered(units)?;
            let prefix = applied_prefix(applied, &ordered)?;
            let count = match target {
                Target::All => prefix,
                Target::Count(n) => *n,
                Target::To(id) => prefix.saturating_sub(position(&ordered, id)? + 1),
            };
            let reverting = plan_down(applied, units, count)?;
            if let Some(unit) = reverting
                .iter()
                .find(|unit| unit.reversibility().is_irreversible())
            {
                let reason = match unit.reversibility() {
                    Reversibility::Irreversible(reason) => reason,
                    _ => String::new(),
                };
                return Err(MigrationError::NotReversible {
                    unit_id: unit.id().to_string(),
                    reason,
                });
            }
            Ok(reverting)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::unit::{SeedUnit, Step, StepUnit};

    const A: &str = "20230101000000_a";
    const B: &str = "20230201000000_b";
    const C: &str = "20230301000000_c";

    fn units() -> Vec<SeedUnit> {
        [C, A, B]
            .into_iter()
            .map(|id| SeedUnit::new(id, "things", vec![Document::new(id)]))
            .collect()
    }

    fn refs(units: &[SeedUnit]) -> Vec<&dyn MigrationUnit> {
        units.iter().map(|unit| unit as &dyn MigrationUnit).collect()
    }

    fn applied(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn ids(plan: &[&dyn MigrationUnit]) -> Vec<String> {
        plan.iter().map(|unit| unit.id().to_string()).collect()
    }

    #[test]
    fn plan_up_orders_by_id() {
        let units = units();
        assert_eq!(
            ids(&plan_up(&applied(&[]), &refs(&units)).unwrap()),
            [A, B, C]
        );
        assert_eq!(
            ids(&plan_up(&applied(&[A]), &refs(&units)).unwrap()),
            [B, C]
        );
    }

    #[test]
    fn gap_in_applied_set_is_out_of_order() {
        let units = units();
        let err = plan_up(&applied(&[A, C]), &refs(&units)).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::OutOfOrderState { ref detail } if detail.contains(B)
        ));
    }

    #[test]
    fn unknown_applied_id_is_out_of_order() {
        let units = units();
        let err = plan_up(&applied(&[A, "20221231000000_gone"]), &refs(&units)).unwrap_err();
        assert!(matches!(err, MigrationError::OutOfOrderState { .. }));
    }

    #[test]
    fn plan_down_is_most_recent_first() {
        let units = units();
        let plan = plan_down(&applied(&[A, B, C]), &refs(&units), 2).unwrap();
        assert_eq!(ids(&plan), [C, B]);
        let err = plan_down(&applied(&[A]), &refs(&units), 2).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidRevertCount { requested: 2, applied: 1 }));
    }

    #[test]
    fn targets() {
        let units = units();
        let units = refs(&units);
        let one = applied(&[A]);

        let up_to_b = plan(Direction::Up, &Target::To(B.into()), &one, &units).unwrap();
        assert_eq!(ids(&up_to_b), [B]);
        let up_to_a = plan(Direction::Up, &Target::To(A.into()), &one, &units).unwrap();
        assert!(up_to_a.is_empty());
        let up_five = plan(Direction::Up, &Target::Count(5), &one, &units).unwrap();
        assert_eq!(ids(&up_five), [B, C]);

        let all = applied(&[A, B, C]);
        let down_to_a = plan(Direction::Down, &Target::To(A.into()), &all, &units).unwrap();
        assert_eq!(ids(&down_to_a), [C, B]);
        let down_all = plan(Direction::Down, &Target::All, &all, &units).unwrap();
        assert_eq!(ids(&down_all), [C, B, A]);

        let target = Target::To("20991231000000_nope".into());
        let err = plan(Direction::Up, &target, &one, &units).unwrap_err();
        assert!(matches!(err, MigrationError::UnknownUnit { .. }));
    }

    #[test]
    fn down_plan_refuses_irreversible_units() {
        let drop = StepUnit::new(B, vec![Step::remove_field("answers", "text")]);
        let seed = SeedUnit::new(A, "things", vec![]);
        let units: [&dyn MigrationUnit; 2] = [&seed, &drop];

        let err = plan(
            Direction::Down,
            &Target::Count(1),
            &applied(&[A, B]),
            &units,
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::NotReversible { ref unit_id, .. } if unit_id == B));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let first = SeedUnit::new(A, "things", vec![]);
        let second = SeedUnit::new(A, "others", vec![]);
        let units: [&dyn MigrationUnit; 2] = [&first, &second];
        assert!(matches!(
            plan_up(&applied(&[]), &units),
            Err(MigrationError::DuplicateUnit { .. })
        ));
    }
}
