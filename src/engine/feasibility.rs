use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::filter::FilterState;
use super::snapshot::{CellKey, PlannerSnapshot};

/// Per-teacher cell capacity. Two students per teacher per slot.
pub const CELL_CAPACITY: usize = 2;

/// What the grid paints on a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CellMark {
    /// A selection is held and at least one active teacher has a shift here.
    /// Occupancy is not consulted; a full cell is still a legal click target
    /// (it routes into the eviction protocol).
    #[serde(rename_all = "camelCase")]
    Possible {
        teacher_ids: Vec<String>,
        /// No lessons at all in this cell, any teacher.
        empty: bool,
    },
    /// No selection: how many active teachers are available here.
    #[serde(rename_all = "camelCase")]
    Coverage { available: u32 },
}

/// Advisory conflicts found in one cell. Never blocks anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellViolation {
    /// Teacher ids holding more than CELL_CAPACITY lessons here.
    pub over_capacity: Vec<String>,
    /// Student ids with two or more lessons in this (date, slot), across
    /// all teachers.
    pub double_booked: Vec<String>,
}

impl CellViolation {
    pub fn is_empty(&self) -> bool {
        self.over_capacity.is_empty() && self.double_booked.is_empty()
    }
}

/// Available active teachers for one cell, per the shift set alone.
pub fn feasible_teachers(
    snapshot: &PlannerSnapshot,
    filter: &FilterState,
    cell: CellKey,
) -> Vec<String> {
    snapshot
        .teachers
        .iter()
        .filter(|t| filter.is_active(&t.id))
        .filter(|t| snapshot.has_shift(cell.date, &t.id, cell.slot))
        .map(|t| t.id.clone())
        .collect()
}

/// Marks for every cell of the period. `selecting` says whether the operator
/// is holding a unit, which switches the grid from coverage counts to
/// placement-target highlighting.
pub fn cell_marks(
    snapshot: &PlannerSnapshot,
    filter: &FilterState,
    selecting: bool,
) -> BTreeMap<CellKey, CellMark> {
    let mut marks = BTreeMap::new();
    for cell in snapshot.cells() {
        let teachers = feasible_teachers(snapshot, filter, cell);
        if selecting {
            if !teachers.is_empty() {
                let empty = snapshot.groups_at(cell).iter().all(|g| g.lessons.is_empty());
                marks.insert(
                    cell,
                    CellMark::Possible {
                        teacher_ids: teachers,
                        empty,
                    },
                );
            }
        } else if !teachers.is_empty() {
            marks.insert(
                cell,
                CellMark::Coverage {
                    available: teachers.len() as u32,
                },
            );
        }
    }
    marks
}

/// Full advisory scan of the snapshot. Cells with no findings are omitted.
pub fn scan_violations(snapshot: &PlannerSnapshot) -> BTreeMap<CellKey, CellViolation> {
    let mut out = BTreeMap::new();
    for (cell, groups) in &snapshot.assignments {
        let mut violation = CellViolation::default();
        let mut seen: BTreeMap<&str, u32> = BTreeMap::new();
        for group in groups {
            if group.lessons.len() > CELL_CAPACITY {
                violation.over_capacity.push(group.teacher_id.clone());
            }
            for lesson in &group.lessons {
                *seen.entry(lesson.student_id.as_str()).or_insert(0) += 1;
            }
        }
        let doubled: BTreeSet<&str> = seen
            .iter()
            .filter(|(_, n)| **n >= 2)
            .map(|(id, _)| *id)
            .collect();
        violation.double_booked = doubled.into_iter().map(str::to_string).collect();
        if !violation.is_empty() {
            out.insert(*cell, violation);
        }
    }
    out
}
