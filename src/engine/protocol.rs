use serde::Serialize;

use super::feasibility::{feasible_teachers, CELL_CAPACITY};
use super::filter::FilterState;
use super::selection::Selection;
use super::snapshot::{CellKey, LessonInfo, LessonStatus, PlannerSnapshot};

/// Everything the store needs to create a lesson in a cell. Eviction, when
/// present, happens in the same transaction before the insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRequest {
    pub cell: CellKey,
    pub teacher_id: String,
    pub student_id: String,
    pub subject_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracted_lesson_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evict_lesson_id: Option<String>,
}

/// A committed decision the host must run against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PlannerAction {
    Place(PlacementRequest),
    #[serde(rename_all = "camelCase")]
    Move {
        lesson_id: String,
        request: PlacementRequest,
    },
}

/// A destination at capacity, waiting for the operator to nominate a lesson
/// to evict (or cancel). Held by the session until resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSwap {
    pub cell: CellKey,
    pub teacher_id: String,
    pub candidates: Vec<LessonInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ClickOutcome {
    Commit(PlannerAction),
    #[serde(rename_all = "camelCase")]
    NeedsTeacherChoice { teacher_ids: Vec<String> },
    NeedsEviction(PendingSwap),
    #[serde(rename_all = "camelCase")]
    Refused { reason: &'static str },
}

/// Resolve a grid click under the current selection. `chosen_teacher` is set
/// on the second pass, after a NeedsTeacherChoice round-trip.
pub fn resolve_cell_click(
    snapshot: &PlannerSnapshot,
    filter: &FilterState,
    selection: &Selection,
    cell: CellKey,
    chosen_teacher: Option<&str>,
) -> ClickOutcome {
    let (student_id, subject_id) = match (selection.student_id(), selection.subject_id()) {
        (Some(s), Some(subj)) => (s.to_string(), subj.to_string()),
        _ => return ClickOutcome::Refused { reason: "no_selection" },
    };

    let feasible = feasible_teachers(snapshot, filter, cell);
    if feasible.is_empty() {
        return ClickOutcome::Refused { reason: "not_feasible" };
    }

    let teacher_id = match chosen_teacher {
        Some(id) => {
            if !feasible.iter().any(|t| t == id) {
                return ClickOutcome::Refused { reason: "bad_teacher" };
            }
            id.to_string()
        }
        None => {
            if feasible.len() > 1 {
                return ClickOutcome::NeedsTeacherChoice { teacher_ids: feasible };
            }
            feasible.into_iter().next().unwrap_or_default()
        }
    };

    let moving_lesson_id = match selection {
        Selection::Move { lesson_id, .. } => Some(lesson_id.as_str()),
        _ => None,
    };

    // Occupancy check is against this teacher's group only; a lesson being
    // moved does not count against its own destination.
    let occupants: Vec<LessonInfo> = snapshot
        .group_for(cell, &teacher_id)
        .map(|g| {
            g.lessons
                .iter()
                .filter(|l| Some(l.id.as_str()) != moving_lesson_id)
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if occupants.len() >= CELL_CAPACITY {
        return ClickOutcome::NeedsEviction(PendingSwap {
            cell,
            teacher_id,
            candidates: occupants,
        });
    }

    let request = PlacementRequest {
        cell,
        teacher_id,
        student_id,
        subject_id,
        contracted_lesson_id: match selection {
            Selection::Add { contracted_lesson_id, .. }
            | Selection::Move { contracted_lesson_id, .. } => contracted_lesson_id.clone(),
            Selection::Idle => None,
        },
        evict_lesson_id: None,
    };

    match moving_lesson_id {
        Some(lesson_id) => ClickOutcome::Commit(PlannerAction::Move {
            lesson_id: lesson_id.to_string(),
            request,
        }),
        None => ClickOutcome::Commit(PlannerAction::Place(request)),
    }
}

/// Resolve a pending swap once the operator nominates the evictee. Locked
/// lessons are not evictable; nominating one keeps the swap pending.
pub fn resolve_eviction(
    swap: &PendingSwap,
    selection: &Selection,
    evict_lesson_id: &str,
) -> Result<PlannerAction, &'static str> {
    let victim = swap
        .candidates
        .iter()
        .find(|l| l.id == evict_lesson_id)
        .ok_or("bad_evict")?;
    if victim.status == LessonStatus::Locked {
        return Err("lesson_locked");
    }
    let (student_id, subject_id) = match (selection.student_id(), selection.subject_id()) {
        (Some(s), Some(subj)) => (s.to_string(), subj.to_string()),
        _ => return Err("no_selection"),
    };
    let request = PlacementRequest {
        cell: swap.cell,
        teacher_id: swap.teacher_id.clone(),
        student_id,
        subject_id,
        contracted_lesson_id: match selection {
            Selection::Add { contracted_lesson_id, .. }
            | Selection::Move { contracted_lesson_id, .. } => contracted_lesson_id.clone(),
            Selection::Idle => None,
        },
        evict_lesson_id: Some(evict_lesson_id.to_string()),
    };
    Ok(match selection {
        Selection::Move { lesson_id, .. } => PlannerAction::Move {
            lesson_id: lesson_id.clone(),
            request,
        },
        _ => PlannerAction::Place(request),
    })
}
