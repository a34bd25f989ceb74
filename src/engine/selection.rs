use serde::Serialize;

use super::snapshot::PlannerSnapshot;

/// What the operator is holding: a unit out of the pool, or a placed lesson
/// being relocated. The fields are the logical identity used to restore the
/// selection across a snapshot refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Selection {
    Idle,
    #[serde(rename_all = "camelCase")]
    Add {
        student_id: String,
        subject_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        contracted_lesson_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Move {
        lesson_id: String,
        student_id: String,
        subject_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        contracted_lesson_id: Option<String>,
    },
}

impl Selection {
    pub fn is_idle(&self) -> bool {
        matches!(self, Selection::Idle)
    }

    pub fn student_id(&self) -> Option<&str> {
        match self {
            Selection::Idle => None,
            Selection::Add { student_id, .. } | Selection::Move { student_id, .. } => {
                Some(student_id)
            }
        }
    }

    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Selection::Idle => None,
            Selection::Add { subject_id, .. } | Selection::Move { subject_id, .. } => {
                Some(subject_id)
            }
        }
    }

    /// Clicking the already-held unit or lesson releases it.
    pub fn toggles_off(&self, next: &Selection) -> bool {
        !self.is_idle() && self == next
    }

    /// Re-resolve the logical selection against a fresh snapshot. An Add
    /// survives while the pool still offers the unit; a Move survives while
    /// the lesson id still exists. Anything else collapses to Idle.
    pub fn restore_against(&self, snapshot: &PlannerSnapshot) -> Selection {
        match self {
            Selection::Idle => Selection::Idle,
            Selection::Add {
                student_id,
                subject_id,
                contracted_lesson_id,
            } => {
                let alive = match contracted_lesson_id {
                    Some(unit_id) => snapshot.contracted_unit(unit_id).is_some(),
                    None => snapshot.regular_remaining(student_id, subject_id) > 0,
                };
                if alive {
                    self.clone()
                } else {
                    Selection::Idle
                }
            }
            Selection::Move { lesson_id, .. } => {
                if snapshot.find_lesson(lesson_id).is_some() {
                    self.clone()
                } else {
                    Selection::Idle
                }
            }
        }
    }
}
