use std::collections::BTreeSet;

use super::grade::GradeFilter;

/// Which teachers' columns and which pool grades the operator is looking at.
/// Filters narrow what feasibility and the pool report; they never narrow
/// what the snapshot holds.
#[derive(Debug, Clone)]
pub struct FilterState {
    pub active_teachers: BTreeSet<String>,
    pub grade_filter: GradeFilter,
}

impl FilterState {
    /// All teachers visible, no grade narrowing.
    pub fn all_of(teacher_ids: impl IntoIterator<Item = String>) -> Self {
        FilterState {
            active_teachers: teacher_ids.into_iter().collect(),
            grade_filter: GradeFilter::All,
        }
    }

    pub fn is_active(&self, teacher_id: &str) -> bool {
        self.active_teachers.contains(teacher_id)
    }

    /// Lock mode and per-lesson detail both require this.
    pub fn single_active_teacher(&self) -> Option<&str> {
        if self.active_teachers.len() == 1 {
            self.active_teachers.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Replaces the active set. Unknown ids are kept verbatim; they simply
    /// match nothing until the roster catches up.
    pub fn set_active_teachers(&mut self, ids: impl IntoIterator<Item = String>) {
        self.active_teachers = ids.into_iter().collect();
    }
}
