use std::collections::BTreeMap;

use super::feasibility::{self, CellMark, CellViolation};
use super::filter::FilterState;
use super::grade::GradeFilter;
use super::protocol::{self, ClickOutcome, PendingSwap, PlannerAction};
use super::selection::Selection;
use super::snapshot::{
    CellKey, LessonStatus, PlannerSnapshot, RegularPoolEntry, SpecialPeriodPool,
};

/// One open planner editing session: the snapshot plus every piece of
/// interaction state layered over it. All methods are pure state
/// transitions; anything that must hit the store comes back as a
/// `PlannerAction` for the host to run, after which the host feeds the
/// result back in through `completed_commit` / `commit_rejected` /
/// `refresh`.
#[derive(Debug, Clone)]
pub struct PlannerSession {
    pub snapshot: PlannerSnapshot,
    pub filter: FilterState,
    pub selection: Selection,
    pub focused_student: Option<String>,
    pub lock_mode: bool,
    pub pending_swap: Option<PendingSwap>,
}

impl PlannerSession {
    pub fn new(snapshot: PlannerSnapshot) -> Self {
        let filter = FilterState::all_of(snapshot.teachers.iter().map(|t| t.id.clone()));
        PlannerSession {
            snapshot,
            filter,
            selection: Selection::Idle,
            focused_student: None,
            lock_mode: false,
            pending_swap: None,
        }
    }

    /// Pick a unit out of the pool. Re-picking the held unit releases it;
    /// picking a different one replaces it (the previous selection is
    /// dropped, never stacked).
    pub fn select_unit(
        &mut self,
        student_id: &str,
        subject_id: &str,
        contracted_lesson_id: Option<String>,
    ) -> Result<(), &'static str> {
        if self.lock_mode {
            return Err("lock_mode_active");
        }
        let available = match &contracted_lesson_id {
            // The unit must still be in the pool and belong to this
            // (student, subject).
            Some(unit_id) => self
                .snapshot
                .contracted_unit(unit_id)
                .map(|u| u.student_id == student_id && u.subject_id == subject_id)
                .unwrap_or(false),
            None => self.snapshot.regular_remaining(student_id, subject_id) > 0,
        };
        if !available {
            return Err("no_unit");
        }
        let next = Selection::Add {
            student_id: student_id.to_string(),
            subject_id: subject_id.to_string(),
            contracted_lesson_id,
        };
        self.pending_swap = None;
        if self.selection.toggles_off(&next) {
            self.selection = Selection::Idle;
        } else {
            self.selection = next;
        }
        Ok(())
    }

    /// Pick up a placed lesson for relocation. Locked lessons can be moved;
    /// lock only protects against eviction and auto-assign cleanup.
    pub fn select_move(&mut self, lesson_id: &str) -> Result<(), &'static str> {
        if self.lock_mode {
            return Err("lock_mode_active");
        }
        let (_, _, lesson) = self.snapshot.find_lesson(lesson_id).ok_or("not_found")?;
        let next = Selection::Move {
            lesson_id: lesson.id.clone(),
            student_id: lesson.student_id.clone(),
            subject_id: lesson.subject_id.clone(),
            contracted_lesson_id: lesson.contracted_lesson_id.clone(),
        };
        self.pending_swap = None;
        if self.selection.toggles_off(&next) {
            self.selection = Selection::Idle;
        } else {
            self.selection = next;
        }
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::Idle;
        self.pending_swap = None;
    }

    /// Toggle the focused student. Focus is orthogonal to selection.
    pub fn focus_student(&mut self, student_id: Option<String>) {
        self.focused_student = match (self.focused_student.take(), student_id) {
            (Some(prev), Some(next)) if prev == next => None,
            (_, next) => next,
        };
    }

    pub fn set_teacher_filter(&mut self, ids: impl IntoIterator<Item = String>) {
        self.filter.set_active_teachers(ids);
        // Lock mode cannot outlive its single-teacher precondition.
        if self.lock_mode && self.filter.single_active_teacher().is_none() {
            self.lock_mode = false;
        }
    }

    pub fn set_grade_filter(&mut self, filter: GradeFilter) {
        self.filter.grade_filter = filter;
    }

    /// Lock mode is only offered with exactly one active teacher; entering
    /// it drops whatever was being placed.
    pub fn set_lock_mode(&mut self, on: bool) -> Result<(), &'static str> {
        if on {
            if self.filter.single_active_teacher().is_none() {
                return Err("lock_mode_unavailable");
            }
            self.selection = Selection::Idle;
            self.pending_swap = None;
        }
        self.lock_mode = on;
        Ok(())
    }

    pub fn click_cell(&mut self, cell: CellKey, chosen_teacher: Option<&str>) -> ClickOutcome {
        if self.lock_mode {
            return ClickOutcome::Refused { reason: "lock_mode_active" };
        }
        if self.pending_swap.is_some() {
            return ClickOutcome::Refused { reason: "swap_pending" };
        }
        let outcome = protocol::resolve_cell_click(
            &self.snapshot,
            &self.filter,
            &self.selection,
            cell,
            chosen_teacher,
        );
        if let ClickOutcome::NeedsEviction(swap) = &outcome {
            self.pending_swap = Some(swap.clone());
        }
        outcome
    }

    /// Operator nominated the evictee. A bad nomination keeps the swap
    /// pending so another candidate can be picked.
    pub fn confirm_eviction(&mut self, evict_lesson_id: &str) -> Result<PlannerAction, &'static str> {
        let swap = self.pending_swap.as_ref().ok_or("no_pending_swap")?;
        let action = protocol::resolve_eviction(swap, &self.selection, evict_lesson_id)?;
        self.pending_swap = None;
        Ok(action)
    }

    /// Purely local: no store call, snapshot and selection untouched.
    pub fn cancel_swap(&mut self) {
        self.pending_swap = None;
    }

    /// A Place or Move went through and the host refetched. Commit always
    /// releases the selection.
    pub fn completed_commit(&mut self, snapshot: PlannerSnapshot) {
        self.snapshot = snapshot;
        self.selection = Selection::Idle;
        self.pending_swap = None;
        self.retain_focus();
    }

    /// The store rejected the mutation. The stale snapshot stays as-is (the
    /// next refresh reconciles); the selection is released so the operator
    /// starts over from a clean slate.
    pub fn commit_rejected(&mut self) {
        self.selection = Selection::Idle;
        self.pending_swap = None;
    }

    /// Delete and explicit refresh: adopt the new snapshot and restore the
    /// selection by identity where it still resolves.
    pub fn refresh(&mut self, snapshot: PlannerSnapshot) {
        self.snapshot = snapshot;
        self.selection = self.selection.restore_against(&self.snapshot);
        self.pending_swap = None;
        self.retain_focus();
    }

    fn retain_focus(&mut self) {
        if let Some(id) = &self.focused_student {
            if !self.snapshot.sorted_students.iter().any(|s| &s.id == id) {
                self.focused_student = None;
            }
        }
    }

    /// Gate for ToggleLock: lock mode on, lesson present, and belonging to
    /// the single active teacher.
    pub fn can_toggle_lock(&self, lesson_id: &str) -> Result<(), &'static str> {
        if !self.lock_mode {
            return Err("lock_mode_off");
        }
        let teacher = self.filter.single_active_teacher().ok_or("lock_mode_unavailable")?;
        let (_, group, _) = self.snapshot.find_lesson(lesson_id).ok_or("not_found")?;
        if group.teacher_id != teacher {
            return Err("wrong_teacher");
        }
        Ok(())
    }

    /// The one optimistic patch: the store confirmed the flip, update the
    /// snapshot in place instead of refetching.
    pub fn apply_lock_result(&mut self, lesson_id: &str, status: LessonStatus) -> bool {
        self.snapshot.set_lesson_status(lesson_id, status)
    }

    pub fn cell_marks(&self) -> BTreeMap<CellKey, CellMark> {
        feasibility::cell_marks(&self.snapshot, &self.filter, !self.selection.is_idle())
    }

    pub fn violations(&self) -> BTreeMap<CellKey, CellViolation> {
        feasibility::scan_violations(&self.snapshot)
    }

    /// The regular pool narrowed by the grade filter. Quantities are taken
    /// from the snapshot verbatim; filtering never recomputes them.
    pub fn visible_regular_pool(&self) -> Vec<&RegularPoolEntry> {
        self.snapshot
            .unassigned
            .regular
            .iter()
            .filter(|e| self.filter.grade_filter.matches(e.student_grade))
            .collect()
    }

    pub fn visible_special_pools(&self) -> Vec<SpecialPeriodPool> {
        self.snapshot
            .unassigned
            .special
            .iter()
            .map(|pool| SpecialPeriodPool {
                id: pool.id.clone(),
                name: pool.name.clone(),
                units: pool
                    .units
                    .iter()
                    .filter(|u| self.filter.grade_filter.matches(u.student_grade))
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::grade::Grade;
    use crate::engine::snapshot::{
        AssignmentGroup, ContractedUnit, LessonInfo, PeriodInfo, ShiftKey, StudentInfo,
        TeacherInfo, UnassignedPool,
    };
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, BTreeSet};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()
    }

    fn teacher(id: &str) -> TeacherInfo {
        TeacherInfo {
            id: id.to_string(),
            name: id.to_string(),
            display_name: id.to_string(),
            subject_ids: vec![],
        }
    }

    fn student(id: &str, grade: Grade) -> StudentInfo {
        StudentInfo {
            id: id.to_string(),
            name: id.to_string(),
            display_name: id.to_string(),
            grade,
        }
    }

    fn pool_entry(student: &str, grade: Grade, subject: &str, count: u32) -> RegularPoolEntry {
        RegularPoolEntry {
            student_id: student.to_string(),
            student_name: student.to_string(),
            student_grade: grade,
            subject_id: subject.to_string(),
            subject_name: subject.to_string(),
            count,
        }
    }

    fn base_session() -> PlannerSession {
        let snapshot = PlannerSnapshot {
            period: PeriodInfo {
                id: "p1".to_string(),
                name: "Spring".to_string(),
                start_date: day(),
                end_date: day(),
            },
            teachers: vec![teacher("t1"), teacher("t2")],
            sorted_students: vec![student("s1", Grade::M3), student("s2", Grade::E2)],
            shifts: [ShiftKey {
                date: day(),
                teacher_id: "t1".to_string(),
                slot: 3,
            }]
            .into_iter()
            .collect::<BTreeSet<_>>(),
            assignments: BTreeMap::new(),
            unassigned: UnassignedPool {
                regular: vec![
                    pool_entry("s1", Grade::M3, "math", 2),
                    pool_entry("s2", Grade::E2, "eng", 1),
                ],
                special: vec![],
            },
        };
        PlannerSession::new(snapshot)
    }

    fn placed_lesson(session: &mut PlannerSession, id: &str, student: &str, status: LessonStatus) {
        let cell = CellKey::new(day(), 3);
        session
            .snapshot
            .assignments
            .entry(cell)
            .or_default()
            .push(AssignmentGroup {
                teacher_id: "t1".to_string(),
                teacher_name: "t1".to_string(),
                lessons: vec![LessonInfo {
                    id: id.to_string(),
                    student_id: student.to_string(),
                    student_name: student.to_string(),
                    subject_id: "math".to_string(),
                    subject_name: "Math".to_string(),
                    status,
                    contracted_lesson_id: None,
                }],
            });
    }

    #[test]
    fn select_toggle_and_replace() {
        let mut s = base_session();
        s.select_unit("s1", "math", None).unwrap();
        assert!(!s.selection.is_idle());
        // Picking a different unit replaces, never stacks.
        s.select_unit("s2", "eng", None).unwrap();
        assert_eq!(s.selection.student_id(), Some("s2"));
        // Re-picking the held unit releases it.
        s.select_unit("s2", "eng", None).unwrap();
        assert!(s.selection.is_idle());
        // Exhausted units are not selectable.
        assert_eq!(s.select_unit("s1", "physics", None), Err("no_unit"));
    }

    #[test]
    fn contracted_units_only_select_for_their_own_student_and_subject() {
        let mut s = base_session();
        s.snapshot.unassigned.special.push(SpecialPeriodPool {
            id: "sp1".to_string(),
            name: "Summer".to_string(),
            units: vec![ContractedUnit {
                id: "u1".to_string(),
                student_id: "s1".to_string(),
                student_name: "s1".to_string(),
                student_grade: Grade::M3,
                subject_id: "physics".to_string(),
                subject_name: "Physics".to_string(),
            }],
        });
        assert_eq!(
            s.select_unit("s1", "physics", Some("u1".to_string())),
            Ok(())
        );
        s.clear_selection();
        // Another student's identity, or another subject, cannot spend u1.
        assert_eq!(
            s.select_unit("s2", "physics", Some("u1".to_string())),
            Err("no_unit")
        );
        assert_eq!(
            s.select_unit("s1", "math", Some("u1".to_string())),
            Err("no_unit")
        );
    }

    #[test]
    fn lock_mode_requires_one_active_teacher_and_resets_selection() {
        let mut s = base_session();
        s.select_unit("s1", "math", None).unwrap();
        assert_eq!(s.set_lock_mode(true), Err("lock_mode_unavailable"));
        s.set_teacher_filter(["t1".to_string()]);
        s.set_lock_mode(true).unwrap();
        assert!(s.selection.is_idle());
        assert_eq!(s.select_unit("s1", "math", None), Err("lock_mode_active"));
        // Widening the filter drops lock mode.
        s.set_teacher_filter(["t1".to_string(), "t2".to_string()]);
        assert!(!s.lock_mode);
    }

    #[test]
    fn toggle_lock_gating() {
        let mut s = base_session();
        placed_lesson(&mut s, "l1", "s1", LessonStatus::Normal);
        assert_eq!(s.can_toggle_lock("l1"), Err("lock_mode_off"));
        s.set_teacher_filter(["t1".to_string()]);
        s.set_lock_mode(true).unwrap();
        assert_eq!(s.can_toggle_lock("l1"), Ok(()));
        assert_eq!(s.can_toggle_lock("nope"), Err("not_found"));
        assert!(s.apply_lock_result("l1", LessonStatus::Locked));
        let (_, _, lesson) = s.snapshot.find_lesson("l1").unwrap();
        assert_eq!(lesson.status, LessonStatus::Locked);
    }

    #[test]
    fn commit_resets_selection_refresh_restores_it() {
        let mut s = base_session();
        s.select_unit("s1", "math", None).unwrap();
        let fresh = s.snapshot.clone();
        s.completed_commit(fresh.clone());
        assert!(s.selection.is_idle());

        s.select_unit("s1", "math", None).unwrap();
        s.refresh(fresh.clone());
        assert_eq!(s.selection.student_id(), Some("s1"));

        // Once the pool no longer offers the unit, refresh clears it.
        let mut drained = fresh;
        drained.unassigned.regular.retain(|e| e.student_id != "s1");
        s.refresh(drained);
        assert!(s.selection.is_idle());
    }

    #[test]
    fn rejection_resets_selection_but_not_the_snapshot() {
        let mut s = base_session();
        s.select_unit("s1", "math", None).unwrap();
        let before = s.snapshot.unassigned.regular.len();
        s.commit_rejected();
        assert!(s.selection.is_idle());
        assert_eq!(s.snapshot.unassigned.regular.len(), before);
    }

    #[test]
    fn cancel_swap_is_purely_local() {
        let mut s = base_session();
        placed_lesson(&mut s, "l1", "sa", LessonStatus::Normal);
        // Second occupant fills the cell for t1.
        if let Some(groups) = s.snapshot.assignments.get_mut(&CellKey::new(day(), 3)) {
            groups[0].lessons.push(LessonInfo {
                id: "l2".to_string(),
                student_id: "sb".to_string(),
                student_name: "sb".to_string(),
                subject_id: "math".to_string(),
                subject_name: "Math".to_string(),
                status: LessonStatus::Normal,
                contracted_lesson_id: None,
            });
        }
        s.select_unit("s1", "math", None).unwrap();
        let out = s.click_cell(CellKey::new(day(), 3), None);
        assert!(matches!(out, ClickOutcome::NeedsEviction(_)));
        assert!(s.pending_swap.is_some());
        // A further click while the swap is pending is refused.
        assert_eq!(
            s.click_cell(CellKey::new(day(), 3), None),
            ClickOutcome::Refused { reason: "swap_pending" }
        );
        let selection_before = s.selection.clone();
        s.cancel_swap();
        assert!(s.pending_swap.is_none());
        assert_eq!(s.selection, selection_before);
    }

    #[test]
    fn focus_toggles_and_survives_refresh_only_while_known() {
        let mut s = base_session();
        s.focus_student(Some("s1".to_string()));
        assert_eq!(s.focused_student.as_deref(), Some("s1"));
        s.focus_student(Some("s1".to_string()));
        assert_eq!(s.focused_student, None);

        s.focus_student(Some("s2".to_string()));
        let mut fresh = s.snapshot.clone();
        fresh.sorted_students.retain(|st| st.id != "s2");
        s.refresh(fresh);
        assert_eq!(s.focused_student, None);
    }

    #[test]
    fn grade_filter_narrows_the_visible_pool() {
        let mut s = base_session();
        assert_eq!(s.visible_regular_pool().len(), 2);
        s.set_grade_filter(GradeFilter::Elementary);
        let pool = s.visible_regular_pool();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].student_id, "s2");
        s.set_grade_filter(GradeFilter::Exact(Grade::M3));
        assert_eq!(s.visible_regular_pool()[0].student_id, "s1");
    }
}
