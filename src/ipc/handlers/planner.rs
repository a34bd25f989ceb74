use crate::engine::grade::GradeFilter;
use crate::engine::protocol::PlannerAction;
use crate::engine::session::PlannerSession;
use crate::engine::slots;
use crate::engine::snapshot::CellKey;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::scheduler::{self, AutoAssignOptions, RuleStrength};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

fn parse_string_array(v: Option<&JsonValue>, key: &str) -> Result<Vec<String>, String> {
    let Some(raw) = v else {
        return Err(format!("missing {}", key));
    };
    let arr = raw
        .as_array()
        .ok_or_else(|| format!("{} must be array of strings", key))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be array of strings", key))?
            .trim()
            .to_string();
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    Ok(out)
}

fn parse_cell(req: &Request) -> Result<CellKey, serde_json::Value> {
    let date = required_str(req, "date")?;
    let date = chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| err(&req.id, "bad_params", "date must be YYYY-MM-DD", None))?;
    let slot = req
        .params
        .get("slot")
        .and_then(|v| v.as_u64())
        .filter(|s| slots::is_valid_slot(*s))
        .ok_or_else(|| err(&req.id, "bad_params", "slot must be 1-11", None))?;
    Ok(CellKey::new(date, slot as u8))
}

/// Split borrows: store calls and session mutation happen side by side.
fn parts<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<(&'a Connection, &'a mut PlannerSession), serde_json::Value> {
    let AppState { db, planner, .. } = state;
    let conn = db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))?;
    let session = planner
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_session", "open a planner session first", None))?;
    Ok((conn, session))
}

/// Every state-bearing response carries the full interaction state so the
/// shell renders without recomputing any engine logic.
fn state_view(session: &PlannerSession) -> JsonValue {
    json!({
        "period": session.snapshot.period,
        "timeSlots": slots::TIME_SLOTS,
        "teachers": session.snapshot.teachers,
        "sortedStudents": session.snapshot.sorted_students,
        "shifts": session.snapshot.shifts,
        "assignments": session.snapshot.assignments,
        "pool": {
            "regular": session.visible_regular_pool(),
            "special": session.visible_special_pools(),
        },
        "selection": session.selection,
        "pendingSwap": session.pending_swap,
        "focusedStudentId": session.focused_student,
        "lockMode": session.lock_mode,
        "activeTeacherIds": session.filter.active_teachers,
        "gradeFilter": session.filter.grade_filter.code(),
        "cellMarks": session.cell_marks(),
        "violations": session.violations(),
    })
}

fn state_ok(req: &Request, session: &PlannerSession) -> serde_json::Value {
    ok(&req.id, json!({ "state": state_view(session) }))
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let snapshot = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match store::load_snapshot(conn, &period_id) {
            Ok(s) => s,
            Err(e) => return err(&req.id, e.code, e.message, None),
        }
    };
    let session = PlannerSession::new(snapshot);
    let resp = state_ok(req, &session);
    state.planner = Some(session);
    resp
}

fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, session) = match parts(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let snapshot = match store::load_snapshot(conn, &session.snapshot.period.id) {
        Ok(s) => s,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    session.refresh(snapshot);
    state_ok(req, session)
}

fn handle_select_unit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let contracted = match parse_opt_string(req.params.get("contractedLessonId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("contractedLessonId {}", m), None),
    };
    match session.select_unit(&student_id, &subject_id, contracted) {
        Ok(()) => state_ok(req, session),
        Err(code) => err(&req.id, code, "cannot select that unit", None),
    }
}

fn handle_select_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.select_move(&lesson_id) {
        Ok(()) => state_ok(req, session),
        Err(code) => err(&req.id, code, "cannot pick up that lesson", None),
    }
}

fn handle_clear_selection(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    session.clear_selection();
    state_ok(req, session)
}

fn handle_focus_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    let student_id = match parse_opt_string(req.params.get("studentId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("studentId {}", m), None),
    };
    session.focus_student(student_id);
    state_ok(req, session)
}

fn handle_set_teacher_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    let ids = match parse_string_array(req.params.get("teacherIds"), "teacherIds") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    session.set_teacher_filter(ids);
    state_ok(req, session)
}

fn handle_set_grade_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    let raw = match required_str(req, "gradeFilter") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let filter: GradeFilter = match raw.parse() {
        Ok(f) => f,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    session.set_grade_filter(filter);
    state_ok(req, session)
}

fn handle_set_lock_mode(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    let enabled = match parse_bool(req.params.get("enabled"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("enabled {}", m), None),
    };
    match session.set_lock_mode(enabled) {
        Ok(()) => state_ok(req, session),
        Err(code) => err(
            &req.id,
            code,
            "lock mode needs exactly one active teacher",
            None,
        ),
    }
}

/// Run a committed Place/Move against the store; commit-then-refetch on
/// success, selection reset and stale snapshot on rejection.
fn run_action(
    conn: &Connection,
    session: &mut PlannerSession,
    req: &Request,
    action: PlannerAction,
) -> serde_json::Value {
    let period_id = session.snapshot.period.id.clone();
    let result = match &action {
        PlannerAction::Place(request) => {
            store::place_lesson(conn, &period_id, request).map(|_| ())
        }
        PlannerAction::Move { lesson_id, request } => {
            store::move_lesson(conn, lesson_id, request)
        }
    };
    if let Err(e) = result {
        session.commit_rejected();
        return err(&req.id, e.code, e.message, None);
    }
    match store::load_snapshot(conn, &period_id) {
        Ok(snapshot) => {
            session.completed_commit(snapshot);
            ok(
                &req.id,
                json!({ "outcome": "committed", "state": state_view(session) }),
            )
        }
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn click_response(
    conn: &Connection,
    session: &mut PlannerSession,
    req: &Request,
    cell: CellKey,
    chosen_teacher: Option<&str>,
) -> serde_json::Value {
    use crate::engine::protocol::ClickOutcome;
    match session.click_cell(cell, chosen_teacher) {
        ClickOutcome::Commit(action) => run_action(conn, session, req, action),
        ClickOutcome::NeedsTeacherChoice { teacher_ids } => ok(
            &req.id,
            json!({
                "outcome": "needsTeacherChoice",
                "teacherIds": teacher_ids,
                "state": state_view(session),
            }),
        ),
        ClickOutcome::NeedsEviction(swap) => ok(
            &req.id,
            json!({
                "outcome": "needsEviction",
                "pendingSwap": swap,
                "state": state_view(session),
            }),
        ),
        ClickOutcome::Refused { reason } => ok(
            &req.id,
            json!({
                "outcome": "refused",
                "reason": reason,
                "state": state_view(session),
            }),
        ),
    }
}

fn handle_click_cell(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cell = match parse_cell(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let (conn, session) = match parts(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    click_response(conn, session, req, cell, None)
}

fn handle_choose_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let cell = match parse_cell(req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (conn, session) = match parts(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    click_response(conn, session, req, cell, Some(&teacher_id))
}

fn handle_confirm_eviction(state: &mut AppState, req: &Request) -> serde_json::Value {
    let evictee = match required_str(req, "evictLessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (conn, session) = match parts(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match session.confirm_eviction(&evictee) {
        Ok(action) => run_action(conn, session, req, action),
        // The swap stays pending on a bad nomination; cancel is explicit.
        Err(code) => err(&req.id, code, "cannot evict that lesson", None),
    }
}

fn handle_cancel_swap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(session) = state.planner.as_mut() else {
        return err(&req.id, "no_session", "open a planner session first", None);
    };
    session.cancel_swap();
    state_ok(req, session)
}

fn handle_delete_lesson(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (conn, session) = match parts(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(e) = store::delete_lesson(conn, &lesson_id) {
        return err(&req.id, e.code, e.message, None);
    }
    match store::load_snapshot(conn, &session.snapshot.period.id) {
        Ok(snapshot) => {
            // Delete keeps the selection alive where it still resolves.
            session.refresh(snapshot);
            state_ok(req, session)
        }
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn handle_toggle_lock(state: &mut AppState, req: &Request) -> serde_json::Value {
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (conn, session) = match parts(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(code) = session.can_toggle_lock(&lesson_id) {
        return err(&req.id, code, "cannot toggle that lesson", None);
    }
    match store::toggle_lock(conn, &lesson_id) {
        Ok(status) => {
            session.apply_lock_result(&lesson_id, status);
            ok(
                &req.id,
                json!({ "status": status.code(), "state": state_view(session) }),
            )
        }
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

fn parse_auto_assign_options(req: &Request) -> Result<AutoAssignOptions, serde_json::Value> {
    let mut options = AutoAssignOptions::default();
    let interval_enabled = parse_bool(req.params.get("intervalRuleEnabled"), false)
        .map_err(|m| err(&req.id, "bad_params", format!("intervalRuleEnabled {}", m), None))?;
    if interval_enabled {
        let days = req
            .params
            .get("intervalDays")
            .and_then(|v| v.as_u64())
            .unwrap_or(3) as u32;
        let strength = match req.params.get("intervalStrength").and_then(|v| v.as_str()) {
            Some(raw) => raw
                .parse::<RuleStrength>()
                .map_err(|m| err(&req.id, "bad_params", m, None))?,
            None => RuleStrength::Normal,
        };
        options.interval_rule = Some((days, strength));
    }
    let preferred_enabled = parse_bool(req.params.get("preferredRuleEnabled"), false)
        .map_err(|m| err(&req.id, "bad_params", format!("preferredRuleEnabled {}", m), None))?;
    if preferred_enabled {
        let strength = match req.params.get("preferredStrength").and_then(|v| v.as_str()) {
            Some(raw) => raw
                .parse::<RuleStrength>()
                .map_err(|m| err(&req.id, "bad_params", m, None))?,
            None => RuleStrength::Normal,
        };
        options.preferred_rule = Some(strength);
    }
    Ok(options)
}

fn handle_auto_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let options = match parse_auto_assign_options(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (conn, session) = match parts(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let period_id = session.snapshot.period.id.clone();
    let summary = match scheduler::auto_assign(conn, &period_id, &options) {
        Ok(s) => s,
        Err(e) => return err(&req.id, e.code, e.message, None),
    };
    match store::load_snapshot(conn, &period_id) {
        Ok(snapshot) => {
            session.refresh(snapshot);
            ok(
                &req.id,
                json!({ "summary": summary, "state": state_view(session) }),
            )
        }
        Err(e) => err(&req.id, e.code, e.message, None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "planner.open" => Some(handle_open(state, req)),
        "planner.refresh" => Some(handle_refresh(state, req)),
        "planner.selectUnit" => Some(handle_select_unit(state, req)),
        "planner.selectMove" => Some(handle_select_move(state, req)),
        "planner.clearSelection" => Some(handle_clear_selection(state, req)),
        "planner.focusStudent" => Some(handle_focus_student(state, req)),
        "planner.setTeacherFilter" => Some(handle_set_teacher_filter(state, req)),
        "planner.setGradeFilter" => Some(handle_set_grade_filter(state, req)),
        "planner.setLockMode" => Some(handle_set_lock_mode(state, req)),
        "planner.clickCell" => Some(handle_click_cell(state, req)),
        "planner.chooseTeacher" => Some(handle_choose_teacher(state, req)),
        "planner.confirmEviction" => Some(handle_confirm_eviction(state, req)),
        "planner.cancelSwap" => Some(handle_cancel_swap(state, req)),
        "planner.deleteLesson" => Some(handle_delete_lesson(state, req)),
        "planner.toggleLock" => Some(handle_toggle_lock(state, req)),
        "planner.autoAssign" => Some(handle_auto_assign(state, req)),
        _ => None,
    }
}
