use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::engine::grade::Grade;
use crate::engine::protocol::PlacementRequest;
use crate::engine::snapshot::{
    AssignmentGroup, CellKey, ContractedUnit, LessonInfo, LessonStatus, PeriodInfo,
    PlannerSnapshot, RegularPoolEntry, ShiftKey, SpecialPeriodPool, StudentInfo, TeacherInfo,
    UnassignedPool,
};

/// A store rejection that surfaces to the shell verbatim. `code` is stable;
/// `message` is for humans.
#[derive(Debug, Clone)]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        StoreError {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::new("db_error", e.to_string())
    }
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::new("db_error", format!("bad stored date {}: {}", s, e)))
}

fn parse_grade(s: &str) -> Result<Grade, StoreError> {
    s.parse()
        .map_err(|_| StoreError::new("db_error", format!("bad stored grade: {}", s)))
}

/// Build the full planner snapshot for one planning period. Read-only; the
/// pool quantities are derived here (requested minus placed) and never
/// stored.
pub fn load_snapshot(conn: &Connection, period_id: &str) -> Result<PlannerSnapshot, StoreError> {
    let period = conn
        .query_row(
            "SELECT id, name, start_date, end_date FROM planning_periods WHERE id = ?",
            [period_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::new("not_found", format!("no planning period {}", period_id)))?;
    let period = PeriodInfo {
        id: period.0,
        name: period.1,
        start_date: parse_date(&period.2)?,
        end_date: parse_date(&period.3)?,
    };
    let start = iso(period.start_date);
    let end = iso(period.end_date);

    let mut teachers = Vec::new();
    {
        let mut stmt =
            conn.prepare("SELECT id, name, display_name FROM teachers ORDER BY name, id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            teachers.push(TeacherInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                display_name: row.get(2)?,
                subject_ids: Vec::new(),
            });
        }
    }
    {
        let mut stmt = conn.prepare(
            "SELECT teacher_id, subject_id FROM teacher_subjects ORDER BY teacher_id, subject_id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let teacher_id: String = row.get(0)?;
            let subject_id: String = row.get(1)?;
            if let Some(t) = teachers.iter_mut().find(|t| t.id == teacher_id) {
                t.subject_ids.push(subject_id);
            }
        }
    }

    let mut students = Vec::new();
    {
        let mut stmt = conn.prepare("SELECT id, name, kana, display_name, grade FROM students")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let grade: String = row.get(4)?;
            students.push((
                StudentInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    display_name: row.get(3)?,
                    grade: parse_grade(&grade)?,
                },
                row.get::<_, String>(2)?,
            ));
        }
    }
    // House order: exam-year grades first, kana as tiebreak.
    students.sort_by(|(a, a_kana), (b, b_kana)| {
        a.grade
            .sort_rank()
            .cmp(&b.grade.sort_rank())
            .then_with(|| a_kana.cmp(b_kana))
            .then_with(|| a.id.cmp(&b.id))
    });
    let sorted_students: Vec<StudentInfo> = students.into_iter().map(|(s, _)| s).collect();

    let mut shifts = BTreeSet::new();
    {
        let mut stmt = conn.prepare(
            "SELECT date, teacher_id, time_slot_id FROM shifts WHERE date BETWEEN ? AND ?",
        )?;
        let mut rows = stmt.query([&start, &end])?;
        while let Some(row) = rows.next()? {
            let date: String = row.get(0)?;
            shifts.insert(ShiftKey {
                date: parse_date(&date)?,
                teacher_id: row.get(1)?,
                slot: row.get::<_, i64>(2)? as u8,
            });
        }
    }

    let mut assignments: BTreeMap<CellKey, Vec<AssignmentGroup>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT a.date, a.time_slot_id, a.teacher_id, t.display_name,
                    l.id, l.student_id, s.display_name, l.subject_id, sub.display_name,
                    l.status, l.contracted_lesson_id
             FROM assignments a
             JOIN lessons l ON l.assignment_id = a.id
             JOIN teachers t ON t.id = a.teacher_id
             JOIN students s ON s.id = l.student_id
             JOIN subjects sub ON sub.id = l.subject_id
             WHERE a.date BETWEEN ? AND ?
             ORDER BY a.date, a.time_slot_id, t.name, l.rowid",
        )?;
        let mut rows = stmt.query([&start, &end])?;
        while let Some(row) = rows.next()? {
            let date: String = row.get(0)?;
            let cell = CellKey::new(parse_date(&date)?, row.get::<_, i64>(1)? as u8);
            let teacher_id: String = row.get(2)?;
            let status: String = row.get(9)?;
            let lesson = LessonInfo {
                id: row.get(4)?,
                student_id: row.get(5)?,
                student_name: row.get(6)?,
                subject_id: row.get(7)?,
                subject_name: row.get(8)?,
                status: status
                    .parse()
                    .map_err(|e: String| StoreError::new("db_error", e))?,
                contracted_lesson_id: row.get(10)?,
            };
            let groups = assignments.entry(cell).or_default();
            match groups.iter_mut().find(|g| g.teacher_id == teacher_id) {
                Some(group) => group.lessons.push(lesson),
                None => groups.push(AssignmentGroup {
                    teacher_id,
                    teacher_name: row.get(3)?,
                    lessons: vec![lesson],
                }),
            }
        }
    }

    let mut regular = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT r.student_id, s.display_name, s.grade, s.kana,
                    r.subject_id, sub.display_name, r.requested_lessons,
                    (SELECT COUNT(*) FROM lessons l WHERE l.request_id = r.id)
             FROM student_requests r
             JOIN students s ON s.id = r.student_id
             JOIN subjects sub ON sub.id = r.subject_id
             WHERE r.period_id = ?",
        )?;
        let mut rows = stmt.query([period_id])?;
        while let Some(row) = rows.next()? {
            let requested: i64 = row.get(6)?;
            let placed: i64 = row.get(7)?;
            let remaining = requested - placed;
            if remaining <= 0 {
                continue;
            }
            let grade: String = row.get(2)?;
            regular.push((
                RegularPoolEntry {
                    student_id: row.get(0)?,
                    student_name: row.get(1)?,
                    student_grade: parse_grade(&grade)?,
                    subject_id: row.get(4)?,
                    subject_name: row.get(5)?,
                    count: remaining as u32,
                },
                row.get::<_, String>(3)?,
            ));
        }
    }
    regular.sort_by(|(a, a_kana), (b, b_kana)| {
        a.student_grade
            .sort_rank()
            .cmp(&b.student_grade.sort_rank())
            .then_with(|| a_kana.cmp(b_kana))
            .then_with(|| a.subject_id.cmp(&b.subject_id))
    });
    let regular: Vec<RegularPoolEntry> = regular.into_iter().map(|(e, _)| e).collect();

    let mut special = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, name FROM special_periods WHERE period_id = ? ORDER BY name, id",
        )?;
        let mut rows = stmt.query([period_id])?;
        while let Some(row) = rows.next()? {
            special.push(SpecialPeriodPool {
                id: row.get(0)?,
                name: row.get(1)?,
                units: Vec::new(),
            });
        }
    }
    {
        let mut stmt = conn.prepare(
            "SELECT c.special_period_id, c.id, c.student_id, s.display_name, s.grade,
                    c.subject_id, sub.display_name
             FROM contracted_lessons c
             JOIN students s ON s.id = c.student_id
             JOIN subjects sub ON sub.id = c.subject_id
             WHERE c.placed = 0
             ORDER BY s.kana, c.rowid",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let pool_id: String = row.get(0)?;
            let grade: String = row.get(4)?;
            let unit = ContractedUnit {
                id: row.get(1)?,
                student_id: row.get(2)?,
                student_name: row.get(3)?,
                student_grade: parse_grade(&grade)?,
                subject_id: row.get(5)?,
                subject_name: row.get(6)?,
            };
            if let Some(pool) = special.iter_mut().find(|p| p.id == pool_id) {
                pool.units.push(unit);
            }
        }
    }

    Ok(PlannerSnapshot {
        period,
        teachers,
        sorted_students,
        shifts,
        assignments,
        unassigned: UnassignedPool { regular, special },
    })
}

fn lesson_count(
    conn: &Connection,
    assignment_id: &str,
    excluding: Option<&str>,
) -> Result<i64, StoreError> {
    let n = match excluding {
        Some(lesson_id) => conn.query_row(
            "SELECT COUNT(*) FROM lessons WHERE assignment_id = ? AND id != ?",
            params![assignment_id, lesson_id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM lessons WHERE assignment_id = ?",
            [assignment_id],
            |row| row.get(0),
        )?,
    };
    Ok(n)
}

fn find_assignment(
    conn: &Connection,
    cell: CellKey,
    teacher_id: &str,
) -> Result<Option<String>, StoreError> {
    let id = conn
        .query_row(
            "SELECT id FROM assignments WHERE date = ? AND time_slot_id = ? AND teacher_id = ?",
            params![iso(cell.date), cell.slot as i64, teacher_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn find_or_create_assignment(
    conn: &Connection,
    cell: CellKey,
    teacher_id: &str,
) -> Result<String, StoreError> {
    if let Some(id) = find_assignment(conn, cell, teacher_id)? {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, date, time_slot_id, teacher_id) VALUES(?, ?, ?, ?)",
        params![id, iso(cell.date), cell.slot as i64, teacher_id],
    )?;
    Ok(id)
}

fn drop_assignment_if_empty(conn: &Connection, assignment_id: &str) -> Result<(), StoreError> {
    if lesson_count(conn, assignment_id, None)? == 0 {
        conn.execute("DELETE FROM assignments WHERE id = ?", [assignment_id])?;
    }
    Ok(())
}

/// Remove an evictee inside a running placement transaction. Locked lessons
/// refuse eviction.
fn evict(conn: &Connection, lesson_id: &str) -> Result<(), StoreError> {
    let row = conn
        .query_row(
            "SELECT status, assignment_id, contracted_lesson_id FROM lessons WHERE id = ?",
            [lesson_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::new("bad_evict", format!("no lesson {}", lesson_id)))?;
    if row.0 == "locked" {
        return Err(StoreError::new(
            "lesson_locked",
            "a locked lesson cannot be evicted",
        ));
    }
    conn.execute("DELETE FROM lessons WHERE id = ?", [lesson_id])?;
    if let Some(unit_id) = row.2 {
        conn.execute(
            "UPDATE contracted_lessons SET placed = 0 WHERE id = ?",
            [unit_id],
        )?;
    }
    drop_assignment_if_empty(conn, &row.1)?;
    Ok(())
}

/// Consume one unit of quota for the new lesson; returns the request id for
/// regular units.
fn consume_quota(
    conn: &Connection,
    period_id: &str,
    req: &PlacementRequest,
) -> Result<Option<String>, StoreError> {
    match &req.contracted_lesson_id {
        Some(unit_id) => {
            let row: Option<(String, String, i64)> = conn
                .query_row(
                    "SELECT student_id, subject_id, placed FROM contracted_lessons WHERE id = ?",
                    [unit_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            match row {
                None => Err(StoreError::new(
                    "no_request",
                    format!("no contracted unit {}", unit_id),
                )),
                // A unit only ever pays for its own (student, subject).
                Some((student, subject, _))
                    if student != req.student_id || subject != req.subject_id =>
                {
                    Err(StoreError::new(
                        "no_request",
                        "contracted unit belongs to a different student or subject",
                    ))
                }
                Some((_, _, p)) if p != 0 => Err(StoreError::new(
                    "quota_exhausted",
                    "contracted unit already placed",
                )),
                Some(_) => {
                    conn.execute(
                        "UPDATE contracted_lessons SET placed = 1 WHERE id = ?",
                        [unit_id],
                    )?;
                    Ok(None)
                }
            }
        }
        None => {
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT id, requested_lessons FROM student_requests
                     WHERE period_id = ? AND student_id = ? AND subject_id = ?",
                    params![period_id, req.student_id, req.subject_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (request_id, requested) = row.ok_or_else(|| {
                StoreError::new(
                    "no_request",
                    format!(
                        "student {} has no request for subject {}",
                        req.student_id, req.subject_id
                    ),
                )
            })?;
            let placed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM lessons WHERE request_id = ?",
                [&request_id],
                |row| row.get(0),
            )?;
            if placed >= requested {
                return Err(StoreError::new(
                    "quota_exhausted",
                    "all requested lessons are already placed",
                ));
            }
            Ok(Some(request_id))
        }
    }
}

/// Place a new lesson. Eviction (when requested), the capacity re-check and
/// the quota debit happen in one transaction; a rejection leaves nothing
/// behind.
pub fn place_lesson(
    conn: &Connection,
    period_id: &str,
    req: &PlacementRequest,
) -> Result<String, StoreError> {
    let tx = conn.unchecked_transaction()?;
    if let Some(evictee) = &req.evict_lesson_id {
        evict(&tx, evictee)?;
    }
    let request_id = consume_quota(&tx, period_id, req)?;
    let assignment_id = find_or_create_assignment(&tx, req.cell, &req.teacher_id)?;
    if lesson_count(&tx, &assignment_id, None)? >= 2 {
        return Err(StoreError::new("slot_full", "the destination cell is full"));
    }
    let lesson_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO lessons(id, assignment_id, student_id, subject_id,
                             request_id, contracted_lesson_id, status, origin)
         VALUES(?, ?, ?, ?, ?, ?, 'normal', 'manual')",
        params![
            lesson_id,
            assignment_id,
            req.student_id,
            req.subject_id,
            request_id,
            req.contracted_lesson_id,
        ],
    )?;
    tx.commit()?;
    Ok(lesson_id)
}

/// Relocate an existing lesson. The moved lesson never counts against its
/// own destination, so a same-cell move commits as a no-op; lock status
/// rides along unchanged.
pub fn move_lesson(
    conn: &Connection,
    lesson_id: &str,
    req: &PlacementRequest,
) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    let old_assignment: Option<String> = tx
        .query_row(
            "SELECT assignment_id FROM lessons WHERE id = ?",
            [lesson_id],
            |row| row.get(0),
        )
        .optional()?;
    let old_assignment = old_assignment
        .ok_or_else(|| StoreError::new("not_found", format!("no lesson {}", lesson_id)))?;
    if let Some(evictee) = &req.evict_lesson_id {
        if evictee == lesson_id {
            return Err(StoreError::new("bad_evict", "a lesson cannot evict itself"));
        }
        evict(&tx, evictee)?;
    }
    let assignment_id = find_or_create_assignment(&tx, req.cell, &req.teacher_id)?;
    if lesson_count(&tx, &assignment_id, Some(lesson_id))? >= 2 {
        return Err(StoreError::new("slot_full", "the destination cell is full"));
    }
    tx.execute(
        "UPDATE lessons SET assignment_id = ? WHERE id = ?",
        params![assignment_id, lesson_id],
    )?;
    if old_assignment != assignment_id {
        drop_assignment_if_empty(&tx, &old_assignment)?;
    }
    tx.commit()?;
    Ok(())
}

/// Delete a lesson, dropping its assignment when it was the last one and
/// releasing a contracted unit back to its pool.
pub fn delete_lesson(conn: &Connection, lesson_id: &str) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    let row = tx
        .query_row(
            "SELECT assignment_id, contracted_lesson_id FROM lessons WHERE id = ?",
            [lesson_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::new("not_found", format!("no lesson {}", lesson_id)))?;
    tx.execute("DELETE FROM lessons WHERE id = ?", [lesson_id])?;
    if let Some(unit_id) = row.1 {
        tx.execute(
            "UPDATE contracted_lessons SET placed = 0 WHERE id = ?",
            [unit_id],
        )?;
    }
    drop_assignment_if_empty(&tx, &row.0)?;
    tx.commit()?;
    Ok(())
}

/// Flip normal <-> locked; returns the new status.
pub fn toggle_lock(conn: &Connection, lesson_id: &str) -> Result<LessonStatus, StoreError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM lessons WHERE id = ?",
            [lesson_id],
            |row| row.get(0),
        )
        .optional()?;
    let status =
        status.ok_or_else(|| StoreError::new("not_found", format!("no lesson {}", lesson_id)))?;
    let next = if status == "locked" {
        LessonStatus::Normal
    } else {
        LessonStatus::Locked
    };
    conn.execute(
        "UPDATE lessons SET status = ? WHERE id = ?",
        params![next.code(), lesson_id],
    )?;
    Ok(next)
}
