use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStrength {
    Weak,
    Normal,
    Strong,
}

impl FromStr for RuleStrength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weak" => Ok(RuleStrength::Weak),
            "normal" => Ok(RuleStrength::Normal),
            "strong" => Ok(RuleStrength::Strong),
            other => Err(format!("unknown rule strength: {}", other)),
        }
    }
}

impl RuleStrength {
    fn interval_penalty(self) -> i64 {
        match self {
            RuleStrength::Weak => 10,
            RuleStrength::Normal => 60,
            RuleStrength::Strong => 1000,
        }
    }

    fn preferred_bonus(self) -> i64 {
        match self {
            RuleStrength::Weak => 20,
            RuleStrength::Normal => 100,
            RuleStrength::Strong => 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAssignOptions {
    /// Keep at least this many days between lessons of one (student,
    /// subject); shortfall is penalized by strength, spacing met earns a
    /// bonus.
    pub interval_rule: Option<(u32, RuleStrength)>,
    /// Bonus for placing a student with one of their preferred teachers.
    pub preferred_rule: Option<RuleStrength>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAssignSummary {
    pub removed: u32,
    pub placed: u32,
    pub unplaced: u32,
}

struct Candidate {
    date: NaiveDate,
    slot: u8,
    teacher_id: String,
}

struct PendingLesson {
    student_id: String,
    subject_id: String,
    request_id: String,
}

/// One greedy auto-assignment run over a planning period: remove the
/// previous run's unpinned output, then place each outstanding requested
/// lesson into its best-scoring feasible slot. Manual placements and locked
/// lessons always survive.
pub fn auto_assign(
    conn: &Connection,
    period_id: &str,
    options: &AutoAssignOptions,
) -> Result<AutoAssignSummary, StoreError> {
    let (start, end): (String, String) = conn
        .query_row(
            "SELECT start_date, end_date FROM planning_periods WHERE id = ?",
            [period_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| StoreError::new("not_found", format!("no planning period {}", period_id)))?;

    let tx = conn.unchecked_transaction()?;

    let removed = cleanup(&tx, &start, &end)?;
    let pending = outstanding_lessons(&tx, period_id)?;
    let candidates = load_candidates(&tx, &start, &end)?;
    let teacher_subjects = load_teacher_subjects(&tx)?;
    let high_subjects = load_high_subjects(&tx)?;
    let preferred = load_preferred_teachers(&tx)?;

    // Occupancy and per-student busy sets, seeded from what survived
    // cleanup and updated as lessons land.
    let mut group_counts: HashMap<(NaiveDate, u8, String), i64> = HashMap::new();
    let mut busy: HashSet<(NaiveDate, u8, String)> = HashSet::new();
    let mut last_placed: HashMap<(String, String), NaiveDate> = HashMap::new();
    seed_occupancy(&tx, &start, &end, &mut group_counts, &mut busy, &mut last_placed)?;

    let mut placed = 0u32;
    let mut unplaced = 0u32;
    for lesson in &pending {
        let mut best: Option<(&Candidate, i64)> = None;
        for cand in &candidates {
            if high_subjects.contains(&lesson.subject_id)
                && !teacher_subjects
                    .get(&cand.teacher_id)
                    .map(|subs| subs.contains(&lesson.subject_id))
                    .unwrap_or(false)
            {
                continue;
            }
            if busy.contains(&(cand.date, cand.slot, lesson.student_id.clone())) {
                continue;
            }
            let count = group_counts
                .get(&(cand.date, cand.slot, cand.teacher_id.clone()))
                .copied()
                .unwrap_or(0);
            if count >= 2 {
                continue;
            }
            let score = slot_score(options, &preferred, &last_placed, lesson, cand);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((cand, score));
            }
        }
        match best {
            Some((cand, _)) => {
                insert_auto_lesson(&tx, lesson, cand)?;
                *group_counts
                    .entry((cand.date, cand.slot, cand.teacher_id.clone()))
                    .or_insert(0) += 1;
                busy.insert((cand.date, cand.slot, lesson.student_id.clone()));
                last_placed.insert(
                    (lesson.student_id.clone(), lesson.subject_id.clone()),
                    cand.date,
                );
                placed += 1;
            }
            None => unplaced += 1,
        }
    }

    tx.commit()?;
    Ok(AutoAssignSummary {
        removed,
        placed,
        unplaced,
    })
}

fn cleanup(conn: &Connection, start: &str, end: &str) -> Result<u32, StoreError> {
    let removed = conn.execute(
        "DELETE FROM lessons WHERE origin = 'auto' AND status != 'locked'
         AND assignment_id IN (SELECT id FROM assignments WHERE date BETWEEN ? AND ?)",
        [start, end],
    )?;
    conn.execute(
        "DELETE FROM assignments WHERE date BETWEEN ? AND ?
         AND id NOT IN (SELECT assignment_id FROM lessons)",
        [start, end],
    )?;
    Ok(removed as u32)
}

fn outstanding_lessons(conn: &Connection, period_id: &str) -> Result<Vec<PendingLesson>, StoreError> {
    // Surviving lessons (manual and locked) count against the request; the
    // run only fills the remainder, high priority first.
    let mut stmt = conn.prepare(
        "SELECT r.id, r.student_id, r.subject_id, r.requested_lessons,
                (SELECT COUNT(*) FROM lessons l WHERE l.request_id = r.id)
         FROM student_requests r
         WHERE r.period_id = ?
         ORDER BY CASE r.priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END, r.id",
    )?;
    let mut rows = stmt.query([period_id])?;
    let mut pending = Vec::new();
    while let Some(row) = rows.next()? {
        let request_id: String = row.get(0)?;
        let student_id: String = row.get(1)?;
        let subject_id: String = row.get(2)?;
        let requested: i64 = row.get(3)?;
        let existing: i64 = row.get(4)?;
        for _ in existing..requested {
            pending.push(PendingLesson {
                student_id: student_id.clone(),
                subject_id: subject_id.clone(),
                request_id: request_id.clone(),
            });
        }
    }
    Ok(pending)
}

fn load_candidates(conn: &Connection, start: &str, end: &str) -> Result<Vec<Candidate>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT date, time_slot_id, teacher_id FROM shifts
         WHERE date BETWEEN ? AND ? ORDER BY date, time_slot_id, teacher_id",
    )?;
    let mut rows = stmt.query([start, end])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let date: String = row.get(0)?;
        out.push(Candidate {
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| StoreError::new("db_error", e.to_string()))?,
            slot: row.get::<_, i64>(1)? as u8,
            teacher_id: row.get(2)?,
        });
    }
    Ok(out)
}

fn load_teacher_subjects(conn: &Connection) -> Result<HashMap<String, HashSet<String>>, StoreError> {
    let mut stmt = conn.prepare("SELECT teacher_id, subject_id FROM teacher_subjects")?;
    let mut rows = stmt.query([])?;
    let mut out: HashMap<String, HashSet<String>> = HashMap::new();
    while let Some(row) = rows.next()? {
        out.entry(row.get(0)?).or_default().insert(row.get(1)?);
    }
    Ok(out)
}

fn load_high_subjects(conn: &Connection) -> Result<HashSet<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM subjects WHERE level = 'high'")?;
    let mut rows = stmt.query([])?;
    let mut out = HashSet::new();
    while let Some(row) = rows.next()? {
        out.insert(row.get(0)?);
    }
    Ok(out)
}

fn load_preferred_teachers(conn: &Connection) -> Result<HashMap<String, HashSet<String>>, StoreError> {
    let mut stmt = conn.prepare("SELECT student_id, teacher_id FROM student_preferred_teachers")?;
    let mut rows = stmt.query([])?;
    let mut out: HashMap<String, HashSet<String>> = HashMap::new();
    while let Some(row) = rows.next()? {
        out.entry(row.get(0)?).or_default().insert(row.get(1)?);
    }
    Ok(out)
}

fn seed_occupancy(
    conn: &Connection,
    start: &str,
    end: &str,
    group_counts: &mut HashMap<(NaiveDate, u8, String), i64>,
    busy: &mut HashSet<(NaiveDate, u8, String)>,
    last_placed: &mut HashMap<(String, String), NaiveDate>,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT a.date, a.time_slot_id, a.teacher_id, l.student_id, l.subject_id
         FROM assignments a JOIN lessons l ON l.assignment_id = a.id
         WHERE a.date BETWEEN ? AND ?",
    )?;
    let mut rows = stmt.query([start, end])?;
    while let Some(row) = rows.next()? {
        let date: String = row.get(0)?;
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| StoreError::new("db_error", e.to_string()))?;
        let slot = row.get::<_, i64>(1)? as u8;
        let teacher_id: String = row.get(2)?;
        let student_id: String = row.get(3)?;
        let subject_id: String = row.get(4)?;
        *group_counts.entry((date, slot, teacher_id)).or_insert(0) += 1;
        busy.insert((date, slot, student_id.clone()));
        let entry = last_placed.entry((student_id, subject_id)).or_insert(date);
        if date > *entry {
            *entry = date;
        }
    }
    Ok(())
}

fn slot_score(
    options: &AutoAssignOptions,
    preferred: &HashMap<String, HashSet<String>>,
    last_placed: &HashMap<(String, String), NaiveDate>,
    lesson: &PendingLesson,
    cand: &Candidate,
) -> i64 {
    let mut score = 100i64;
    if let Some((days, strength)) = options.interval_rule {
        if let Some(last) = last_placed.get(&(lesson.student_id.clone(), lesson.subject_id.clone()))
        {
            let interval = (cand.date - *last).num_days();
            if interval >= days as i64 {
                score += 50;
            } else {
                score -= strength.interval_penalty() * (days as i64 - interval);
            }
        }
    }
    if let Some(strength) = options.preferred_rule {
        let is_preferred = preferred
            .get(&lesson.student_id)
            .map(|ids| ids.contains(&cand.teacher_id))
            .unwrap_or(false);
        if is_preferred {
            score += strength.preferred_bonus();
        }
    }
    score
}

fn insert_auto_lesson(
    conn: &Connection,
    lesson: &PendingLesson,
    cand: &Candidate,
) -> Result<(), StoreError> {
    let date = cand.date.format("%Y-%m-%d").to_string();
    let assignment_id: Option<String> = conn
        .query_row(
            "SELECT id FROM assignments WHERE date = ? AND time_slot_id = ? AND teacher_id = ?",
            params![date, cand.slot as i64, cand.teacher_id],
            |row| row.get(0),
        )
        .optional()?;
    let assignment_id = match assignment_id {
        Some(id) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO assignments(id, date, time_slot_id, teacher_id) VALUES(?, ?, ?, ?)",
                params![id, date, cand.slot as i64, cand.teacher_id],
            )?;
            id
        }
    };
    conn.execute(
        "INSERT INTO lessons(id, assignment_id, student_id, subject_id,
                             request_id, contracted_lesson_id, status, origin)
         VALUES(?, ?, ?, ?, ?, NULL, 'normal', 'auto')",
        params![
            Uuid::new_v4().to_string(),
            assignment_id,
            lesson.student_id,
            lesson.subject_id,
            lesson.request_id,
        ],
    )?;
    Ok(())
}
