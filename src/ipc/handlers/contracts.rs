use crate::engine::slots;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn handle_requests_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<Vec<JsonValue>> {
        let mut stmt = conn.prepare(
            "SELECT id, student_id, subject_id, requested_lessons, priority
             FROM student_requests WHERE period_id = ? ORDER BY student_id, subject_id",
        )?;
        let mut rows = stmt.query([&period_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "subjectId": row.get::<_, String>(2)?,
                "requestedLessons": row.get::<_, i64>(3)?,
                "priority": row.get::<_, String>(4)?,
            }));
        }
        Ok(out)
    })();
    match result {
        Ok(requests) => ok(&req.id, json!({ "requests": requests })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

/// Upsert the regular quota sheet for one period. A zero count removes the
/// row; anything placed against it stays in the grid and simply stops
/// counting toward a pool entry.
fn handle_requests_batch_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(entries) = req.params.get("requests").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing requests array", None);
    };
    let result = (|| -> Result<usize, serde_json::Value> {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| err(&req.id, "db_error", e.to_string(), None))?;
        let mut changed = 0usize;
        for entry in entries {
            let student_id = entry.get("studentId").and_then(|v| v.as_str());
            let subject_id = entry.get("subjectId").and_then(|v| v.as_str());
            let requested = entry.get("requestedLessons").and_then(|v| v.as_i64());
            let (Some(student_id), Some(subject_id), Some(requested)) =
                (student_id, subject_id, requested)
            else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "each request needs studentId, subjectId, requestedLessons",
                    None,
                ));
            };
            if requested < 0 {
                return Err(err(&req.id, "bad_params", "requestedLessons must be >= 0", None));
            }
            let priority = entry
                .get("priority")
                .and_then(|v| v.as_str())
                .unwrap_or("medium");
            if !matches!(priority, "high" | "medium" | "low") {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "priority must be one of: high, medium, low",
                    None,
                ));
            }
            let run = || -> rusqlite::Result<()> {
                if requested == 0 {
                    tx.execute(
                        "DELETE FROM student_requests
                         WHERE period_id = ? AND student_id = ? AND subject_id = ?",
                        params![period_id, student_id, subject_id],
                    )?;
                    return Ok(());
                }
                let existing: Option<String> = tx
                    .query_row(
                        "SELECT id FROM student_requests
                         WHERE period_id = ? AND student_id = ? AND subject_id = ?",
                        params![period_id, student_id, subject_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(id) => {
                        tx.execute(
                            "UPDATE student_requests SET requested_lessons = ?, priority = ? WHERE id = ?",
                            params![requested, priority, id],
                        )?;
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO student_requests(id, period_id, student_id, subject_id, requested_lessons, priority)
                             VALUES(?, ?, ?, ?, ?, ?)",
                            params![
                                Uuid::new_v4().to_string(),
                                period_id,
                                student_id,
                                subject_id,
                                requested,
                                priority
                            ],
                        )?;
                    }
                }
                Ok(())
            };
            run().map_err(|e| err(&req.id, "db_error", e.to_string(), None))?;
            changed += 1;
        }
        tx.commit()
            .map_err(|e| err(&req.id, "db_error", e.to_string(), None))?;
        Ok(changed)
    })();
    match result {
        Ok(changed) => ok(&req.id, json!({ "updated": changed })),
        Err(resp) => resp,
    }
}

/// Create a special period with its contracted units in one shot. Each unit
/// is an individually tracked placement slot.
fn handle_contracts_create_special(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(units) = req.params.get("units").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing units array", None);
    };
    let special_id = Uuid::new_v4().to_string();
    let result = (|| -> Result<Vec<String>, serde_json::Value> {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| err(&req.id, "db_error", e.to_string(), None))?;
        tx.execute(
            "INSERT INTO special_periods(id, period_id, name) VALUES(?, ?, ?)",
            params![special_id, period_id, name],
        )
        .map_err(|e| err(&req.id, "db_error", e.to_string(), None))?;
        let mut unit_ids = Vec::new();
        for unit in units {
            let student_id = unit.get("studentId").and_then(|v| v.as_str());
            let subject_id = unit.get("subjectId").and_then(|v| v.as_str());
            let (Some(student_id), Some(subject_id)) = (student_id, subject_id) else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "each unit needs studentId and subjectId",
                    None,
                ));
            };
            let count = unit.get("count").and_then(|v| v.as_i64()).unwrap_or(1);
            if count < 1 {
                return Err(err(&req.id, "bad_params", "unit count must be >= 1", None));
            }
            for _ in 0..count {
                let unit_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO contracted_lessons(id, special_period_id, student_id, subject_id, placed)
                     VALUES(?, ?, ?, ?, 0)",
                    params![unit_id, special_id, student_id, subject_id],
                )
                .map_err(|e| err(&req.id, "db_error", e.to_string(), None))?;
                unit_ids.push(unit_id);
            }
        }
        tx.commit()
            .map_err(|e| err(&req.id, "db_error", e.to_string(), None))?;
        Ok(unit_ids)
    })();
    match result {
        Ok(unit_ids) => ok(
            &req.id,
            json!({ "specialPeriodId": special_id, "unitIds": unit_ids }),
        ),
        Err(resp) => resp,
    }
}

fn handle_shifts_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<Option<Vec<String>>> {
        let bounds: Option<(String, String)> = conn
            .query_row(
                "SELECT start_date, end_date FROM planning_periods WHERE id = ?",
                [&period_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((start, end)) = bounds else {
            return Ok(None);
        };
        let mut stmt = conn.prepare(
            "SELECT date, teacher_id, time_slot_id FROM shifts
             WHERE date BETWEEN ? AND ? ORDER BY date, teacher_id, time_slot_id",
        )?;
        let mut rows = stmt.query([&start, &end])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(format!(
                "{}-{}-{}",
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ));
        }
        Ok(Some(out))
    })();
    match result {
        Ok(Some(shifts)) => ok(&req.id, json!({ "shifts": shifts })),
        Ok(None) => err(&req.id, "not_found", format!("no planning period {}", period_id), None),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

/// Replace one teacher's availability for one date. The slot list given is
/// the whole truth for that day.
fn handle_shifts_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return err(&req.id, "bad_params", "date must be YYYY-MM-DD", None);
    }
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(slot_values) = req.params.get("slotIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing slotIds array", None);
    };
    let mut slot_ids = Vec::with_capacity(slot_values.len());
    for value in slot_values {
        let Some(slot) = value.as_u64().filter(|s| slots::is_valid_slot(*s)) else {
            return err(&req.id, "bad_params", "slotIds must be slot numbers 1-11", None);
        };
        slot_ids.push(slot as i64);
    }
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM shifts WHERE date = ? AND teacher_id = ?",
            params![date, teacher_id],
        )?;
        for slot in &slot_ids {
            tx.execute(
                "INSERT OR IGNORE INTO shifts(date, teacher_id, time_slot_id) VALUES(?, ?, ?)",
                params![date, teacher_id, slot],
            )?;
        }
        tx.commit()
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "saved": slot_ids.len() })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "requests.get" => Some(handle_requests_get(state, req)),
        "requests.batchUpdate" => Some(handle_requests_batch_update(state, req)),
        "contracts.createSpecial" => Some(handle_contracts_create_special(state, req)),
        "shifts.get" => Some(handle_shifts_get(state, req)),
        "shifts.save" => Some(handle_shifts_save(state, req)),
        _ => None,
    }
}
