use crate::engine::grade::{Grade, Level};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection};
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

fn parse_string_array(v: Option<&JsonValue>) -> Result<Vec<String>, &'static str> {
    match v {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => {
            let arr = v.as_array().ok_or("must be array of strings")?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or("must be array of strings")?
                    .trim()
                    .to_string();
                if !s.is_empty() {
                    out.push(s);
                }
            }
            Ok(out)
        }
    }
}

fn handle_periods_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let start_date = match required_str(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_date = match required_str(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    for (key, value) in [("startDate", &start_date), ("endDate", &end_date)] {
        if chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
            return err(&req.id, "bad_params", format!("{} must be YYYY-MM-DD", key), None);
        }
    }
    if end_date < start_date {
        return err(&req.id, "bad_params", "endDate before startDate", None);
    }
    let id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO planning_periods(id, name, start_date, end_date, status)
         VALUES(?, ?, ?, ?, 'planning')",
        params![id, name, start_date, end_date],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "periodId": id })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_periods_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<Vec<JsonValue>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, start_date, end_date, status
             FROM planning_periods ORDER BY start_date, name",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "startDate": row.get::<_, String>(2)?,
                "endDate": row.get::<_, String>(3)?,
                "status": row.get::<_, String>(4)?,
            }));
        }
        Ok(out)
    })();
    match result {
        Ok(periods) => ok(&req.id, json!({ "periods": periods })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let display_name = match parse_opt_string(req.params.get("displayName")) {
        Ok(v) => v.unwrap_or_else(|| name.clone()),
        Err(m) => return err(&req.id, "bad_params", format!("displayName {}", m), None),
    };
    let subject_ids = match parse_string_array(req.params.get("subjectIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("subjectIds {}", m), None),
    };
    let id = Uuid::new_v4().to_string();
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO teachers(id, name, display_name) VALUES(?, ?, ?)",
            params![id, name, display_name],
        )?;
        for subject_id in &subject_ids {
            tx.execute(
                "INSERT OR IGNORE INTO teacher_subjects(teacher_id, subject_id) VALUES(?, ?)",
                params![id, subject_id],
            )?;
        }
        tx.commit()
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "teacherId": id })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<Vec<JsonValue>> {
        let mut stmt =
            conn.prepare("SELECT id, name, display_name FROM teachers ORDER BY name, id")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let mut subj_stmt = conn.prepare(
                "SELECT subject_id FROM teacher_subjects WHERE teacher_id = ? ORDER BY subject_id",
            )?;
            let subject_ids = subj_stmt
                .query_map([&id], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            out.push(json!({
                "id": id,
                "name": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "subjectIds": subject_ids,
            }));
        }
        Ok(out)
    })();
    match result {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let name = match parse_opt_string(req.params.get("name")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("name {}", m), None),
    };
    let display_name = match parse_opt_string(req.params.get("displayName")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("displayName {}", m), None),
    };
    let result = (|| -> rusqlite::Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut changed = 0;
        if let Some(name) = &name {
            changed += tx.execute(
                "UPDATE teachers SET name = ? WHERE id = ?",
                params![name, teacher_id],
            )?;
        }
        if let Some(display_name) = &display_name {
            changed += tx.execute(
                "UPDATE teachers SET display_name = ? WHERE id = ?",
                params![display_name, teacher_id],
            )?;
        }
        if let Some(raw) = req.params.get("subjectIds") {
            if !raw.is_null() {
                let subject_ids = parse_string_array(Some(raw)).unwrap_or_default();
                tx.execute(
                    "DELETE FROM teacher_subjects WHERE teacher_id = ?",
                    [&teacher_id],
                )?;
                for subject_id in subject_ids {
                    tx.execute(
                        "INSERT OR IGNORE INTO teacher_subjects(teacher_id, subject_id) VALUES(?, ?)",
                        params![teacher_id, subject_id],
                    )?;
                }
                changed += 1;
            }
        }
        tx.commit()?;
        Ok(changed)
    })();
    match result {
        Ok(_) => ok(&req.id, json!({ "updated": true })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM teacher_subjects WHERE teacher_id = ?",
            [&teacher_id],
        )?;
        tx.execute(
            "DELETE FROM student_preferred_teachers WHERE teacher_id = ?",
            [&teacher_id],
        )?;
        tx.execute("DELETE FROM shifts WHERE teacher_id = ?", [&teacher_id])?;
        tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])?;
        tx.commit()
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let grade = match required_str(req, "grade") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if grade.parse::<Grade>().is_err() {
        return err(&req.id, "bad_params", format!("unknown grade: {}", grade), None);
    }
    let kana = match parse_opt_string(req.params.get("kana")) {
        Ok(v) => v.unwrap_or_default(),
        Err(m) => return err(&req.id, "bad_params", format!("kana {}", m), None),
    };
    let display_name = match parse_opt_string(req.params.get("displayName")) {
        Ok(v) => v.unwrap_or_else(|| name.clone()),
        Err(m) => return err(&req.id, "bad_params", format!("displayName {}", m), None),
    };
    let preferred = match parse_string_array(req.params.get("preferredTeacherIds")) {
        Ok(v) => v,
        Err(m) => {
            return err(&req.id, "bad_params", format!("preferredTeacherIds {}", m), None)
        }
    };
    let id = Uuid::new_v4().to_string();
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO students(id, name, kana, display_name, grade) VALUES(?, ?, ?, ?, ?)",
            params![id, name, kana, display_name, grade],
        )?;
        for teacher_id in &preferred {
            tx.execute(
                "INSERT OR IGNORE INTO student_preferred_teachers(student_id, teacher_id) VALUES(?, ?)",
                params![id, teacher_id],
            )?;
        }
        tx.commit()
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "studentId": id })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<Vec<JsonValue>> {
        let mut stmt = conn.prepare("SELECT id, name, kana, display_name, grade FROM students")?;
        let mut rows = stmt.query([])?;
        let mut students = Vec::new();
        while let Some(row) = rows.next()? {
            students.push((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ));
        }
        Ok(students
            .into_iter()
            .map(|(id, name, kana, display_name, grade)| {
                json!({
                    "id": id,
                    "name": name,
                    "kana": kana,
                    "displayName": display_name,
                    "grade": grade,
                })
            })
            .collect())
    })();
    match result {
        Ok(mut students) => {
            // House ordering: exam-year grades first, kana as tiebreak.
            students.sort_by_key(|s| {
                let rank = s["grade"]
                    .as_str()
                    .and_then(|g| g.parse::<Grade>().ok())
                    .map(|g| g.sort_rank())
                    .unwrap_or(usize::MAX);
                (rank, s["kana"].as_str().unwrap_or("").to_string())
            });
            ok(&req.id, json!({ "students": students }))
        }
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Some(grade) = req.params.get("grade").and_then(|v| v.as_str()) {
        if grade.parse::<Grade>().is_err() {
            return err(&req.id, "bad_params", format!("unknown grade: {}", grade), None);
        }
    }
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        for (key, column) in [
            ("name", "name"),
            ("kana", "kana"),
            ("displayName", "display_name"),
            ("grade", "grade"),
        ] {
            if let Some(value) = req.params.get(key).and_then(|v| v.as_str()) {
                tx.execute(
                    &format!("UPDATE students SET {} = ? WHERE id = ?", column),
                    params![value.trim(), student_id],
                )?;
            }
        }
        if let Some(raw) = req.params.get("preferredTeacherIds") {
            if !raw.is_null() {
                let ids = parse_string_array(Some(raw)).unwrap_or_default();
                tx.execute(
                    "DELETE FROM student_preferred_teachers WHERE student_id = ?",
                    [&student_id],
                )?;
                for teacher_id in ids {
                    tx.execute(
                        "INSERT OR IGNORE INTO student_preferred_teachers(student_id, teacher_id) VALUES(?, ?)",
                        params![student_id, teacher_id],
                    )?;
                }
            }
        }
        tx.commit()
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "updated": true })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM student_preferred_teachers WHERE student_id = ?",
            [&student_id],
        )?;
        tx.execute("DELETE FROM students WHERE id = ?", [&student_id])?;
        tx.commit()
    })();
    match result {
        Ok(()) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let level = match required_str(req, "level") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if level.parse::<Level>().is_err() {
        return err(&req.id, "bad_params", format!("unknown level: {}", level), None);
    }
    let display_name = match parse_opt_string(req.params.get("displayName")) {
        Ok(v) => v.unwrap_or_else(|| name.clone()),
        Err(m) => return err(&req.id, "bad_params", format!("displayName {}", m), None),
    };
    let id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO subjects(id, name, display_name, level) VALUES(?, ?, ?, ?)",
        params![id, name, display_name, level],
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "subjectId": id })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let result = (|| -> rusqlite::Result<Vec<JsonValue>> {
        let mut stmt =
            conn.prepare("SELECT id, name, display_name, level FROM subjects ORDER BY name, id")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "displayName": row.get::<_, String>(2)?,
                "level": row.get::<_, String>(3)?,
            }));
        }
        Ok(out)
    })();
    match result {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_error", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "periods.create" => Some(handle_periods_create(state, req)),
        "periods.list" => Some(handle_periods_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        _ => None,
    }
}
