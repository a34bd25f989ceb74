#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_planboardd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn planboardd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        }
    }

    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    /// Request that must succeed; returns `result`.
    pub fn ok(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            resp
        );
        resp.get("result").cloned().expect("result")
    }

    /// Request that must fail; returns the error code.
    pub fn err_code(&mut self, method: &str, params: Value) -> String {
        let resp = self.request(method, params);
        assert_eq!(
            resp.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            resp
        );
        resp["error"]["code"].as_str().expect("error code").to_string()
    }
}

/// Ids created by `setup_school`, the shared editing scenario.
pub struct School {
    pub period_id: String,
    pub tanaka: String,
    pub sato: String,
    pub aoki: String,
    pub baba: String,
    pub math: String,
    pub eng: String,
    pub phys: String,
}

/// Workspace with two teachers, two students, three subjects, one planning
/// week (2026-04-01..07), the usual requests and a small shift plan:
///   Tanaka: 04-01 slots 3,4,5 and 04-02 slot 3
///   Sato:   04-01 slot 3 and 04-02 slot 5
/// Cell (04-01, 3) is the only one where both are available.
pub fn setup_school(side: &mut Sidecar, workspace: &PathBuf) -> School {
    side.ok(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let math = create_subject(side, "Mathematics", "middle");
    let eng = create_subject(side, "English", "middle");
    let phys = create_subject(side, "Physics", "high");

    let tanaka = side.ok(
        "teachers.create",
        json!({ "name": "Tanaka", "subjectIds": [math, eng, phys] }),
    )["teacherId"]
        .as_str()
        .expect("teacherId")
        .to_string();
    let sato = side.ok(
        "teachers.create",
        json!({ "name": "Sato", "subjectIds": [math, eng] }),
    )["teacherId"]
        .as_str()
        .expect("teacherId")
        .to_string();

    let aoki = side.ok(
        "students.create",
        json!({
            "name": "Aoki",
            "kana": "aoki",
            "grade": "m3",
            "preferredTeacherIds": [tanaka]
        }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();
    let baba = side.ok(
        "students.create",
        json!({ "name": "Baba", "kana": "baba", "grade": "e2" }),
    )["studentId"]
        .as_str()
        .expect("studentId")
        .to_string();

    let period_id = side.ok(
        "periods.create",
        json!({
            "name": "Spring 2026",
            "startDate": "2026-04-01",
            "endDate": "2026-04-07"
        }),
    )["periodId"]
        .as_str()
        .expect("periodId")
        .to_string();

    side.ok(
        "requests.batchUpdate",
        json!({
            "periodId": period_id,
            "requests": [
                { "studentId": aoki, "subjectId": math, "requestedLessons": 3, "priority": "high" },
                { "studentId": aoki, "subjectId": eng, "requestedLessons": 2 },
                { "studentId": baba, "subjectId": math, "requestedLessons": 2 },
                { "studentId": baba, "subjectId": eng, "requestedLessons": 2, "priority": "low" },
            ]
        }),
    );

    side.ok(
        "shifts.save",
        json!({ "date": "2026-04-01", "teacherId": tanaka, "slotIds": [3, 4, 5] }),
    );
    side.ok(
        "shifts.save",
        json!({ "date": "2026-04-02", "teacherId": tanaka, "slotIds": [3] }),
    );
    side.ok(
        "shifts.save",
        json!({ "date": "2026-04-01", "teacherId": sato, "slotIds": [3] }),
    );
    side.ok(
        "shifts.save",
        json!({ "date": "2026-04-02", "teacherId": sato, "slotIds": [5] }),
    );

    School {
        period_id,
        tanaka,
        sato,
        aoki,
        baba,
        math,
        eng,
        phys,
    }
}

fn create_subject(side: &mut Sidecar, name: &str, level: &str) -> String {
    side.ok("subjects.create", json!({ "name": name, "level": level }))["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string()
}

/// Remaining pool count for one (student, subject); 0 when the entry is gone.
pub fn pool_count(state: &Value, student_id: &str, subject_id: &str) -> i64 {
    state["pool"]["regular"]
        .as_array()
        .expect("regular pool")
        .iter()
        .find(|e| e["studentId"] == student_id && e["subjectId"] == subject_id)
        .and_then(|e| e["count"].as_i64())
        .unwrap_or(0)
}

/// All lessons of one teacher in one cell, as (lessonId, studentId, status).
pub fn cell_lessons(state: &Value, cell: &str, teacher_id: &str) -> Vec<(String, String, String)> {
    state["assignments"][cell]
        .as_array()
        .map(|groups| {
            groups
                .iter()
                .filter(|g| g["teacherId"] == teacher_id)
                .flat_map(|g| g["lessons"].as_array().cloned().unwrap_or_default())
                .map(|l| {
                    (
                        l["id"].as_str().unwrap_or("").to_string(),
                        l["studentId"].as_str().unwrap_or("").to_string(),
                        l["status"].as_str().unwrap_or("").to_string(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Drive the engine through select + click, asserting the commit happened,
/// and return the fresh state. Only usable on a cell with a single feasible
/// teacher.
pub fn place_unit(side: &mut Sidecar, student_id: &str, subject_id: &str, date: &str, slot: u64) -> Value {
    side.ok(
        "planner.selectUnit",
        json!({ "studentId": student_id, "subjectId": subject_id }),
    );
    let result = side.ok("planner.clickCell", json!({ "date": date, "slot": slot }));
    assert_eq!(result["outcome"], "committed", "place failed: {}", result);
    result["state"].clone()
}
