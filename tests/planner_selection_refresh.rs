mod support;

use serde_json::json;
use support::{pool_count, setup_school, temp_dir, Sidecar};

#[test]
fn refresh_restores_the_selection_by_identity() {
    let workspace = temp_dir("planboard-restore");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));

    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.aoki, "subjectId": school.math }),
    );
    let state = side.ok("planner.refresh", json!({}))["state"].clone();
    assert_eq!(state["selection"]["mode"], "add");
    assert_eq!(state["selection"]["studentId"], school.aoki.as_str());

    // Drain the unit out from under the selection: zero the request.
    side.ok(
        "requests.batchUpdate",
        json!({
            "periodId": school.period_id,
            "requests": [
                { "studentId": school.aoki, "subjectId": school.math, "requestedLessons": 0 }
            ]
        }),
    );
    let state = side.ok("planner.refresh", json!({}))["state"].clone();
    assert_eq!(state["selection"]["mode"], "idle");
    assert_eq!(pool_count(&state, &school.aoki, &school.math), 0);
}

#[test]
fn focus_is_a_toggle_orthogonal_to_selection() {
    let workspace = temp_dir("planboard-focus");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));

    let state = side.ok(
        "planner.focusStudent",
        json!({ "studentId": school.aoki }),
    )["state"]
        .clone();
    assert_eq!(state["focusedStudentId"], school.aoki.as_str());

    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.baba, "subjectId": school.eng }),
    );
    let state = side.ok("planner.refresh", json!({}))["state"].clone();
    assert_eq!(state["focusedStudentId"], school.aoki.as_str());
    assert_eq!(state["selection"]["studentId"], school.baba.as_str());

    // Focusing the same student again clears it.
    let state = side.ok(
        "planner.focusStudent",
        json!({ "studentId": school.aoki }),
    )["state"]
        .clone();
    assert!(state["focusedStudentId"].is_null());
}

#[test]
fn grade_filter_narrows_the_pool_but_not_the_quantities() {
    let workspace = temp_dir("planboard-gradefilter");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    let state = side.ok("planner.open", json!({ "periodId": school.period_id }))["state"].clone();
    assert_eq!(state["pool"]["regular"].as_array().map(|a| a.len()), Some(4));
    assert_eq!(state["gradeFilter"], "all");

    let state = side.ok(
        "planner.setGradeFilter",
        json!({ "gradeFilter": "elementary" }),
    )["state"]
        .clone();
    let pool = state["pool"]["regular"].as_array().expect("pool").clone();
    assert_eq!(pool.len(), 2);
    assert!(pool.iter().all(|e| e["studentId"] == school.baba.as_str()));
    assert_eq!(pool_count(&state, &school.baba, &school.math), 2);

    let state = side.ok("planner.setGradeFilter", json!({ "gradeFilter": "m3" }))["state"].clone();
    let pool = state["pool"]["regular"].as_array().expect("pool").clone();
    assert!(pool.iter().all(|e| e["studentId"] == school.aoki.as_str()));

    assert_eq!(
        side.err_code("planner.setGradeFilter", json!({ "gradeFilter": "x9" })),
        "bad_params"
    );
}

#[test]
fn picking_a_different_unit_replaces_the_held_one() {
    let workspace = temp_dir("planboard-replace");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));

    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.aoki, "subjectId": school.math }),
    );
    let state = side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.baba, "subjectId": school.eng }),
    )["state"]
        .clone();
    assert_eq!(state["selection"]["studentId"], school.baba.as_str());

    // Same unit again toggles off.
    let state = side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.baba, "subjectId": school.eng }),
    )["state"]
        .clone();
    assert_eq!(state["selection"]["mode"], "idle");

    // clearSelection from any state lands on idle too.
    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.aoki, "subjectId": school.math }),
    );
    let state = side.ok("planner.clearSelection", json!({}))["state"].clone();
    assert_eq!(state["selection"]["mode"], "idle");
}
