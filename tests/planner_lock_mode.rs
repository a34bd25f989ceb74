mod support;

use serde_json::json;
use support::{cell_lessons, place_unit, setup_school, temp_dir, Sidecar};

#[test]
fn lock_mode_needs_exactly_one_active_teacher() {
    let workspace = temp_dir("planboard-lock-gate");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));

    assert_eq!(
        side.err_code("planner.setLockMode", json!({ "enabled": true })),
        "lock_mode_unavailable"
    );

    side.ok(
        "planner.setTeacherFilter",
        json!({ "teacherIds": [school.tanaka] }),
    );
    let state = side.ok("planner.setLockMode", json!({ "enabled": true }))["state"].clone();
    assert_eq!(state["lockMode"], true);

    // Widening the filter drops lock mode on its own.
    let state = side.ok(
        "planner.setTeacherFilter",
        json!({ "teacherIds": [school.tanaka, school.sato] }),
    )["state"]
        .clone();
    assert_eq!(state["lockMode"], false);
}

#[test]
fn entering_lock_mode_resets_the_selection() {
    let workspace = temp_dir("planboard-lock-reset");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));
    side.ok(
        "planner.setTeacherFilter",
        json!({ "teacherIds": [school.tanaka] }),
    );

    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.aoki, "subjectId": school.math }),
    );
    let state = side.ok("planner.setLockMode", json!({ "enabled": true }))["state"].clone();
    assert_eq!(state["selection"]["mode"], "idle");

    // Placement commands are off the table while locking.
    assert_eq!(
        side.err_code(
            "planner.selectUnit",
            json!({ "studentId": school.aoki, "subjectId": school.math })
        ),
        "lock_mode_active"
    );
    let result = side.ok("planner.clickCell", json!({ "date": "2026-04-01", "slot": 4 }));
    assert_eq!(result["outcome"], "refused");
    assert_eq!(result["reason"], "lock_mode_active");
}

#[test]
fn toggle_lock_flips_in_place_without_a_refetch() {
    let workspace = temp_dir("planboard-lock-toggle");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));

    let state = place_unit(&mut side, &school.aoki, &school.math, "2026-04-01", 4);
    let lesson_id = cell_lessons(&state, "2026-04-01-4", &school.tanaka)[0].0.clone();

    // Gated until lock mode is on.
    assert_eq!(
        side.err_code("planner.toggleLock", json!({ "lessonId": lesson_id })),
        "lock_mode_off"
    );

    side.ok(
        "planner.setTeacherFilter",
        json!({ "teacherIds": [school.tanaka] }),
    );
    side.ok("planner.setLockMode", json!({ "enabled": true }));

    let result = side.ok("planner.toggleLock", json!({ "lessonId": lesson_id }));
    assert_eq!(result["status"], "locked");
    let lessons = cell_lessons(&result["state"], "2026-04-01-4", &school.tanaka);
    assert_eq!(lessons[0].2, "locked");

    // Idempotent round trip back to normal.
    let result = side.ok("planner.toggleLock", json!({ "lessonId": lesson_id }));
    assert_eq!(result["status"], "normal");
    let lessons = cell_lessons(&result["state"], "2026-04-01-4", &school.tanaka);
    assert_eq!(lessons[0].2, "normal");

    // The optimistic patch matches the store: a refresh changes nothing.
    let state = side.ok("planner.refresh", json!({}))["state"].clone();
    let lessons = cell_lessons(&state, "2026-04-01-4", &school.tanaka);
    assert_eq!(lessons[0].2, "normal");

    assert_eq!(
        side.err_code("planner.toggleLock", json!({ "lessonId": "zzz" })),
        "not_found"
    );
}

#[test]
fn toggle_lock_only_reaches_the_active_teachers_lessons() {
    let workspace = temp_dir("planboard-lock-teacher");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));

    // A lesson held by Sato, then lock mode scoped to Tanaka.
    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.baba, "subjectId": school.math }),
    );
    let result = side.ok(
        "planner.chooseTeacher",
        json!({ "date": "2026-04-01", "slot": 3, "teacherId": school.sato }),
    );
    assert_eq!(result["outcome"], "committed");
    let lesson_id = cell_lessons(&result["state"], "2026-04-01-3", &school.sato)[0].0.clone();

    side.ok(
        "planner.setTeacherFilter",
        json!({ "teacherIds": [school.tanaka] }),
    );
    side.ok("planner.setLockMode", json!({ "enabled": true }));
    assert_eq!(
        side.err_code("planner.toggleLock", json!({ "lessonId": lesson_id })),
        "wrong_teacher"
    );
}
