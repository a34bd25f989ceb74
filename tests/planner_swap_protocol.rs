mod support;

use serde_json::json;
use support::{cell_lessons, place_unit, pool_count, setup_school, temp_dir, Sidecar};

/// Fill Tanaka's (04-01, 4) cell with Aoki math and Baba math, then try to
/// add a third lesson there.
fn fill_cell(side: &mut Sidecar, school: &support::School) {
    place_unit(side, &school.aoki, &school.math, "2026-04-01", 4);
    place_unit(side, &school.baba, &school.math, "2026-04-01", 4);
}

#[test]
fn full_cell_walks_the_eviction_protocol() {
    let workspace = temp_dir("planboard-swap");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));
    fill_cell(&mut side, &school);

    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.aoki, "subjectId": school.eng }),
    );
    let result = side.ok("planner.clickCell", json!({ "date": "2026-04-01", "slot": 4 }));
    assert_eq!(result["outcome"], "needsEviction");
    let candidates = result["pendingSwap"]["candidates"]
        .as_array()
        .expect("candidates");
    assert_eq!(candidates.len(), 2);
    let victim = candidates
        .iter()
        .find(|c| c["studentId"] == school.baba.as_str())
        .expect("baba candidate")["id"]
        .as_str()
        .expect("lesson id")
        .to_string();

    let result = side.ok(
        "planner.confirmEviction",
        json!({ "evictLessonId": victim }),
    );
    assert_eq!(result["outcome"], "committed");
    let state = &result["state"];

    // Capacity still holds: two lessons, the evictee replaced by Aoki's
    // English lesson, and Baba's unit back in the pool.
    let lessons = cell_lessons(state, "2026-04-01-4", &school.tanaka);
    assert_eq!(lessons.len(), 2);
    assert!(lessons.iter().all(|(_, student, _)| student == &school.aoki));
    assert_eq!(pool_count(state, &school.baba, &school.math), 2);
    assert!(state["pendingSwap"].is_null());
}

#[test]
fn locked_lessons_refuse_eviction() {
    let workspace = temp_dir("planboard-swap-locked");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));
    fill_cell(&mut side, &school);

    // Lock Baba's lesson through lock mode.
    let state = side.ok("planner.refresh", json!({}))["state"].clone();
    let baba_lesson = cell_lessons(&state, "2026-04-01-4", &school.tanaka)
        .into_iter()
        .find(|(_, student, _)| student == &school.baba)
        .expect("baba lesson")
        .0;
    side.ok(
        "planner.setTeacherFilter",
        json!({ "teacherIds": [school.tanaka] }),
    );
    side.ok("planner.setLockMode", json!({ "enabled": true }));
    side.ok("planner.toggleLock", json!({ "lessonId": baba_lesson }));
    side.ok("planner.setLockMode", json!({ "enabled": false }));
    side.ok(
        "planner.setTeacherFilter",
        json!({ "teacherIds": [school.tanaka, school.sato] }),
    );

    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.aoki, "subjectId": school.eng }),
    );
    let result = side.ok("planner.clickCell", json!({ "date": "2026-04-01", "slot": 4 }));
    assert_eq!(result["outcome"], "needsEviction");

    assert_eq!(
        side.err_code(
            "planner.confirmEviction",
            json!({ "evictLessonId": baba_lesson })
        ),
        "lesson_locked"
    );
    assert_eq!(
        side.err_code("planner.confirmEviction", json!({ "evictLessonId": "zzz" })),
        "bad_evict"
    );

    // The swap survived both bad nominations; the other occupant works.
    let state = side.ok("planner.refresh", json!({}))["state"].clone();
    assert!(state["pendingSwap"].is_null(), "refresh clears pending swap");
}

#[test]
fn cancel_swap_is_purely_local() {
    let workspace = temp_dir("planboard-swap-cancel");
    let mut side = Sidecar::spawn();
    let school = setup_school(&mut side, &workspace);
    side.ok("planner.open", json!({ "periodId": school.period_id }));
    fill_cell(&mut side, &school);

    side.ok(
        "planner.selectUnit",
        json!({ "studentId": school.aoki, "subjectId": school.eng }),
    );
    let before = side.ok("planner.clickCell", json!({ "date": "2026-04-01", "slot": 4 }));
    assert_eq!(before["outcome"], "needsEviction");

    // A second click while the swap is pending is refused.
    let blocked = side.ok("planner.clickCell", json!({ "date": "2026-04-01", "slot": 5 }));
    assert_eq!(blocked["outcome"], "refused");
    assert_eq!(blocked["reason"], "swap_pending");

    let state = side.ok("planner.cancelSwap", json!({}))["state"].clone();
    assert!(state["pendingSwap"].is_null());
    // Selection and grid are exactly as before the attempt.
    assert_eq!(state["selection"]["mode"], "add");
    assert_eq!(
        state["assignments"],
        before["state"]["assignments"],
        "cancel must not touch the snapshot"
    );

    // The released selection can go elsewhere.
    let result = side.ok("planner.clickCell", json!({ "date": "2026-04-01", "slot": 5 }));
    assert_eq!(result["outcome"], "committed");
}
