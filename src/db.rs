use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("planboard.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS planning_periods(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'planning'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS special_periods(
            id TEXT PRIMARY KEY,
            period_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(period_id) REFERENCES planning_periods(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, subject_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kana TEXT NOT NULL DEFAULT '',
            display_name TEXT NOT NULL,
            grade TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_preferred_teachers(
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            PRIMARY KEY(student_id, teacher_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            level TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_requests(
            id TEXT PRIMARY KEY,
            period_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            requested_lessons INTEGER NOT NULL DEFAULT 0,
            priority TEXT NOT NULL DEFAULT 'medium',
            UNIQUE(period_id, student_id, subject_id),
            FOREIGN KEY(period_id) REFERENCES planning_periods(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_requests_period ON student_requests(period_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contracted_lessons(
            id TEXT PRIMARY KEY,
            special_period_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            placed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(special_period_id) REFERENCES special_periods(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contracted_special ON contracted_lessons(special_period_id)",
        [],
    )?;

    // Row present means the teacher is available at that slot. Absence is
    // unavailable; there is no third state in storage.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS shifts(
            date TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            time_slot_id INTEGER NOT NULL,
            PRIMARY KEY(date, teacher_id, time_slot_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_shifts_date ON shifts(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            time_slot_id INTEGER NOT NULL,
            teacher_id TEXT NOT NULL,
            UNIQUE(date, time_slot_id, teacher_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_date ON assignments(date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            request_id TEXT,
            contracted_lesson_id TEXT,
            status TEXT NOT NULL DEFAULT 'normal',
            origin TEXT NOT NULL DEFAULT 'manual',
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_assignment ON lessons(assignment_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_student ON lessons(student_id)",
        [],
    )?;

    // Workspaces created before lessons carried a provenance column.
    ensure_lessons_origin(&conn)?;

    Ok(conn)
}

fn ensure_lessons_origin(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lessons", "origin")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lessons ADD COLUMN origin TEXT NOT NULL DEFAULT 'manual'",
        [],
    )?;
    // Locked rows predating the column were auto-assign output the operator
    // pinned; everything else is treated as manual.
    conn.execute(
        "UPDATE lessons SET origin = 'auto' WHERE status = 'locked'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
