use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("querylab.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            first_name TEXT,
            last_name TEXT,
            code TEXT,
            role TEXT NOT NULL DEFAULT 'student',
            instructor_code TEXT,
            associated_instructor_id TEXT,
            academic_year TEXT,
            semester TEXT,
            course_section TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    // Workspaces created before the role-based system lack these columns.
    ensure_users_role_columns(&conn)?;
    ensure_semester_columns(&conn, "users")?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_instructor ON users(associated_instructor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topics(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            type TEXT NOT NULL DEFAULT 'sql',
            database TEXT NOT NULL DEFAULT 'ClassicModels',
            sort_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            question_number INTEGER NOT NULL,
            question_text TEXT NOT NULL,
            solution TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(topic_id) REFERENCES topics(id),
            UNIQUE(topic_id, question_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_topic ON questions(topic_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS completions(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            academic_year TEXT,
            semester TEXT,
            course_section TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(question_id) REFERENCES questions(id)
        )",
        [],
    )?;
    ensure_semester_columns(&conn, "completions")?;
    // One completion per user and question; grading re-runs stay idempotent.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS unique_user_question_completion
         ON completions(user_id, question_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_completions_user ON completions(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_completions_question ON completions(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_sections(
            id TEXT PRIMARY KEY,
            instructor_id TEXT NOT NULL,
            course_code TEXT NOT NULL,
            course_name TEXT NOT NULL,
            section_code TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(instructor_id) REFERENCES users(id),
            UNIQUE(instructor_id, course_code, section_code, academic_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_sections_instructor
         ON course_sections(instructor_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS reference_imports(
            file_name TEXT PRIMARY KEY,
            sha256 TEXT NOT NULL,
            imported_at TEXT
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_role_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "users", "role")? {
        conn.execute(
            "ALTER TABLE users ADD COLUMN role TEXT NOT NULL DEFAULT 'student'",
            [],
        )?;
    }
    if !table_has_column(conn, "users", "instructor_code")? {
        conn.execute("ALTER TABLE users ADD COLUMN instructor_code TEXT", [])?;
    }
    if !table_has_column(conn, "users", "associated_instructor_id")? {
        conn.execute(
            "ALTER TABLE users ADD COLUMN associated_instructor_id TEXT",
            [],
        )?;
    }
    Ok(())
}

fn ensure_semester_columns(conn: &Connection, table: &str) -> anyhow::Result<()> {
    for col in ["academic_year", "semester", "course_section"] {
        if !table_has_column(conn, table, col)? {
            conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} TEXT", table, col), [])?;
        }
    }
    Ok(())
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
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
