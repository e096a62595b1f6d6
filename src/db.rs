use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "timetable.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS curricula(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phase_count INTEGER NOT NULL,
            sessions_per_phase INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS curriculum_templates(
            curriculum_id TEXT NOT NULL,
            phase_number INTEGER NOT NULL,
            session_in_phase INTEGER NOT NULL,
            template_id TEXT NOT NULL,
            title TEXT,
            PRIMARY KEY(curriculum_id, phase_number, session_in_phase),
            FOREIGN KEY(curriculum_id) REFERENCES curricula(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_curriculum_templates_curriculum
         ON curriculum_templates(curriculum_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            date TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS suspensions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            start_date TEXT,
            end_date TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            room TEXT NOT NULL DEFAULT '',
            teacher_id TEXT,
            curriculum_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(curriculum_id) REFERENCES curricula(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_status ON classes(status)",
        [],
    )?;

    // Weekly pattern rows, one per weekday; replaced wholesale on edit.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_schedules(
            class_id TEXT NOT NULL,
            weekday INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(class_id, weekday),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    // The UNIQUE tuple is the natural key; regeneration relies on it to
    // stay duplicate-free under repeated upserts.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sessions(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            phase_number INTEGER NOT NULL,
            session_in_phase INTEGER NOT NULL,
            scheduled_date TEXT NOT NULL,
            scheduled_start TEXT NOT NULL,
            scheduled_end TEXT NOT NULL,
            original_teacher_id TEXT,
            assigned_teacher_id TEXT,
            substitute_teacher_id TEXT,
            substitute_reason TEXT,
            status TEXT NOT NULL DEFAULT 'scheduled',
            actual_date TEXT,
            actual_start TEXT,
            actual_end TEXT,
            notes TEXT NOT NULL DEFAULT '',
            suspension_id TEXT,
            template_id TEXT,
            UNIQUE(class_id, phase_number, session_in_phase, scheduled_date),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(suspension_id) REFERENCES suspensions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_class ON class_sessions(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_teacher
         ON class_sessions(assigned_teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_suspension
         ON class_sessions(suspension_id)",
        [],
    )?;

    // Existing workspaces may predate the substitute-teacher columns.
    ensure_session_substitute_columns(&conn)?;

    Ok(conn)
}

fn ensure_session_substitute_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "class_sessions", "substitute_teacher_id")? {
        conn.execute(
            "ALTER TABLE class_sessions ADD COLUMN substitute_teacher_id TEXT",
            [],
        )?;
    }
    if !table_has_column(conn, "class_sessions", "substitute_reason")? {
        conn.execute(
            "ALTER TABLE class_sessions ADD COLUMN substitute_reason TEXT",
            [],
        )?;
    }
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
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
