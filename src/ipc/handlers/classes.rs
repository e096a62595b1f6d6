use super::sessions::reconcile_within;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_exists, db_conn, opt_str, parse_date_value, parse_time_value, parse_weekday_value,
    required_str, teacher_exists,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct ScheduleEntry {
    weekday: u32,
    start_time: String,
    end_time: String,
    enabled: bool,
}

fn parse_schedule(raw: &serde_json::Value) -> Result<Vec<ScheduleEntry>, String> {
    let arr = raw.as_array().ok_or("schedule must be an array")?;
    let mut out: Vec<ScheduleEntry> = Vec::with_capacity(arr.len());
    for item in arr {
        let weekday = match item.get("weekday") {
            Some(v) => parse_weekday_value(v)?,
            None => return Err("missing schedule[].weekday".to_string()),
        };
        if out.iter().any(|e| e.weekday == weekday) {
            return Err(format!(
                "duplicate schedule entry for {}",
                schedule::weekday_name(weekday).unwrap_or("weekday")
            ));
        }
        let start = parse_time_value(item.get("startTime"), "schedule[].startTime")?;
        let end = parse_time_value(item.get("endTime"), "schedule[].endTime")?;
        if start >= end {
            return Err("schedule[].startTime must be before endTime".to_string());
        }
        let enabled = match item.get("enabled") {
            None => true,
            Some(v) if v.is_null() => true,
            Some(v) => v.as_bool().ok_or("schedule[].enabled must be boolean")?,
        };
        out.push(ScheduleEntry {
            weekday,
            start_time: schedule::format_time(start),
            end_time: schedule::format_time(end),
            enabled,
        });
    }
    Ok(out)
}

fn replace_schedule(
    conn: &Connection,
    class_id: &str,
    entries: &[ScheduleEntry],
) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM class_schedules WHERE class_id = ?", [class_id])?;
    for e in entries {
        conn.execute(
            "INSERT INTO class_schedules(class_id, weekday, start_time, end_time, enabled)
             VALUES(?, ?, ?, ?, ?)",
            params![class_id, e.weekday, e.start_time, e.end_time, e.enabled as i64],
        )?;
    }
    Ok(())
}

fn curriculum_exists(conn: &Connection, curriculum_id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT 1 FROM curricula WHERE id = ?",
        [curriculum_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

fn reconcile_json(summary: &super::sessions::ReconcileSummary) -> serde_json::Value {
    json!({
        "created": summary.created,
        "updated": summary.updated,
        "deleted": summary.deleted,
        "skipped": summary.skipped,
    })
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let start_date = match parse_date_value(req.params.get("startDate"), "startDate") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let Some(schedule_raw) = req.params.get("schedule") else {
        return err(&req.id, "bad_params", "missing schedule", None);
    };
    let entries = match parse_schedule(schedule_raw) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let room = opt_str(&req.params, "room").unwrap_or_default();
    let teacher_id = opt_str(&req.params, "teacherId");

    match curriculum_exists(conn, &curriculum_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "curriculum not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if let Some(tid) = &teacher_id {
        match teacher_exists(conn, tid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "teacher not found", None),
            Err(e) => return e.response(&req.id),
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO classes(id, name, room, teacher_id, curriculum_id, start_date, status)
         VALUES(?, ?, ?, ?, ?, ?, 'active')",
        params![
            class_id,
            name,
            room,
            teacher_id,
            curriculum_id,
            schedule::format_date(start_date)
        ],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }
    if let Err(e) = replace_schedule(&tx, &class_id, &entries) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_schedules" })),
        );
    }

    // Initial generation runs in the same unit of work as the insert so a
    // half-generated class is never observable.
    let summary = match reconcile_within(&tx, &class_id) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "name": name,
            "generated": reconcile_json(&summary),
        }),
    )
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    }

    let name = opt_str(&req.params, "name");
    let room = req
        .params
        .get("room")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string());
    let status = opt_str(&req.params, "status");
    if let Some(s) = &status {
        if s != "active" && s != "closed" {
            return err(&req.id, "bad_params", "status must be active or closed", None);
        }
    }

    let teacher_given = req.params.get("teacherId").is_some();
    let teacher_id = opt_str(&req.params, "teacherId");
    if let Some(tid) = &teacher_id {
        match teacher_exists(conn, tid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "teacher not found", None),
            Err(e) => return e.response(&req.id),
        }
    }

    let start_date = match req.params.get("startDate") {
        None => None,
        Some(v) => match parse_date_value(Some(v), "startDate") {
            Ok(d) => Some(d),
            Err(m) => return err(&req.id, "bad_params", m, None),
        },
    };

    let curriculum_id = opt_str(&req.params, "curriculumId");
    if let Some(cid) = &curriculum_id {
        match curriculum_exists(conn, cid) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "curriculum not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let entries = match req.params.get("schedule") {
        None => None,
        Some(raw) => match parse_schedule(raw) {
            Ok(v) => Some(v),
            Err(m) => return err(&req.id, "bad_params", m, None),
        },
    };

    // A schedule, start-date, teacher or curriculum change invalidates the
    // materialized session set; everything else is a plain field edit.
    let needs_reconcile =
        entries.is_some() || start_date.is_some() || curriculum_id.is_some() || teacher_given;

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Some(v) = &name {
        if let Err(e) = tx.execute("UPDATE classes SET name = ? WHERE id = ?", params![v, class_id])
        {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = &room {
        if let Err(e) = tx.execute("UPDATE classes SET room = ? WHERE id = ?", params![v, class_id])
        {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = &status {
        if let Err(e) =
            tx.execute("UPDATE classes SET status = ? WHERE id = ?", params![v, class_id])
        {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if teacher_given {
        if let Err(e) = tx.execute(
            "UPDATE classes SET teacher_id = ? WHERE id = ?",
            params![teacher_id, class_id],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(d) = start_date {
        if let Err(e) = tx.execute(
            "UPDATE classes SET start_date = ? WHERE id = ?",
            params![schedule::format_date(d), class_id],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(cid) = &curriculum_id {
        if let Err(e) = tx.execute(
            "UPDATE classes SET curriculum_id = ? WHERE id = ?",
            params![cid, class_id],
        ) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(list) = &entries {
        if let Err(e) = replace_schedule(&tx, &class_id, list) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "class_schedules" })),
            );
        }
    }

    let reconcile = if needs_reconcile {
        match reconcile_within(&tx, &class_id) {
            Ok(v) => Some(v),
            Err(e) => {
                let _ = tx.rollback();
                return e.response(&req.id);
            }
        }
    } else {
        None
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "reconciled": reconcile.as_ref().map(reconcile_json),
        }),
    )
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Use correlated subqueries to avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.room,
           c.status,
           c.start_date,
           t.name AS teacher_name,
           cu.name AS curriculum_name,
           (SELECT COUNT(*) FROM class_sessions s WHERE s.class_id = c.id) AS session_count,
           (SELECT COUNT(*) FROM class_sessions s
              WHERE s.class_id = c.id AND s.status = 'completed') AS completed_count
         FROM classes c
         LEFT JOIN teachers t ON t.id = c.teacher_id
         JOIN curricula cu ON cu.id = c.curriculum_id
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "room": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "startDate": r.get::<_, String>(4)?,
                "teacherName": r.get::<_, Option<String>>(5)?,
                "curriculumName": r.get::<_, String>(6)?,
                "sessionCount": r.get::<_, i64>(7)?,
                "completedCount": r.get::<_, i64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let head = conn
        .query_row(
            "SELECT c.id, c.name, c.room, c.teacher_id, c.curriculum_id, c.start_date, c.status
             FROM classes c WHERE c.id = ?",
            [&class_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "room": r.get::<_, String>(2)?,
                    "teacherId": r.get::<_, Option<String>>(3)?,
                    "curriculumId": r.get::<_, String>(4)?,
                    "startDate": r.get::<_, String>(5)?,
                    "status": r.get::<_, String>(6)?,
                }))
            },
        )
        .optional();
    let head = match head {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT weekday, start_time, end_time, enabled
         FROM class_schedules WHERE class_id = ? ORDER BY weekday",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let entries = stmt
        .query_map([&class_id], |r| {
            let weekday: i64 = r.get(0)?;
            Ok(json!({
                "weekday": weekday,
                "weekdayName": schedule::weekday_name(weekday as u32),
                "startTime": r.get::<_, String>(1)?,
                "endTime": r.get::<_, String>(2)?,
                "enabled": r.get::<_, i64>(3)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let entries = match entries {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "class": head, "schedule": entries }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match class_exists(conn, &class_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return e.response(&req.id),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM class_sessions WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_sessions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM class_schedules WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_schedules" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.open" => Some(handle_classes_open(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
