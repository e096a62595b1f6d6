use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, opt_str, parse_date_value, parse_time_value, required_str, teacher_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, CurriculumShape, Occurrence, PatternSlot};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub(super) struct ClassConfig {
    pub class_id: String,
    pub teacher_id: Option<String>,
    pub curriculum_id: String,
    pub start_date: NaiveDate,
    pub shape: CurriculumShape,
    pub pattern: Vec<PatternSlot>,
}

pub(super) fn load_class_config(
    conn: &Connection,
    class_id: &str,
) -> Result<ClassConfig, HandlerErr> {
    let head = conn
        .query_row(
            "SELECT c.teacher_id, c.curriculum_id, c.start_date, cu.phase_count, cu.sessions_per_phase
             FROM classes c
             JOIN curricula cu ON cu.id = c.curriculum_id
             WHERE c.id = ?",
            [class_id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((teacher_id, curriculum_id, start_raw, phase_count, sessions_per_phase)) = head else {
        return Err(HandlerErr::new("not_found", "class not found"));
    };
    let start_date = schedule::parse_date(&start_raw).ok_or_else(|| {
        HandlerErr::new(
            "validation_failed",
            format!("class start_date is malformed: {}", start_raw),
        )
    })?;

    let mut stmt = conn
        .prepare(
            "SELECT weekday, start_time, end_time, enabled
             FROM class_schedules
             WHERE class_id = ?
             ORDER BY weekday",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let raw_rows = stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut pattern = Vec::with_capacity(raw_rows.len());
    for (weekday, start_raw, end_raw, enabled) in raw_rows {
        let start = schedule::parse_time(&start_raw).ok_or_else(|| {
            HandlerErr::new(
                "validation_failed",
                format!("stored schedule time is malformed: {}", start_raw),
            )
        })?;
        let end = schedule::parse_time(&end_raw).ok_or_else(|| {
            HandlerErr::new(
                "validation_failed",
                format!("stored schedule time is malformed: {}", end_raw),
            )
        })?;
        pattern.push(PatternSlot {
            weekday: weekday as u32,
            start,
            end,
            enabled: enabled != 0,
        });
    }

    Ok(ClassConfig {
        class_id: class_id.to_string(),
        teacher_id,
        curriculum_id,
        start_date,
        shape: CurriculumShape {
            phase_count,
            sessions_per_phase,
        },
        pattern,
    })
}

fn load_templates(
    conn: &Connection,
    curriculum_id: &str,
) -> Result<HashMap<(i64, i64), String>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT phase_number, session_in_phase, template_id
             FROM curriculum_templates
             WHERE curriculum_id = ?",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([curriculum_id], |r| {
            Ok((
                (r.get::<_, i64>(0)?, r.get::<_, i64>(1)?),
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(rows.into_iter().collect())
}

fn load_holiday_set(conn: &Connection) -> Result<HashSet<NaiveDate>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT date FROM holidays")
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let raw = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    // Malformed rows cannot match any walked date; ignore them here.
    Ok(raw.iter().filter_map(|s| schedule::parse_date(s)).collect())
}

pub(super) fn expand_for_class(
    conn: &Connection,
    cfg: &ClassConfig,
) -> Result<Vec<Occurrence>, HandlerErr> {
    let templates = load_templates(conn, &cfg.curriculum_id)?;
    let holidays = load_holiday_set(conn)?;
    Ok(schedule::expand(
        cfg.start_date,
        &cfg.pattern,
        cfg.shape.total_sessions(),
        cfg.shape,
        &templates,
        |date| holidays.contains(&date),
    ))
}

pub(super) struct UpsertSummary {
    pub created: i64,
    pub updated: i64,
    pub skipped: Vec<serde_json::Value>,
}

/// Idempotent materialization of expanded occurrences. Insert-if-absent or
/// update-in-place on the natural key; operator-entered status, actuals,
/// notes and suspension linkage are never touched by the update arm. A
/// failing occurrence is recorded and skipped so one bad row cannot block
/// the rest of the batch.
pub(super) fn upsert_occurrences(
    conn: &Connection,
    cfg: &ClassConfig,
    occurrences: &[Occurrence],
) -> UpsertSummary {
    let mut summary = UpsertSummary {
        created: 0,
        updated: 0,
        skipped: Vec::new(),
    };

    for occ in occurrences {
        let date_s = schedule::format_date(occ.date);
        let key = json!({
            "phaseNumber": occ.phase_number,
            "sessionInPhase": occ.session_in_phase,
            "date": date_s,
        });

        // A cancelled session retires its date for this class; only the
        // suspension processor may put a new session there.
        let cancelled_here = conn
            .query_row(
                "SELECT 1 FROM class_sessions
                 WHERE class_id = ? AND scheduled_date = ? AND status = 'cancelled'
                 LIMIT 1",
                params![cfg.class_id, date_s],
                |r| r.get::<_, i64>(0),
            )
            .optional();
        match cancelled_here {
            Ok(Some(_)) => {
                summary
                    .skipped
                    .push(json!({ "key": key, "reason": "date_suspended" }));
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                summary
                    .skipped
                    .push(json!({ "key": key, "reason": e.to_string() }));
                continue;
            }
        }

        let existing = conn
            .query_row(
                "SELECT 1 FROM class_sessions
                 WHERE class_id = ? AND phase_number = ? AND session_in_phase = ? AND scheduled_date = ?",
                params![cfg.class_id, occ.phase_number, occ.session_in_phase, date_s],
                |r| r.get::<_, i64>(0),
            )
            .optional();
        let pre_existing = match existing {
            Ok(v) => v.is_some(),
            Err(e) => {
                summary
                    .skipped
                    .push(json!({ "key": key, "reason": e.to_string() }));
                continue;
            }
        };

        // Last-writer-wins on the scheduling fields; the natural-key
        // constraint, not a row lock, is what prevents duplicates under a
        // concurrent duplicate attempt.
        let res = conn.execute(
            "INSERT INTO class_sessions(
                id, class_id, phase_number, session_in_phase, scheduled_date,
                scheduled_start, scheduled_end, original_teacher_id,
                assigned_teacher_id, status, notes, template_id)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'scheduled', '', ?)
             ON CONFLICT(class_id, phase_number, session_in_phase, scheduled_date) DO UPDATE SET
               scheduled_start = excluded.scheduled_start,
               scheduled_end = excluded.scheduled_end,
               assigned_teacher_id = excluded.assigned_teacher_id,
               template_id = excluded.template_id",
            params![
                Uuid::new_v4().to_string(),
                cfg.class_id,
                occ.phase_number,
                occ.session_in_phase,
                date_s,
                schedule::format_time(occ.start),
                schedule::format_time(occ.end),
                cfg.teacher_id,
                cfg.teacher_id,
                occ.template_id,
            ],
        );
        match res {
            Ok(_) => {
                if pre_existing {
                    summary.updated += 1;
                } else {
                    summary.created += 1;
                }
            }
            Err(e) => {
                summary
                    .skipped
                    .push(json!({ "key": key, "reason": e.to_string() }));
            }
        }
    }

    summary
}

pub(super) struct ReconcileSummary {
    pub created: i64,
    pub updated: i64,
    pub deleted: i64,
    pub skipped: Vec<serde_json::Value>,
}

/// Recomputes the expected session set from the class's current
/// configuration, upserts it, then deletes exactly the stored sessions that
/// are still `scheduled` and no longer expected. Sessions in any other
/// status are never deleted here, even when the pattern has moved away from
/// them. Runs inside the caller's transaction.
pub(super) fn reconcile_within(
    conn: &Connection,
    class_id: &str,
) -> Result<ReconcileSummary, HandlerErr> {
    let cfg = load_class_config(conn, class_id)?;
    let occurrences = expand_for_class(conn, &cfg)?;
    let upsert = upsert_occurrences(conn, &cfg, &occurrences);

    let expected: HashSet<(i64, i64, String)> = occurrences
        .iter()
        .map(|o| {
            (
                o.phase_number,
                o.session_in_phase,
                schedule::format_date(o.date),
            )
        })
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT id, phase_number, session_in_phase, scheduled_date
             FROM class_sessions
             WHERE class_id = ? AND status = 'scheduled'",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let stored = stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut deleted = 0i64;
    for (id, phase_number, session_in_phase, date) in stored {
        if expected.contains(&(phase_number, session_in_phase, date)) {
            continue;
        }
        conn.execute("DELETE FROM class_sessions WHERE id = ?", [&id])
            .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
        deleted += 1;
    }

    Ok(ReconcileSummary {
        created: upsert.created,
        updated: upsert.updated,
        deleted,
        skipped: upsert.skipped,
    })
}

fn occurrence_json(occ: &Occurrence) -> serde_json::Value {
    json!({
        "index": occ.index,
        "date": schedule::format_date(occ.date),
        "startTime": schedule::format_time(occ.start),
        "endTime": schedule::format_time(occ.end),
        "phaseNumber": occ.phase_number,
        "sessionInPhase": occ.session_in_phase,
        "templateId": occ.template_id,
    })
}

pub(super) fn session_row_json(r: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "classId": r.get::<_, String>(1)?,
        "phaseNumber": r.get::<_, i64>(2)?,
        "sessionInPhase": r.get::<_, i64>(3)?,
        "scheduledDate": r.get::<_, String>(4)?,
        "scheduledStart": r.get::<_, String>(5)?,
        "scheduledEnd": r.get::<_, String>(6)?,
        "originalTeacherId": r.get::<_, Option<String>>(7)?,
        "assignedTeacherId": r.get::<_, Option<String>>(8)?,
        "substituteTeacherId": r.get::<_, Option<String>>(9)?,
        "substituteReason": r.get::<_, Option<String>>(10)?,
        "status": r.get::<_, String>(11)?,
        "actualDate": r.get::<_, Option<String>>(12)?,
        "actualStart": r.get::<_, Option<String>>(13)?,
        "actualEnd": r.get::<_, Option<String>>(14)?,
        "notes": r.get::<_, String>(15)?,
        "suspensionId": r.get::<_, Option<String>>(16)?,
        "templateId": r.get::<_, Option<String>>(17)?,
    }))
}

pub(super) const SESSION_COLUMNS: &str = "id, class_id, phase_number, session_in_phase, scheduled_date,
    scheduled_start, scheduled_end, original_teacher_id, assigned_teacher_id,
    substitute_teacher_id, substitute_reason, status, actual_date, actual_start,
    actual_end, notes, suspension_id, template_id";

fn handle_sessions_expand(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let cfg = match load_class_config(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let occurrences = match expand_for_class(conn, &cfg) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "total": occurrences.len(),
            "occurrences": occurrences.iter().map(occurrence_json).collect::<Vec<_>>(),
        }),
    )
}

fn handle_sessions_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let cfg = match load_class_config(&tx, &class_id) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
    };
    let occurrences = match expand_for_class(&tx, &cfg) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
    };
    let summary = upsert_occurrences(&tx, &cfg, &occurrences);

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "created": summary.created,
            "updated": summary.updated,
            "skipped": summary.skipped,
        }),
    )
}

fn handle_sessions_reconcile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
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
            "created": summary.created,
            "updated": summary.updated,
            "deleted": summary.deleted,
            "skipped": summary.skipped,
        }),
    )
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status_filter = opt_str(&req.params, "status");
    if let Some(s) = &status_filter {
        if !schedule::is_known_status(s) {
            return err(&req.id, "bad_params", format!("unknown status: {}", s), None);
        }
    }

    let (sql, bind): (String, Vec<String>) = match &status_filter {
        Some(s) => (
            format!(
                "SELECT {} FROM class_sessions
                 WHERE class_id = ? AND status = ?
                 ORDER BY phase_number, session_in_phase, scheduled_date",
                SESSION_COLUMNS
            ),
            vec![class_id.clone(), s.clone()],
        ),
        None => (
            format!(
                "SELECT {} FROM class_sessions
                 WHERE class_id = ?
                 ORDER BY phase_number, session_in_phase, scheduled_date",
                SESSION_COLUMNS
            ),
            vec![class_id.clone()],
        ),
    };

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind.iter()), session_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(sessions) => ok(&req.id, json!({ "sessions": sessions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sessions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let session_id = match required_str(req, "sessionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let current = conn
        .query_row(
            "SELECT status FROM class_sessions WHERE id = ?",
            [&session_id],
            |r| r.get::<_, String>(0),
        )
        .optional();
    let current_status = match current {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "session not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut sets: Vec<&'static str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    if let Some(new_status) = opt_str(&req.params, "status") {
        if !schedule::is_known_status(&new_status) {
            return err(
                &req.id,
                "bad_params",
                format!("unknown status: {}", new_status),
                None,
            );
        }
        if !schedule::status_transition_allowed(&current_status, &new_status) {
            return err(
                &req.id,
                "validation_failed",
                "status transition not allowed",
                Some(json!({ "from": current_status, "to": new_status })),
            );
        }
        sets.push("status = ?");
        binds.push(Value::Text(new_status));
    }

    if let Some(v) = req.params.get("substituteTeacherId") {
        if v.is_null() {
            sets.push("substitute_teacher_id = NULL");
            sets.push("substitute_reason = NULL");
        } else {
            let Some(teacher_id) = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
            else {
                return err(
                    &req.id,
                    "bad_params",
                    "substituteTeacherId must be a string or null",
                    None,
                );
            };
            match teacher_exists(conn, &teacher_id) {
                Ok(true) => {}
                Ok(false) => return err(&req.id, "not_found", "substitute teacher not found", None),
                Err(e) => return e.response(&req.id),
            }
            sets.push("substitute_teacher_id = ?");
            binds.push(Value::Text(teacher_id));
            let reason = opt_str(&req.params, "substituteReason").unwrap_or_default();
            sets.push("substitute_reason = ?");
            binds.push(Value::Text(reason));
        }
    }

    if let Some(v) = req.params.get("actualDate") {
        if v.is_null() {
            sets.push("actual_date = NULL");
        } else {
            let date = match parse_date_value(Some(v), "actualDate") {
                Ok(d) => d,
                Err(m) => return err(&req.id, "bad_params", m, None),
            };
            sets.push("actual_date = ?");
            binds.push(Value::Text(schedule::format_date(date)));
        }
    }
    if let Some(v) = req.params.get("actualStart") {
        if v.is_null() {
            sets.push("actual_start = NULL");
        } else {
            let time = match parse_time_value(Some(v), "actualStart") {
                Ok(t) => t,
                Err(m) => return err(&req.id, "bad_params", m, None),
            };
            sets.push("actual_start = ?");
            binds.push(Value::Text(schedule::format_time(time)));
        }
    }
    if let Some(v) = req.params.get("actualEnd") {
        if v.is_null() {
            sets.push("actual_end = NULL");
        } else {
            let time = match parse_time_value(Some(v), "actualEnd") {
                Ok(t) => t,
                Err(m) => return err(&req.id, "bad_params", m, None),
            };
            sets.push("actual_end = ?");
            binds.push(Value::Text(schedule::format_time(time)));
        }
    }
    if let Some(v) = req.params.get("notes") {
        let Some(notes) = v.as_str() else {
            return err(&req.id, "bad_params", "notes must be a string", None);
        };
        sets.push("notes = ?");
        binds.push(Value::Text(notes.to_string()));
    }

    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    let sql = format!(
        "UPDATE class_sessions SET {} WHERE id = ?",
        sets.join(", ")
    );
    binds.push(Value::Text(session_id.clone()));
    if let Err(e) = conn.execute(&sql, params_from_iter(binds.iter())) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let row = conn
        .query_row(
            &format!("SELECT {} FROM class_sessions WHERE id = ?", SESSION_COLUMNS),
            [&session_id],
            session_row_json,
        )
        .optional();
    match row {
        Ok(Some(session)) => ok(&req.id, json!({ "session": session })),
        Ok(None) => err(&req.id, "not_found", "session not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.expand" => Some(handle_sessions_expand(state, req)),
        "sessions.generate" => Some(handle_sessions_generate(state, req)),
        "sessions.reconcile" => Some(handle_sessions_reconcile(state, req)),
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.update" => Some(handle_sessions_update(state, req)),
        _ => None,
    }
}
