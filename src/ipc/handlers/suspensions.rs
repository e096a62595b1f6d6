use super::sessions::{session_row_json, SESSION_COLUMNS};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

struct MakeupInput {
    session_id: String,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
}

struct CancelTarget {
    session_id: String,
    class_id: String,
    phase_number: i64,
    scheduled_date: String,
}

fn parse_session_ids(raw: Option<&serde_json::Value>) -> Result<Vec<String>, String> {
    let arr = raw
        .and_then(|v| v.as_array())
        .ok_or("sessionIds must be an array")?;
    let mut out: Vec<String> = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or("sessionIds must contain non-empty strings")?;
        if out.contains(&s) {
            return Err(format!("duplicate session id: {}", s));
        }
        out.push(s);
    }
    if out.is_empty() {
        return Err("sessionIds must not be empty".to_string());
    }
    Ok(out)
}

fn parse_makeups(raw: Option<&serde_json::Value>) -> Result<Vec<MakeupInput>, String> {
    let arr = raw
        .and_then(|v| v.as_array())
        .ok_or("makeups must be an array")?;
    let mut out: Vec<MakeupInput> = Vec::with_capacity(arr.len());
    for item in arr {
        let session_id = item
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or("makeups[].sessionId must be a non-empty string")?;
        let date_raw = item
            .get("date")
            .and_then(|v| v.as_str())
            .ok_or("missing makeups[].date")?;
        let date = schedule::parse_date(date_raw).ok_or("makeups[].date must be YYYY-MM-DD")?;
        let start_raw = item
            .get("startTime")
            .and_then(|v| v.as_str())
            .ok_or("missing makeups[].startTime")?;
        let start = schedule::parse_time(start_raw).ok_or("makeups[].startTime must be HH:MM")?;
        let end_raw = item
            .get("endTime")
            .and_then(|v| v.as_str())
            .ok_or("missing makeups[].endTime")?;
        let end = schedule::parse_time(end_raw).ok_or("makeups[].endTime must be HH:MM")?;
        if start >= end {
            return Err("makeups[].startTime must be before endTime".to_string());
        }
        out.push(MakeupInput {
            session_id,
            date,
            start,
            end,
        });
    }
    Ok(out)
}

fn load_cancel_target(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<(CancelTarget, String)>, rusqlite::Error> {
    conn.query_row(
        "SELECT class_id, phase_number, scheduled_date, status
         FROM class_sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok((
                CancelTarget {
                    session_id: session_id.to_string(),
                    class_id: r.get(0)?,
                    phase_number: r.get(1)?,
                    scheduled_date: r.get(2)?,
                },
                r.get::<_, String>(3)?,
            ))
        },
    )
    .optional()
}

/// Cancels a same-phase batch of scheduled sessions and inserts their paired
/// makeup sessions, all or nothing. Makeup slots are taken exactly as the
/// caller supplied them; they are not re-checked for conflicts here. The
/// class's nominal end date is never extended.
fn handle_suspensions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let reason = opt_str(&req.params, "reason").unwrap_or_default();
    let session_ids = match parse_session_ids(req.params.get("sessionIds")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let makeups = match parse_makeups(req.params.get("makeups")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    // Cancellation list and makeup list must pair one to one, by session id.
    if makeups.len() != session_ids.len() {
        return err(
            &req.id,
            "validation_failed",
            "makeups must pair one entry per cancelled session",
            Some(json!({
                "sessionCount": session_ids.len(),
                "makeupCount": makeups.len(),
            })),
        );
    }
    let id_set: HashSet<&str> = session_ids.iter().map(|s| s.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    for m in &makeups {
        if !id_set.contains(m.session_id.as_str()) {
            return err(
                &req.id,
                "validation_failed",
                format!("makeup references unknown session id: {}", m.session_id),
                None,
            );
        }
        if !seen.insert(m.session_id.as_str()) {
            return err(
                &req.id,
                "validation_failed",
                format!("makeup pairs session id twice: {}", m.session_id),
                None,
            );
        }
    }

    let mut targets: Vec<CancelTarget> = Vec::with_capacity(session_ids.len());
    for sid in &session_ids {
        let loaded = match load_cancel_target(conn, sid) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let Some((target, status)) = loaded else {
            return err(
                &req.id,
                "validation_failed",
                format!("session not found: {}", sid),
                None,
            );
        };
        if status != schedule::STATUS_SCHEDULED {
            return err(
                &req.id,
                "validation_failed",
                "only scheduled sessions can be suspended",
                Some(json!({ "sessionId": sid, "status": status })),
            );
        }
        targets.push(target);
    }

    // A suspension batch stays within one class and one phase so makeup
    // numbering continues a single phase's sequence.
    let class_id = targets[0].class_id.clone();
    let phase_number = targets[0].phase_number;
    for t in &targets {
        if t.class_id != class_id {
            return err(
                &req.id,
                "validation_failed",
                "all sessions must belong to the same class",
                Some(json!({ "sessionId": t.session_id })),
            );
        }
        if t.phase_number != phase_number {
            return err(
                &req.id,
                "validation_failed",
                "all sessions must belong to the same phase",
                Some(json!({
                    "sessionId": t.session_id,
                    "phaseNumber": t.phase_number,
                    "expectedPhaseNumber": phase_number,
                })),
            );
        }
    }

    let teacher_id: Option<String> = match conn
        .query_row(
            "SELECT teacher_id FROM classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Date range spans everything the event touches, cancelled and makeup.
    let mut all_dates: Vec<NaiveDate> = makeups.iter().map(|m| m.date).collect();
    for t in &targets {
        if let Some(d) = schedule::parse_date(&t.scheduled_date) {
            all_dates.push(d);
        }
    }
    let start_date = all_dates.iter().min().copied().map(schedule::format_date);
    let end_date = all_dates.iter().max().copied().map(schedule::format_date);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let suspension_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO suspensions(id, name, reason, status, start_date, end_date, created_at)
         VALUES(?, ?, ?, 'active', ?, ?, ?)",
        params![suspension_id, name, reason, start_date, end_date, now_ts()],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "suspensions" })),
        );
    }

    for t in &targets {
        let res = tx.execute(
            "UPDATE class_sessions
             SET status = 'cancelled',
                 suspension_id = ?,
                 notes = CASE WHEN notes = '' THEN ? ELSE notes || char(10) || ? END
             WHERE id = ?",
            params![
                suspension_id,
                format!("suspended: {}", name),
                format!("suspended: {}", name),
                t.session_id
            ],
        );
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    // Makeups continue the phase's numbering from the highest index in use.
    let max_in_phase: i64 = match tx.query_row(
        "SELECT COALESCE(MAX(session_in_phase), 0) FROM class_sessions
         WHERE class_id = ? AND phase_number = ?",
        params![class_id, phase_number],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    let mut next_in_phase = max_in_phase;
    for m in &makeups {
        next_in_phase += 1;
        let original = targets
            .iter()
            .find(|t| t.session_id == m.session_id)
            .map(|t| t.scheduled_date.clone())
            .unwrap_or_default();
        let res = tx.execute(
            "INSERT INTO class_sessions(
                id, class_id, phase_number, session_in_phase, scheduled_date,
                scheduled_start, scheduled_end, original_teacher_id,
                assigned_teacher_id, status, notes, suspension_id)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 'rescheduled', ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                class_id,
                phase_number,
                next_in_phase,
                schedule::format_date(m.date),
                schedule::format_time(m.start),
                schedule::format_time(m.end),
                teacher_id,
                teacher_id,
                format!("makeup for {}", original),
                suspension_id,
            ],
        );
        if let Err(e) = res {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "class_sessions" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "suspensionId": suspension_id,
            "cancelledCount": targets.len(),
            "makeupCount": makeups.len(),
        }),
    )
}

fn handle_suspensions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           su.id,
           su.name,
           su.reason,
           su.status,
           su.start_date,
           su.end_date,
           su.created_at,
           (SELECT COUNT(*) FROM class_sessions s
              WHERE s.suspension_id = su.id AND s.status = 'cancelled') AS cancelled_count,
           (SELECT COUNT(*) FROM class_sessions s
              WHERE s.suspension_id = su.id AND s.status != 'cancelled') AS makeup_count
         FROM suspensions su
         ORDER BY su.created_at DESC, su.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "reason": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "startDate": r.get::<_, Option<String>>(4)?,
                "endDate": r.get::<_, Option<String>>(5)?,
                "createdAt": r.get::<_, String>(6)?,
                "cancelledCount": r.get::<_, i64>(7)?,
                "makeupCount": r.get::<_, i64>(8)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(suspensions) => ok(&req.id, json!({ "suspensions": suspensions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_suspensions_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let suspension_id = match required_str(req, "suspensionId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let head = conn
        .query_row(
            "SELECT id, name, reason, status, start_date, end_date, created_at
             FROM suspensions WHERE id = ?",
            [&suspension_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "reason": r.get::<_, String>(2)?,
                    "status": r.get::<_, String>(3)?,
                    "startDate": r.get::<_, Option<String>>(4)?,
                    "endDate": r.get::<_, Option<String>>(5)?,
                    "createdAt": r.get::<_, String>(6)?,
                }))
            },
        )
        .optional();
    let head = match head {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "suspension not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM class_sessions
         WHERE suspension_id = ?
         ORDER BY scheduled_date, session_in_phase",
        SESSION_COLUMNS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&suspension_id], session_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let (cancelled, makeups): (Vec<_>, Vec<_>) = rows
        .into_iter()
        .partition(|s| s.get("status").and_then(|v| v.as_str()) == Some("cancelled"));

    ok(
        &req.id,
        json!({
            "suspension": head,
            "cancelledSessions": cancelled,
            "makeupSessions": makeups,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "suspensions.create" => Some(handle_suspensions_create(state, req)),
        "suspensions.list" => Some(handle_suspensions_list(state, req)),
        "suspensions.open" => Some(handle_suspensions_open(state, req)),
        _ => None,
    }
}
