use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, parse_time_value, parse_weekday_value, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use chrono::NaiveTime;
use rusqlite::params;
use serde_json::json;

// Advisory checks: callers reject the write when a conflict is reported.
// The scan runs outside the transaction that later commits the new schedule,
// so a narrow check-then-act window exists under concurrent writers;
// accepted at human scheduling pace. Rows whose stored times or dates no
// longer parse are skipped fail-open and surfaced in `scanSkipped`.

struct CandidateSlot {
    weekday: u32,
    start: NaiveTime,
    end: NaiveTime,
}

fn handle_check_room(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let room = match required_str(req, "room") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weekday = match req.params.get("weekday") {
        Some(v) => match parse_weekday_value(v) {
            Ok(w) => w,
            Err(m) => return err(&req.id, "bad_params", m, None),
        },
        None => return err(&req.id, "bad_params", "missing weekday", None),
    };
    let start = match parse_time_value(req.params.get("startTime"), "startTime") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let end = match parse_time_value(req.params.get("endTime"), "endTime") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if start >= end {
        return err(&req.id, "bad_params", "startTime must be before endTime", None);
    }
    let exclude = opt_str(&req.params, "excludeClassId").unwrap_or_default();

    let mut stmt = match conn.prepare(
        "SELECT cs.class_id, c.name, cs.start_time, cs.end_time
         FROM class_schedules cs
         JOIN classes c ON c.id = cs.class_id
         WHERE c.room = ? AND c.status = 'active' AND cs.weekday = ?
           AND cs.enabled = 1 AND cs.class_id != ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params![room, weekday, exclude], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut conflicts = Vec::new();
    let mut scan_skipped = 0i64;
    for (class_id, class_name, start_raw, end_raw) in rows {
        let (Some(existing_start), Some(existing_end)) =
            (schedule::parse_time(&start_raw), schedule::parse_time(&end_raw))
        else {
            scan_skipped += 1;
            eprintln!(
                "conflicts.checkRoom: unparseable schedule times for class {}, skipping",
                class_id
            );
            continue;
        };
        if schedule::intervals_overlap(start, end, existing_start, existing_end) {
            conflicts.push(json!({
                "classId": class_id,
                "className": class_name,
                "weekday": weekday,
                "weekdayName": schedule::weekday_name(weekday),
                "startTime": start_raw,
                "endTime": end_raw,
            }));
        }
    }

    ok(
        &req.id,
        json!({
            "room": room,
            "conflicts": conflicts,
            "scanSkipped": scan_skipped,
        }),
    )
}

fn parse_slots(raw: Option<&serde_json::Value>) -> Result<Vec<CandidateSlot>, String> {
    let arr = raw
        .and_then(|v| v.as_array())
        .ok_or("slots must be an array")?;
    if arr.is_empty() {
        return Err("slots must not be empty".to_string());
    }
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let weekday = match item.get("weekday") {
            Some(v) => parse_weekday_value(v)?,
            None => return Err("missing slots[].weekday".to_string()),
        };
        let start = parse_time_value(item.get("startTime"), "slots[].startTime")?;
        let end = parse_time_value(item.get("endTime"), "slots[].endTime")?;
        if start >= end {
            return Err("slots[].startTime must be before endTime".to_string());
        }
        out.push(CandidateSlot {
            weekday,
            start,
            end,
        });
    }
    Ok(out)
}

/// Pattern-level check: a session already assigned to the teacher on some
/// Tuesday 09:00-10:00 collides with a candidate Tuesday slot regardless of
/// the concrete date.
fn handle_check_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let slots = match parse_slots(req.params.get("slots")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let exclude = opt_str(&req.params, "excludeClassId").unwrap_or_default();

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.class_id, c.name, s.scheduled_date, s.scheduled_start, s.scheduled_end
         FROM class_sessions s
         JOIN classes c ON c.id = s.class_id
         WHERE s.assigned_teacher_id = ?
           AND s.status IN ('scheduled', 'completed')
           AND s.class_id != ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params![teacher_id, exclude], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut conflicts = Vec::new();
    let mut scan_skipped = 0i64;
    for (session_id, class_id, class_name, date_raw, start_raw, end_raw) in rows {
        let (Some(date), Some(existing_start), Some(existing_end)) = (
            schedule::parse_date(&date_raw),
            schedule::parse_time(&start_raw),
            schedule::parse_time(&end_raw),
        ) else {
            scan_skipped += 1;
            eprintln!(
                "conflicts.checkTeacher: unparseable session fields for {}, skipping",
                session_id
            );
            continue;
        };
        let session_weekday = schedule::date_weekday_index(date);
        for slot in &slots {
            if slot.weekday != session_weekday {
                continue;
            }
            if schedule::intervals_overlap(slot.start, slot.end, existing_start, existing_end) {
                conflicts.push(json!({
                    "slot": {
                        "weekday": slot.weekday,
                        "weekdayName": schedule::weekday_name(slot.weekday),
                        "startTime": schedule::format_time(slot.start),
                        "endTime": schedule::format_time(slot.end),
                    },
                    "sessionId": session_id,
                    "classId": class_id,
                    "className": class_name,
                    "scheduledDate": date_raw,
                    "startTime": start_raw,
                    "endTime": end_raw,
                }));
            }
        }
    }

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "conflicts": conflicts,
            "scanSkipped": scan_skipped,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "conflicts.checkRoom" => Some(handle_check_room(state, req)),
        "conflicts.checkTeacher" => Some(handle_check_teacher(state, req)),
        _ => None,
    }
}
