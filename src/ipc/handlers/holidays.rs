use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, parse_date_value};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use serde_json::json;

/// Replaces the holiday calendar wholesale. Holiday dates are consumed by
/// the expansion walker as a membership set; they are maintained here, not
/// derived.
fn handle_holidays_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(entries) = req.params.get("holidays").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "holidays must be an array", None);
    };

    let mut parsed: Vec<(String, String)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let date = match parse_date_value(entry.get("date"), "holidays[].date") {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", m, None),
        };
        let name = entry
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        parsed.push((schedule::format_date(date), name));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM holidays", []) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    for (date, name) in &parsed {
        if let Err(e) = tx.execute(
            "INSERT INTO holidays(date, name) VALUES(?, ?)
             ON CONFLICT(date) DO UPDATE SET name = excluded.name",
            (date, name),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "holidays" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "count": parsed.len() }))
}

fn handle_holidays_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare("SELECT date, name FROM holidays ORDER BY date") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(holidays) => ok(&req.id, json!({ "holidays": holidays })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "holidays.set" => Some(handle_holidays_set(state, req)),
        "holidays.list" => Some(handle_holidays_list(state, req)),
        _ => None,
    }
}
