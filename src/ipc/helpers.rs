use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_str(params: &JsonValue, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

/// Weekday params come in as a number (0=Sun..6=Sat) or a day name; both go
/// through the shared table in `schedule`.
pub fn parse_weekday_value(v: &JsonValue) -> Result<u32, String> {
    if let Some(n) = v.as_i64() {
        if (0..=6).contains(&n) {
            return Ok(n as u32);
        }
        return Err("weekday number must be 0..6".to_string());
    }
    if let Some(s) = v.as_str() {
        return schedule::weekday_index(s).ok_or_else(|| format!("unknown weekday: {}", s));
    }
    Err("weekday must be a number or a day name".to_string())
}

pub fn parse_date_value(v: Option<&JsonValue>, key: &str) -> Result<NaiveDate, String> {
    let raw = v
        .and_then(|x| x.as_str())
        .ok_or_else(|| format!("missing {}", key))?;
    schedule::parse_date(raw).ok_or_else(|| format!("{} must be YYYY-MM-DD", key))
}

pub fn parse_time_value(v: Option<&JsonValue>, key: &str) -> Result<NaiveTime, String> {
    let raw = v
        .and_then(|x| x.as_str())
        .ok_or_else(|| format!("missing {}", key))?;
    schedule::parse_time(raw).ok_or_else(|| format!("{} must be HH:MM", key))
}

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

pub fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}
