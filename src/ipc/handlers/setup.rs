use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Scheduling,
    Suspensions,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduling" => Some(Self::Scheduling),
            "suspensions" => Some(Self::Suspensions),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Scheduling => "setup.scheduling",
            Self::Suspensions => "setup.suspensions",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Scheduling => json!({
            "defaultSessionMinutes": 60,
            "weekStartsOn": "sunday",
            "allowPastStartDates": true
        }),
        SetupSection::Suspensions => json!({
            "makeupInheritsTime": true,
            "requireReason": false
        }),
    }
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut value = default_section(section);
    if let Some(stored) = db::settings_get_json(conn, section.key())? {
        if let (Some(base), Some(patch)) = (value.as_object_mut(), stored.as_object()) {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(value)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let Some(base) = current.as_object_mut() else {
        return Err("section is not an object".to_string());
    };
    for (k, v) in patch {
        if !base.contains_key(k) {
            return Err(format!("unknown key: {}", k));
        }
        // Durations are a single typed value; ambiguous legacy encodings
        // (objects, stringified numbers) are rejected at the boundary.
        if k == "defaultSessionMinutes" {
            let minutes = v.as_i64().filter(|m| *m > 0);
            if minutes.is_none() {
                return Err("defaultSessionMinutes must be a positive integer".to_string());
            }
        }
        if matches!(section, SetupSection::Scheduling) && k == "weekStartsOn" {
            let valid = v
                .as_str()
                .map(|s| crate::schedule::weekday_index(s).is_some())
                .unwrap_or(false);
            if !valid {
                return Err("weekStartsOn must be a day name".to_string());
            }
        }
        base.insert(k.clone(), v.clone());
    }
    Ok(())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let scheduling = match load_section(conn, SetupSection::Scheduling) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let suspensions = match load_section(conn, SetupSection::Suspensions) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "scheduling": scheduling,
            "suspensions": suspensions
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
