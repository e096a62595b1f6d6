use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct TemplateInput {
    phase_number: i64,
    session_in_phase: i64,
    template_id: String,
    title: Option<String>,
}

fn parse_templates(params: &serde_json::Value) -> Result<Vec<TemplateInput>, String> {
    let Some(raw) = params.get("templates") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let arr = raw.as_array().ok_or("templates must be an array")?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let phase_number = item
            .get("phaseNumber")
            .and_then(|v| v.as_i64())
            .filter(|v| *v >= 1)
            .ok_or("templates[].phaseNumber must be a positive integer")?;
        let session_in_phase = item
            .get("sessionInPhase")
            .and_then(|v| v.as_i64())
            .filter(|v| *v >= 1)
            .ok_or("templates[].sessionInPhase must be a positive integer")?;
        let template_id = item
            .get("templateId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or("templates[].templateId must be a non-empty string")?;
        let title = item
            .get("title")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        out.push(TemplateInput {
            phase_number,
            session_in_phase,
            template_id,
            title,
        });
    }
    Ok(out)
}

fn handle_curricula_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let phase_count = match req
        .params
        .get("phaseCount")
        .and_then(|v| v.as_i64())
        .filter(|v| *v >= 1)
    {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "bad_params",
                "phaseCount must be a positive integer",
                None,
            )
        }
    };
    let sessions_per_phase = match req
        .params
        .get("sessionsPerPhase")
        .and_then(|v| v.as_i64())
        .filter(|v| *v >= 1)
    {
        Some(v) => v,
        None => {
            return err(
                &req.id,
                "bad_params",
                "sessionsPerPhase must be a positive integer",
                None,
            )
        }
    };
    let templates = match parse_templates(&req.params) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let curriculum_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO curricula(id, name, phase_count, sessions_per_phase) VALUES(?, ?, ?, ?)",
        params![curriculum_id, name, phase_count, sessions_per_phase],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "curricula" })),
        );
    }

    for t in &templates {
        if let Err(e) = tx.execute(
            "INSERT INTO curriculum_templates(curriculum_id, phase_number, session_in_phase, template_id, title)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(curriculum_id, phase_number, session_in_phase) DO UPDATE SET
               template_id = excluded.template_id,
               title = excluded.title",
            params![curriculum_id, t.phase_number, t.session_in_phase, t.template_id, t.title],
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "curriculum_templates" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "curriculumId": curriculum_id,
            "name": name,
            "phaseCount": phase_count,
            "sessionsPerPhase": sessions_per_phase,
            "templateCount": templates.len()
        }),
    )
}

fn handle_curricula_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT
           cu.id,
           cu.name,
           cu.phase_count,
           cu.sessions_per_phase,
           (SELECT COUNT(*) FROM curriculum_templates ct WHERE ct.curriculum_id = cu.id) AS template_count
         FROM curricula cu
         ORDER BY cu.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "phaseCount": r.get::<_, i64>(2)?,
                "sessionsPerPhase": r.get::<_, i64>(3)?,
                "templateCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(curricula) => ok(&req.id, json!({ "curricula": curricula })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_curricula_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let curriculum_id = match required_str(req, "curriculumId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let head = conn
        .query_row(
            "SELECT id, name, phase_count, sessions_per_phase FROM curricula WHERE id = ?",
            [&curriculum_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "phaseCount": r.get::<_, i64>(2)?,
                    "sessionsPerPhase": r.get::<_, i64>(3)?,
                }))
            },
        )
        .optional();
    let head = match head {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "curriculum not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT phase_number, session_in_phase, template_id, title
         FROM curriculum_templates
         WHERE curriculum_id = ?
         ORDER BY phase_number, session_in_phase",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let templates = stmt
        .query_map([&curriculum_id], |r| {
            Ok(json!({
                "phaseNumber": r.get::<_, i64>(0)?,
                "sessionInPhase": r.get::<_, i64>(1)?,
                "templateId": r.get::<_, String>(2)?,
                "title": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let templates = match templates {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "curriculum": head, "templates": templates }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "curricula.create" => Some(handle_curricula_create(state, req)),
        "curricula.list" => Some(handle_curricula_list(state, req)),
        "curricula.open" => Some(handle_curricula_open(state, req)),
        _ => None,
    }
}
