
use serde_json::json;
use test_support::{mon_wed_schedule, request, select_workspace, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("timetable-router-smoke");
    let bundle_out = workspace.join("smoke-backup.ttbackup.zip");
    let csv_out = workspace.join("smoke-sessions.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));

    select_workspace(&mut stdin, &mut reader, &workspace);

    let methods: Vec<(&str, serde_json::Value)> = vec![
        ("setup.get", json!({})),
        (
            "setup.update",
            json!({ "section": "scheduling", "patch": { "defaultSessionMinutes": 90 } }),
        ),
        ("teachers.create", json!({ "name": "Smoke Teacher" })),
        ("teachers.list", json!({})),
        (
            "curricula.create",
            json!({ "name": "Smoke Curriculum", "phaseCount": 1, "sessionsPerPhase": 2 }),
        ),
        ("curricula.list", json!({})),
        (
            "holidays.set",
            json!({ "holidays": [{ "date": "2025-12-25", "name": "Christmas" }] }),
        ),
        ("holidays.list", json!({})),
        ("classes.list", json!({})),
        ("suspensions.list", json!({})),
        (
            "conflicts.checkRoom",
            json!({ "room": "101", "weekday": "monday", "startTime": "09:00", "endTime": "10:00" }),
        ),
        (
            "conflicts.checkTeacher",
            json!({
                "teacherId": "nobody",
                "slots": [{ "weekday": "monday", "startTime": "09:00", "endTime": "10:00" }]
            }),
        ),
    ];
    for (i, (method, params)) in methods.into_iter().enumerate() {
        let value = request(&mut stdin, &mut reader, &format!("m{}", i), method, params);
        let code = value
            .pointer("/error/code")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        assert_ne!(code, "not_implemented", "unknown method {}", method);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "method {} failed: {}",
            method,
            value
        );
    }

    // Class + session surface, end to end.
    let curricula = request(&mut stdin, &mut reader, "c1", "curricula.list", json!({}));
    let curriculum_id = curricula
        .pointer("/result/curricula/0/id")
        .and_then(|v| v.as_str())
        .expect("curriculum id")
        .to_string();
    let created = request(
        &mut stdin,
        &mut reader,
        "c2",
        "classes.create",
        json!({
            "name": "Smoke Class",
            "room": "101",
            "curriculumId": curriculum_id,
            "startDate": "2025-06-02",
            "schedule": mon_wed_schedule()
        }),
    );
    assert_eq!(created.get("ok").and_then(|v| v.as_bool()), Some(true));
    let class_id = created
        .pointer("/result/classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    for (i, method) in [
        "sessions.expand",
        "sessions.generate",
        "sessions.reconcile",
        "sessions.list",
        "classes.open",
    ]
    .iter()
    .enumerate()
    {
        let value = request(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            method,
            json!({ "classId": class_id }),
        );
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "method {} failed: {}",
            method,
            value
        );
    }

    let exported = request(
        &mut stdin,
        &mut reader,
        "b1",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(exported.get("ok").and_then(|v| v.as_bool()), Some(true));

    let csv = request(
        &mut stdin,
        &mut reader,
        "b2",
        "exchange.exportSessionsCsv",
        json!({ "classId": class_id, "outPath": csv_out.to_string_lossy() }),
    );
    assert_eq!(csv.get("ok").and_then(|v| v.as_bool()), Some(true));

    let unknown = request(&mut stdin, &mut reader, "z", "no.such.method", json!({}));
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
}
