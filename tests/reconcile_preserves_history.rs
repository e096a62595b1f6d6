
use serde_json::json;
use test_support::{
    create_curriculum, mon_wed_schedule, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn completed_sessions_survive_a_pattern_change_and_stale_scheduled_rows_do_not() {
    let workspace = temp_dir("timetable-reconcile-history");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "History Curriculum", 1, 4);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "History Class",
            "curriculumId": curriculum_id,
            "startDate": "2025-06-02",
            "schedule": mon_wed_schedule()
        }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    let sessions = listed.get("sessions").and_then(|v| v.as_array()).expect("sessions");
    assert_eq!(sessions.len(), 4);

    // The first session has already happened; record it with actuals.
    let first_id = sessions[0]
        .get("id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.update",
        json!({
            "sessionId": first_id.clone(),
            "status": "completed",
            "actualDate": "2025-06-02",
            "actualStart": "09:05",
            "actualEnd": "10:02",
            "notes": "covered unit 1 intro"
        }),
    );

    // Move the whole class to Friday only. Every remaining scheduled row
    // becomes stale; the completed one is historical and stays.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.update",
        json!({
            "classId": class_id,
            "schedule": [
                { "weekday": "friday", "startTime": "14:00", "endTime": "15:00" }
            ]
        }),
    );
    let reconciled = updated.get("reconciled").expect("reconcile summary");
    assert_eq!(reconciled.get("deleted").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(reconciled.get("created").and_then(|v| v.as_i64()), Some(4));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    let sessions = after.get("sessions").and_then(|v| v.as_array()).expect("sessions");
    // Four fresh Friday rows plus the preserved completed Monday row.
    assert_eq!(sessions.len(), 5);

    let completed: Vec<_> = sessions
        .iter()
        .filter(|s| s.get("status").and_then(|v| v.as_str()) == Some("completed"))
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(
        completed[0].get("id").and_then(|v| v.as_str()),
        Some(first_id.as_str())
    );
    assert_eq!(
        completed[0].get("actualStart").and_then(|v| v.as_str()),
        Some("09:05")
    );
    assert_eq!(
        completed[0].get("notes").and_then(|v| v.as_str()),
        Some("covered unit 1 intro")
    );

    let fridays: Vec<&str> = sessions
        .iter()
        .filter(|s| s.get("status").and_then(|v| v.as_str()) == Some("scheduled"))
        .filter_map(|s| s.get("scheduledDate").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(fridays, vec!["2025-06-06", "2025-06-13", "2025-06-20", "2025-06-27"]);
}

#[test]
fn upsert_refreshes_times_but_never_operator_data() {
    let workspace = temp_dir("timetable-reconcile-operator-data");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Operator Curriculum", 1, 2);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Operator Class",
            "curriculumId": curriculum_id,
            "startDate": "2025-06-02",
            "schedule": [
                { "weekday": "monday", "startTime": "09:00", "endTime": "10:00" }
            ]
        }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    let first_id = listed
        .pointer("/sessions/0/id")
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.update",
        json!({ "sessionId": first_id.clone(), "notes": "projector reserved" }),
    );

    // Same weekdays, later hour: the dates all survive, so the natural keys
    // match and the rows update in place.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.update",
        json!({
            "classId": class_id,
            "schedule": [
                { "weekday": "monday", "startTime": "10:00", "endTime": "11:30" }
            ]
        }),
    );
    let reconciled = updated.get("reconciled").expect("reconcile summary");
    assert_eq!(reconciled.get("updated").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(reconciled.get("created").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(reconciled.get("deleted").and_then(|v| v.as_i64()), Some(0));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    let sessions = after.get("sessions").and_then(|v| v.as_array()).expect("sessions");
    assert_eq!(sessions.len(), 2);
    assert_eq!(
        sessions[0].get("scheduledStart").and_then(|v| v.as_str()),
        Some("10:00")
    );
    assert_eq!(
        sessions[0].get("scheduledEnd").and_then(|v| v.as_str()),
        Some("11:30")
    );
    assert_eq!(
        sessions[0].get("notes").and_then(|v| v.as_str()),
        Some("projector reserved")
    );
    assert_eq!(
        sessions[0].get("id").and_then(|v| v.as_str()),
        Some(first_id.as_str())
    );
}
