
use serde_json::json;
use test_support::{
    create_curriculum, mon_wed_schedule, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn holiday_pushes_occurrences_forward_without_losing_count() {
    let workspace = temp_dir("timetable-holiday-shift");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "holidays.set",
        json!({
            "holidays": [
                { "date": "2025-06-04", "name": "Dragon Boat Festival" }
            ]
        }),
    );

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Holiday Curriculum", 1, 4);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({
            "name": "Holiday Class",
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
        "3",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    let sessions = listed.get("sessions").and_then(|v| v.as_array()).expect("sessions");
    assert_eq!(sessions.len(), 4);
    let dates: Vec<&str> = sessions
        .iter()
        .filter_map(|s| s.get("scheduledDate").and_then(|v| v.as_str()))
        .collect();
    // The Wednesday holiday shifts everything one matching weekday later.
    assert_eq!(dates, vec!["2025-06-02", "2025-06-09", "2025-06-11", "2025-06-16"]);
}

#[test]
fn adding_a_holiday_then_reconciling_moves_scheduled_sessions() {
    let workspace = temp_dir("timetable-holiday-reconcile");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Shift Curriculum", 1, 4);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Shift Class",
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

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "holidays.set",
        json!({ "holidays": [{ "date": "2025-06-04", "name": "Typhoon Day" }] }),
    );

    let reconciled = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.reconcile",
        json!({ "classId": class_id }),
    );
    // Dropping 2025-06-04 renumbers every later occurrence, so the three
    // shifted (phase, session, date) keys are fresh rows and the three
    // stale scheduled rows behind them are removed.
    assert_eq!(reconciled.get("created").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(reconciled.get("updated").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(reconciled.get("deleted").and_then(|v| v.as_i64()), Some(3));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    let dates: Vec<&str> = listed
        .get("sessions")
        .and_then(|v| v.as_array())
        .expect("sessions")
        .iter()
        .filter_map(|s| s.get("scheduledDate").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(dates, vec!["2025-06-02", "2025-06-09", "2025-06-11", "2025-06-16"]);
}
