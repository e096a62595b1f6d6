
use serde_json::json;
use test_support::{
    create_curriculum, create_teacher, mon_wed_schedule, request_ok, select_workspace,
    spawn_sidecar, temp_dir,
};

#[test]
fn generate_twice_yields_same_stored_set() {
    let workspace = temp_dir("timetable-generate-idempotent");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let teacher_id = create_teacher(&mut stdin, &mut reader, "Chen Wei");
    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Beginner A", 4, 5);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Beginner A Mon/Wed",
            "room": "301",
            "teacherId": teacher_id,
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
    assert_eq!(created.pointer("/generated/created").and_then(|v| v.as_i64()), Some(20));
    assert_eq!(created.pointer("/generated/updated").and_then(|v| v.as_i64()), Some(0));

    // Concrete scenario: 4 phases x 5 sessions starting Monday 2025-06-02.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    let sessions = listed.get("sessions").and_then(|v| v.as_array()).expect("sessions");
    assert_eq!(sessions.len(), 20);
    let dates: Vec<&str> = sessions
        .iter()
        .filter_map(|s| s.get("scheduledDate").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(&dates[..4], &["2025-06-02", "2025-06-04", "2025-06-09", "2025-06-11"]);
    assert_eq!(sessions[5].get("phaseNumber").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(sessions[5].get("sessionInPhase").and_then(|v| v.as_i64()), Some(1));
    for s in sessions {
        assert_eq!(s.get("status").and_then(|v| v.as_str()), Some("scheduled"));
        assert_eq!(
            s.get("assignedTeacherId").and_then(|v| v.as_str()),
            Some(teacher_id.as_str())
        );
    }

    // A second generate run must update everything in place, not duplicate.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.generate",
        json!({ "classId": class_id }),
    );
    assert_eq!(second.get("created").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(second.get("updated").and_then(|v| v.as_i64()), Some(20));
    assert_eq!(
        second
            .get("skipped")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let relisted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        relisted
            .get("sessions")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(20)
    );
}

#[test]
fn expand_preview_is_pure() {
    let workspace = temp_dir("timetable-expand-preview");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Preview", 2, 3);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Preview Class",
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

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.expand",
        json!({ "classId": class_id }),
    );
    assert_eq!(preview.get("total").and_then(|v| v.as_i64()), Some(6));
    let occurrences = preview
        .get("occurrences")
        .and_then(|v| v.as_array())
        .expect("occurrences");
    assert_eq!(occurrences[0].get("date").and_then(|v| v.as_str()), Some("2025-06-02"));
    assert_eq!(occurrences[3].get("phaseNumber").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(occurrences[3].get("sessionInPhase").and_then(|v| v.as_i64()), Some(1));

    // Preview must not have materialized anything beyond the initial set.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        listed
            .get("sessions")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(6)
    );
}
