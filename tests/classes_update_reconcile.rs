
use serde_json::json;
use test_support::{
    create_curriculum, create_teacher, mon_wed_schedule, request_ok, select_workspace,
    spawn_sidecar, temp_dir,
};

#[test]
fn teacher_change_reassigns_scheduled_sessions_but_keeps_the_original() {
    let workspace = temp_dir("timetable-class-teacher-change");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let first_teacher = create_teacher(&mut stdin, &mut reader, "Founding Teacher");
    let second_teacher = create_teacher(&mut stdin, &mut reader, "Replacement Teacher");
    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Handover Curriculum", 1, 3);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Handover Class",
            "teacherId": first_teacher.clone(),
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

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.update",
        json!({ "classId": class_id, "teacherId": second_teacher.clone() }),
    );
    let reconciled = updated.get("reconciled").expect("reconcile summary");
    assert_eq!(reconciled.get("updated").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(reconciled.get("created").and_then(|v| v.as_i64()), Some(0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.list",
        json!({ "classId": class_id }),
    );
    for s in listed.get("sessions").and_then(|v| v.as_array()).expect("sessions") {
        assert_eq!(
            s.get("assignedTeacherId").and_then(|v| v.as_str()),
            Some(second_teacher.as_str())
        );
        assert_eq!(
            s.get("originalTeacherId").and_then(|v| v.as_str()),
            Some(first_teacher.as_str())
        );
    }
}

#[test]
fn start_date_change_regenerates_from_the_new_anchor() {
    let workspace = temp_dir("timetable-class-start-change");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Anchor Curriculum", 1, 4);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Anchor Class",
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
        "classes.update",
        json!({ "classId": class_id, "startDate": "2025-07-01" }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
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
    // 2025-07-01 is a Tuesday; the walk opens on Wednesday the 2nd.
    assert_eq!(dates, vec!["2025-07-02", "2025-07-07", "2025-07-09", "2025-07-14"]);
}

#[test]
fn plain_field_edits_do_not_touch_sessions() {
    let workspace = temp_dir("timetable-class-plain-edit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Plain Curriculum", 1, 2);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Plain Class",
            "room": "101",
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

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.update",
        json!({ "classId": class_id, "name": "Renamed Class", "room": "102" }),
    );
    assert_eq!(updated.get("reconciled"), Some(&serde_json::Value::Null));

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.open",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        opened.pointer("/class/name").and_then(|v| v.as_str()),
        Some("Renamed Class")
    );
    assert_eq!(
        opened.pointer("/class/room").and_then(|v| v.as_str()),
        Some("102")
    );
}
