
use serde_json::json;
use test_support::{
    create_curriculum, mon_wed_schedule, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn room_overlap_is_half_open_and_excludes_the_edited_class() {
    let workspace = temp_dir("timetable-room-boundary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Room Curriculum", 1, 4);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Morning Class",
            "room": "301",
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

    // Exactly touching intervals do not collide.
    let touching = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "conflicts.checkRoom",
        json!({
            "room": "301",
            "weekday": "monday",
            "startTime": "10:00",
            "endTime": "11:00"
        }),
    );
    assert_eq!(
        touching
            .get("conflicts")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // One shared minute is a conflict.
    let overlapping = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "conflicts.checkRoom",
        json!({
            "room": "301",
            "weekday": "monday",
            "startTime": "09:59",
            "endTime": "10:01"
        }),
    );
    let conflicts = overlapping
        .get("conflicts")
        .and_then(|v| v.as_array())
        .expect("conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(
        conflicts[0].get("classId").and_then(|v| v.as_str()),
        Some(class_id.as_str())
    );
    assert_eq!(
        conflicts[0].get("weekdayName").and_then(|v| v.as_str()),
        Some("monday")
    );

    // A different room or a different weekday is clean.
    let other_room = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "conflicts.checkRoom",
        json!({
            "room": "302",
            "weekday": "monday",
            "startTime": "09:00",
            "endTime": "10:00"
        }),
    );
    assert_eq!(
        other_room
            .get("conflicts")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
    let tuesday = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "conflicts.checkRoom",
        json!({
            "room": "301",
            "weekday": "tuesday",
            "startTime": "09:00",
            "endTime": "10:00"
        }),
    );
    assert_eq!(
        tuesday
            .get("conflicts")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    // The record being edited never collides with itself.
    let excluded = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "conflicts.checkRoom",
        json!({
            "room": "301",
            "weekday": "monday",
            "startTime": "09:00",
            "endTime": "10:00",
            "excludeClassId": class_id
        }),
    );
    assert_eq!(
        excluded
            .get("conflicts")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn closed_classes_do_not_hold_their_rooms() {
    let workspace = temp_dir("timetable-room-closed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let curriculum_id = create_curriculum(&mut stdin, &mut reader, "Closed Curriculum", 1, 2);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({
            "name": "Old Class",
            "room": "204",
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
        json!({ "classId": class_id, "status": "closed" }),
    );

    let check = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "conflicts.checkRoom",
        json!({
            "room": "204",
            "weekday": "monday",
            "startTime": "09:00",
            "endTime": "10:00"
        }),
    );
    assert_eq!(
        check
            .get("conflicts")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}
