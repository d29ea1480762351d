//! End-to-end flows against a live MongoDB server.

use chrono::Utc;
use rocket::http::{ContentType, Header, Status};
use rocket::local::asynchronous::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::data::time_slot::db::TimeSlotDbExt;
use crate::data::time_slot::{SlotType, TimeSlot};
use crate::data::RecordStatus;
use crate::role::Role;
use crate::route::test_util::{live_client, token_header};

async fn send(client: &Client, method: &str, path: &str, auth: Header<'static>, body: Value) -> (Status, Value) {
    let request = match method {
        "POST" => client.post(path.to_string()),
        "PUT" => client.put(path.to_string()),
        _ => client.get(path.to_string()),
    };
    let response = request
        .header(auth)
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch()
        .await;

    let status = response.status();
    (status, response.into_json().await.unwrap_or(Value::Null))
}

async fn create(client: &Client, path: &str, body: Value) -> String {
    let (status, body) = send(client, "POST", path, token_header(Role::Admin), body).await;
    assert_eq!(status, Status::Created, "{}: {}", path, body);
    body["data"]["_id"].as_str().unwrap().to_string()
}

async fn user(client: &Client, name: &str, role: &str) -> String {
    create(
        client,
        "/api/users",
        json!({
            "name": name,
            "email": format!("{}@school.test", name.to_lowercase()),
            "password": "long-enough-password",
            "role": role,
        }),
    )
    .await
}

/// School year, one section of `capacity` seats and a Monday class in it.
struct Fixture {
    year: String,
    section: String,
    teacher: String,
    slot: String,
    course: String,
}

async fn fixture(client: &Client, capacity: u32) -> Fixture {
    let year = create(
        client,
        "/api/school-years",
        json!({ "name": "2024-2025", "start_date": "2024-03-01", "end_date": "2024-12-20" }),
    )
    .await;
    let section = create(
        client,
        "/api/sections",
        json!({ "grade": 3, "level": "primary", "letter": "A", "capacity": capacity, "school_year": year }),
    )
    .await;
    let teacher = user(client, "Teacher", "teacher").await;
    let slot = create(
        client,
        "/api/time-slots",
        json!({ "name": "First hour", "start_time": "08:00", "end_time": "08:45" }),
    )
    .await;
    let course = create(
        client,
        "/api/courses",
        json!({ "name": "Mathematics", "code": "MAT-3", "level": "primary", "grade": 3, "credits": 4 }),
    )
    .await;

    Fixture {
        year,
        section,
        teacher,
        slot,
        course,
    }
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn teachers_cannot_be_double_booked() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 30).await;

    create(
        &client,
        "/api/course-schedules",
        json!({
            "course": f.course, "section": f.section, "teacher": f.teacher,
            "time_slot": f.slot, "day_of_week": "monday",
        }),
    )
    .await;

    let other_section = create(
        &client,
        "/api/sections",
        json!({ "grade": 3, "level": "primary", "letter": "B", "capacity": 30, "school_year": f.year }),
    )
    .await;
    let (status, body) = send(
        &client,
        "POST",
        "/api/course-schedules",
        token_header(Role::Admin),
        json!({
            "course": f.course, "section": other_section, "teacher": f.teacher,
            "time_slot": f.slot, "day_of_week": "monday",
        }),
    )
    .await;
    assert_eq!(status, Status::BadRequest, "{}", body);

    // another day is free
    let (status, _) = send(
        &client,
        "POST",
        "/api/course-schedules",
        token_header(Role::Admin),
        json!({
            "course": f.course, "section": other_section, "teacher": f.teacher,
            "time_slot": f.slot, "day_of_week": "tuesday",
        }),
    )
    .await;
    assert_eq!(status, Status::Created);

    db.drop(None).await.unwrap();
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn full_sections_reject_enrollments() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 1).await;
    let ana = user(&client, "Ana", "student").await;
    let ben = user(&client, "Ben", "student").await;

    create(&client, "/api/enrollments", json!({ "student": ana, "section": f.section })).await;
    let (status, body) = send(
        &client,
        "POST",
        "/api/enrollments",
        token_header(Role::Admin),
        json!({ "student": ben, "section": f.section }),
    )
    .await;
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["message"], "Section is full.");

    let (_, section) = send(
        &client,
        "GET",
        &format!("/api/sections/{}", f.section),
        token_header(Role::Admin),
        Value::Null,
    )
    .await;
    assert_eq!(section["data"]["current_students"], 1);

    db.drop(None).await.unwrap();
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn repeated_attendance_updates_the_same_detail() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 30).await;
    let ana = user(&client, "Ana", "student").await;
    let stranger = user(&client, "Stranger", "student").await;
    create(&client, "/api/enrollments", json!({ "student": ana, "section": f.section })).await;
    create(
        &client,
        "/api/course-schedules",
        json!({
            "course": f.course, "section": f.section, "teacher": f.teacher,
            "time_slot": f.slot, "day_of_week": "monday",
        }),
    )
    .await;

    let batch = |status: &str| {
        json!({
            "date": "2024-03-04",
            "section": f.section,
            "records": [
                { "student": ana, "status": status },
                { "student": stranger, "status": "present" },
            ],
        })
    };

    let (status, first) = send(&client, "POST", "/api/attendance/bulk", token_header(Role::Admin), batch("present")).await;
    assert_eq!(status, Status::Ok);
    assert_eq!(first["data"]["succeeded"], 1);
    assert_eq!(first["data"]["results"][0]["action"], "created");
    assert_eq!(first["data"]["results"][1]["success"], false);

    let (_, second) = send(&client, "POST", "/api/attendance/bulk", token_header(Role::Admin), batch("late")).await;
    assert_eq!(second["data"]["results"][0]["action"], "updated");
    assert_eq!(second["data"]["attendance"], first["data"]["attendance"]);

    let (_, list) = send(
        &client,
        "GET",
        &format!("/api/attendance?section={}", f.section),
        token_header(Role::Admin),
        Value::Null,
    )
    .await;
    assert_eq!(list["pagination"]["total"], 1);
    assert_eq!(list["data"][0]["details"].as_array().unwrap().len(), 1);
    assert_eq!(list["data"][0]["details"][0]["status"], "late");

    db.drop(None).await.unwrap();
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn overlapping_time_slots_are_rejected() {
    let (client, db) = live_client().await;
    create(
        &client,
        "/api/time-slots",
        json!({ "name": "First hour", "start_time": "08:00", "end_time": "08:45" }),
    )
    .await;

    let (status, _) = send(
        &client,
        "POST",
        "/api/time-slots",
        token_header(Role::Admin),
        json!({ "name": "Overlap", "start_time": "08:30", "end_time": "09:15" }),
    )
    .await;
    assert_eq!(status, Status::BadRequest);

    // touching ranges don't overlap
    create(
        &client,
        "/api/time-slots",
        json!({ "name": "Second hour", "start_time": "08:45", "end_time": "09:30" }),
    )
    .await;

    db.drop(None).await.unwrap();
}

async fn schedule(client: &Client, f: &Fixture, section: &str, teacher: &str, slot: &str, extra: Value) -> (Status, Value) {
    let mut body = json!({
        "course": f.course, "section": section, "teacher": teacher,
        "time_slot": slot, "day_of_week": "monday",
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    send(client, "POST", "/api/course-schedules", token_header(Role::Admin), body).await
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn sections_cannot_be_double_booked() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 30).await;
    let substitute = user(&client, "Substitute", "teacher").await;

    let (status, _) = schedule(&client, &f, &f.section, &f.teacher, &f.slot, Value::Null).await;
    assert_eq!(status, Status::Created);

    let (status, body) = schedule(&client, &f, &f.section, &substitute, &f.slot, Value::Null).await;
    assert_eq!(status, Status::BadRequest, "{}", body);
    assert_eq!(body["message"], "Section already has a class in an overlapping time slot.");

    db.drop(None).await.unwrap();
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn overlapping_slots_collide_even_when_distinct() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 30).await;
    let (status, _) = schedule(&client, &f, &f.section, &f.teacher, &f.slot, Value::Null).await;
    assert_eq!(status, Status::Created);

    // the API refuses overlapping slots, so store one the way an older
    // dataset might carry it
    let now = Utc::now();
    let overlapping = TimeSlot {
        id: Uuid::new_v4(),
        name: "Late first hour".into(),
        start_time: "08:30".into(),
        end_time: "09:15".into(),
        slot_type: SlotType::Class,
        status: RecordStatus::Active,
        created_at: now,
        updated_at: now,
    };
    db.time_slots().insert_one(&overlapping, None).await.unwrap();

    let other_section = create(
        &client,
        "/api/sections",
        json!({ "grade": 3, "level": "primary", "letter": "B", "capacity": 30, "school_year": f.year }),
    )
    .await;
    let slot = overlapping.id.to_string();
    let (status, body) = schedule(&client, &f, &other_section, &f.teacher, &slot, Value::Null).await;
    assert_eq!(status, Status::BadRequest, "{}", body);
    assert_eq!(body["message"], "Teacher already has a class in an overlapping time slot.");

    db.drop(None).await.unwrap();
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn inactive_schedules_never_collide() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 30).await;

    let (status, body) = schedule(&client, &f, &f.section, &f.teacher, &f.slot, json!({ "status": "inactive" })).await;
    assert_eq!(status, Status::Created, "{}", body);

    let (status, body) = schedule(&client, &f, &f.section, &f.teacher, &f.slot, Value::Null).await;
    assert_eq!(status, Status::Created, "{}", body);

    // and an inactive one may shadow the active class
    let (status, _) = schedule(&client, &f, &f.section, &f.teacher, &f.slot, json!({ "status": "inactive" })).await;
    assert_eq!(status, Status::Created);

    db.drop(None).await.unwrap();
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn reactivation_keeps_one_active_enrollment_per_year() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 30).await;
    let ana = user(&client, "Ana", "student").await;
    let other_section = create(
        &client,
        "/api/sections",
        json!({ "grade": 3, "level": "primary", "letter": "B", "capacity": 30, "school_year": f.year }),
    )
    .await;

    let first = create(&client, "/api/enrollments", json!({ "student": ana, "section": f.section })).await;
    let status_path = format!("/api/enrollments/{}/status", first);
    let (status, _) = send(&client, "PUT", &status_path, token_header(Role::Admin), json!({ "status": "withdrawn" })).await;
    assert_eq!(status, Status::Ok);
    create(&client, "/api/enrollments", json!({ "student": ana, "section": other_section })).await;

    let (status, body) = send(&client, "PUT", &status_path, token_header(Role::Admin), json!({ "status": "active" })).await;
    assert_eq!(status, Status::BadRequest, "{}", body);
    assert_eq!(body["message"], "Student already has an active enrollment in this school year.");

    let (_, section) = send(
        &client,
        "GET",
        &format!("/api/sections/{}", f.section),
        token_header(Role::Admin),
        Value::Null,
    )
    .await;
    assert_eq!(section["data"]["current_students"], 0);

    db.drop(None).await.unwrap();
}

#[rocket::async_test]
#[ignore = "requires a running MongoDB instance"]
async fn concurrent_batches_keep_every_detail() {
    let (client, db) = live_client().await;
    let f = fixture(&client, 30).await;
    let (status, _) = schedule(&client, &f, &f.section, &f.teacher, &f.slot, Value::Null).await;
    assert_eq!(status, Status::Created);

    let mut students = Vec::new();
    for name in ["Ana", "Ben", "Cleo", "Dan"] {
        let id = user(&client, name, "student").await;
        create(&client, "/api/enrollments", json!({ "student": id, "section": f.section })).await;
        students.push(id);
    }
    let batch = |student: &str| {
        json!({
            "date": "2024-03-04",
            "section": f.section,
            "records": [{ "student": student, "status": "present" }],
        })
    };

    let (a, b, c, d) = tokio::join!(
        send(&client, "POST", "/api/attendance/bulk", token_header(Role::Admin), batch(&students[0])),
        send(&client, "POST", "/api/attendance/bulk", token_header(Role::Admin), batch(&students[1])),
        send(&client, "POST", "/api/attendance/bulk", token_header(Role::Admin), batch(&students[2])),
        send(&client, "POST", "/api/attendance/bulk", token_header(Role::Admin), batch(&students[3])),
    );
    for (status, body) in [a, b, c, d] {
        assert_eq!(status, Status::Ok, "{}", body);
        assert_eq!(body["data"]["succeeded"], 1);
    }

    let (_, list) = send(
        &client,
        "GET",
        &format!("/api/attendance?section={}", f.section),
        token_header(Role::Admin),
        Value::Null,
    )
    .await;
    assert_eq!(list["pagination"]["total"], 1);
    assert_eq!(list["data"][0]["details"].as_array().unwrap().len(), 4);

    db.drop(None).await.unwrap();
}
