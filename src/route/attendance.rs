use chrono::NaiveDate;
use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::attendance::db::{
    problem as attendance_problem, AttendanceDbExt, AttendanceFilter, AttendanceInput, AttendanceUpdateInput,
    BulkAttendanceInput, BulkAttendanceResult,
};
use crate::data::attendance::report::{AttendanceReportExt, MonthlyReport, StudentSummary};
use crate::data::attendance::{Attendance, AttendanceView};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::{auth_problem, UserRoleToken};
use crate::resp::problem::{problems, Problem};
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn attendance_filter(req: &Request<'_>) -> Result<AttendanceFilter, Problem> {
    Ok(AttendanceFilter {
        section: query::optional(req, "section")?,
        teacher: query::optional(req, "teacher")?,
        course_schedule: query::optional(req, "course_schedule")?,
        student: query::optional(req, "student")?,
        date: query::optional(req, "date")?,
        from: query::optional(req, "from")?,
        to: query::optional(req, "to")?,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AttendanceFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, attendance_filter(req))
    }
}

/// Query of the monthly section report.
#[derive(Debug, Clone, Copy)]
pub struct MonthQuery {
    pub section: Uuid,
    pub year: i32,
    pub month: u32,
}

fn required<T>(value: Option<T>, name: &str) -> Result<T, Problem> {
    value.ok_or_else(|| {
        problems::bad_request(format!("Missing query parameter '{}'.", name)).field(name, "is required")
    })
}

fn month_query(req: &Request<'_>) -> Result<MonthQuery, Problem> {
    Ok(MonthQuery {
        section: required(query::optional(req, "section")?, "section")?,
        year: required(query::parsed(req, "year")?, "year")?,
        month: required(query::parsed(req, "month")?, "month")?,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MonthQuery {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, month_query(req))
    }
}

/// Optional inclusive date range.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn date_range(req: &Request<'_>) -> Result<DateRange, Problem> {
    let range = DateRange {
        from: query::optional(req, "from")?,
        to: query::optional(req, "to")?,
    };
    if let (Some(from), Some(to)) = (range.from, range.to) {
        if to < from {
            return Err(problems::bad_request("Date range ends before it starts.").field("to", "must not be before 'from'"));
        }
    }
    Ok(range)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for DateRange {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, date_range(req))
    }
}

/// Teachers are limited to their own classes; admins act for anyone.
fn acting_teacher(auth: &UserRoleToken) -> Option<Uuid> {
    (auth.role == Role::Teacher).then_some(auth.user)
}

/// List attendance documents
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("section" = Option<Uuid>, Query,),
        ("teacher" = Option<Uuid>, Query,),
        ("course_schedule" = Option<Uuid>, Query,),
        ("student" = Option<Uuid>, Query, description = "Documents with a detail for this student"),
        ("date" = Option<NaiveDate>, Query,),
        ("from" = Option<NaiveDate>, Query,),
        ("to" = Option<NaiveDate>, Query,),
    ),
    responses((status = 200, description = "Page of attendance documents", body = Vec<AttendanceView>)),
    security(("jwt" = []))
)]
#[get("/attendance")]
#[tracing::instrument(skip(db))]
pub async fn attendance_list(
    auth: UserRoleToken,
    filter: AttendanceFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<AttendanceView>> {
    auth.require(Role::STAFF)?;

    let (records, total) = db.list_attendance(&filter, &page).await?;
    let views = db.populate_attendance(records).await?;
    Ok(ApiResponse::page(views, page.pagination(total)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Attendance document", body = AttendanceView),
        (status = 404, description = "No such attendance document", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/attendance/<id>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<AttendanceView> {
    auth.require(Role::STAFF)?;

    let record = db.get_attendance(id).await?.ok_or_else(|| attendance_problem::not_found(id))?;
    let view = db
        .populate_attendance(vec![record])
        .await?
        .pop()
        .ok_or_else(|| attendance_problem::not_found(id))?;
    Ok(ApiResponse::ok(view))
}

/// Record the attendance of one student
#[utoipa::path(
    request_body = AttendanceInput,
    responses(
        (status = 201, description = "Attendance recorded", body = BulkAttendanceResult),
        (status = 400, description = "Student not enrolled or no class that day", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/attendance", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_create(
    input: Json<AttendanceInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<BulkAttendanceResult> {
    auth.require(Role::STAFF)?;
    let input = BulkAttendanceInput::from(input.into_inner());
    input.validate()?;

    let result = db.record_attendance(input, acting_teacher(&auth)).await?;
    if let Some(error) = result.results.iter().find_map(|r| r.error.clone()) {
        return Err(problems::bad_request(error).insert("result", &result));
    }
    Ok(ApiResponse::created(result).message("Attendance recorded."))
}

/// Record attendance for many students at once
///
/// Records that fail (student not enrolled, no class that day) are
/// reported per item and never abort the rest of the batch.
#[utoipa::path(
    request_body = BulkAttendanceInput,
    responses(
        (status = 200, description = "Per-record results", body = BulkAttendanceResult),
        (status = 409, description = "Attendance kept changing concurrently", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/attendance/bulk", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_bulk(
    input: Json<BulkAttendanceInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<BulkAttendanceResult> {
    auth.require(Role::STAFF)?;
    input.validate()?;

    let result = db.record_attendance(input.into_inner(), acting_teacher(&auth)).await?;
    let message = format!(
        "Attendance processed: {} succeeded, {} failed.",
        result.succeeded, result.failed
    );
    Ok(ApiResponse::ok(result).message(message))
}

/// Update student details of an attendance document
#[utoipa::path(
    request_body = AttendanceUpdateInput,
    responses(
        (status = 200, description = "Updated attendance document", body = Attendance),
        (status = 400, description = "A student is not enrolled in the section", body = Problem),
        (status = 409, description = "Attendance kept changing concurrently", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/attendance/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_update(
    id: Uuid,
    input: Json<AttendanceUpdateInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Attendance> {
    auth.require(Role::STAFF)?;
    input.validate()?;

    let record = db
        .update_attendance(id, input.into_inner(), acting_teacher(&auth))
        .await?;
    Ok(ApiResponse::ok(record).message("Attendance updated."))
}

#[utoipa::path(
    responses((status = 200, description = "Deleted attendance document", body = Attendance)),
    security(("jwt" = []))
)]
#[delete("/attendance/<id>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Attendance> {
    auth.require(Role::ADMIN)?;

    let record = db.delete_attendance(id).await?;
    Ok(ApiResponse::ok(record).message("Attendance deleted."))
}

/// Monthly attendance of a section
#[utoipa::path(
    params(
        ("section" = Uuid, Query,),
        ("year" = i32, Query,),
        ("month" = u32, Query, description = "1 to 12"),
    ),
    responses((status = 200, description = "Counts per day and month totals", body = MonthlyReport)),
    security(("jwt" = []))
)]
#[get("/attendance/report/monthly")]
#[tracing::instrument(skip(db))]
pub async fn attendance_monthly(
    auth: UserRoleToken,
    month: MonthQuery,
    db: &State<Database>,
) -> ApiResult<MonthlyReport> {
    auth.require(Role::STAFF)?;

    let report = db.monthly_report(month.section, month.year, month.month).await?;
    Ok(ApiResponse::ok(report))
}

/// Attendance summary of a student
///
/// Students may only read their own summary.
#[utoipa::path(
    params(("from" = Option<NaiveDate>, Query,), ("to" = Option<NaiveDate>, Query,)),
    responses((status = 200, description = "Counts and records of the student", body = StudentSummary)),
    security(("jwt" = []))
)]
#[get("/attendance/student/<id>")]
#[tracing::instrument(skip(db))]
pub async fn attendance_student(
    id: Uuid,
    auth: UserRoleToken,
    range: DateRange,
    db: &State<Database>,
) -> ApiResult<StudentSummary> {
    auth.require(Role::ANY)?;
    if auth.role == Role::Student && auth.user != id {
        return Err(auth_problem("Students can only read their own attendance."));
    }

    let summary = db.student_summary(id, range.from, range.to).await?;
    Ok(ApiResponse::ok(summary))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header, token_header_for};

    #[rocket::async_test]
    async fn students_cannot_take_attendance() {
        let client = client().await;
        let response = client
            .post("/api/attendance/bulk")
            .header(token_header(Role::Student))
            .header(ContentType::JSON)
            .body(
                json!({
                    "date": "2024-03-04",
                    "section": Uuid::new_v4(),
                    "records": [{ "student": Uuid::new_v4(), "status": "present" }],
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn empty_batch_is_rejected() {
        let client = client().await;
        let response = client
            .post("/api/attendance/bulk")
            .header(token_header(Role::Teacher))
            .header(ContentType::JSON)
            .body(json!({ "date": "2024-03-04", "section": Uuid::new_v4(), "records": [] }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["errors"][0]["field"], "records");
    }

    #[rocket::async_test]
    async fn unknown_attendance_status_is_unprocessable() {
        let client = client().await;
        let response = client
            .post("/api/attendance")
            .header(token_header(Role::Teacher))
            .header(ContentType::JSON)
            .body(
                json!({
                    "date": "2024-03-04",
                    "section": Uuid::new_v4(),
                    "student": Uuid::new_v4(),
                    "status": "sleeping",
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn monthly_report_requires_section_and_month() {
        let client = client().await;
        let response = client
            .get("/api/attendance/report/monthly?year=2024")
            .header(token_header(Role::Admin))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["errors"][0]["field"], "section");
    }

    #[rocket::async_test]
    async fn students_only_read_their_own_summary() {
        let client = client().await;
        let response = client
            .get(format!("/api/attendance/student/{}", Uuid::new_v4()))
            .header(token_header_for(Uuid::new_v4(), Role::Student))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn reversed_range_is_rejected() {
        let client = client().await;
        let response = client
            .get(format!("/api/attendance/student/{}?from=2024-05-01&to=2024-04-01", Uuid::new_v4()))
            .header(token_header(Role::Admin))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }
}
