use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::schedule::db::{problem as schedule_problem, ScheduleDbExt, ScheduleFilter, ScheduleInput};
use crate::data::schedule::{CourseSchedule, DayOfWeek, ScheduleView};
use crate::data::section::db::{problem as section_problem, SectionDbExt};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn schedule_filter(req: &Request<'_>) -> Result<ScheduleFilter, Problem> {
    Ok(ScheduleFilter {
        section: query::optional(req, "section")?,
        teacher: query::optional(req, "teacher")?,
        course: query::optional(req, "course")?,
        school_year: query::optional(req, "school_year")?,
        day_of_week: query::optional(req, "day_of_week")?,
        status: query::optional(req, "status")?,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ScheduleFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, schedule_filter(req))
    }
}

/// List course schedules with their references loaded
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("section" = Option<Uuid>, Query,),
        ("teacher" = Option<Uuid>, Query,),
        ("course" = Option<Uuid>, Query,),
        ("school_year" = Option<Uuid>, Query,),
        ("day_of_week" = Option<DayOfWeek>, Query,),
        ("status" = Option<String>, Query,),
    ),
    responses((status = 200, description = "Page of schedules", body = Vec<ScheduleView>)),
    security(("jwt" = []))
)]
#[get("/course-schedules")]
#[tracing::instrument(skip(db))]
pub async fn schedule_list(
    auth: UserRoleToken,
    filter: ScheduleFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<ScheduleView>> {
    auth.require(Role::ANY)?;

    let (schedules, total) = db.list_schedules(&filter, &page).await?;
    let views = db.populate_schedules(schedules).await?;
    Ok(ApiResponse::page(views, page.pagination(total)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Schedule", body = ScheduleView),
        (status = 404, description = "No such schedule", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/course-schedules/<id>")]
#[tracing::instrument(skip(db))]
pub async fn schedule_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<ScheduleView> {
    auth.require(Role::ANY)?;

    let schedule = db.get_schedule(id).await?.ok_or_else(|| schedule_problem::not_found(id))?;
    let view = db
        .populate_schedules(vec![schedule])
        .await?
        .pop()
        .ok_or_else(|| schedule_problem::not_found(id))?;
    Ok(ApiResponse::ok(view))
}

/// Weekly timetable of a section
#[utoipa::path(
    params(("status" = Option<String>, Query,), ("school_year" = Option<Uuid>, Query,)),
    responses((status = 200, description = "Schedules by day and slot start", body = Vec<ScheduleView>)),
    security(("jwt" = []))
)]
#[get("/course-schedules/section/<id>")]
#[tracing::instrument(skip(db))]
pub async fn schedule_by_section(
    id: Uuid,
    auth: UserRoleToken,
    filter: ScheduleFilter,
    db: &State<Database>,
) -> ApiResult<Vec<ScheduleView>> {
    auth.require(Role::ANY)?;
    db.get_section(id).await?.ok_or_else(|| section_problem::not_found(id))?;

    let filter = ScheduleFilter {
        section: Some(id),
        ..filter
    };
    Ok(ApiResponse::list(db.timetable(&filter).await?))
}

/// Weekly timetable of a teacher
#[utoipa::path(
    params(("status" = Option<String>, Query,), ("school_year" = Option<Uuid>, Query,)),
    responses((status = 200, description = "Schedules by day and slot start", body = Vec<ScheduleView>)),
    security(("jwt" = []))
)]
#[get("/course-schedules/teacher/<id>")]
#[tracing::instrument(skip(db))]
pub async fn schedule_by_teacher(
    id: Uuid,
    auth: UserRoleToken,
    filter: ScheduleFilter,
    db: &State<Database>,
) -> ApiResult<Vec<ScheduleView>> {
    auth.require(Role::ANY)?;

    let filter = ScheduleFilter {
        teacher: Some(id),
        ..filter
    };
    Ok(ApiResponse::list(db.timetable(&filter).await?))
}

/// Schedule a course
///
/// Rejected when the teacher or the section already has an active class
/// in an overlapping time slot on the same day of the same school year.
#[utoipa::path(
    request_body = ScheduleInput,
    responses(
        (status = 201, description = "Schedule created", body = CourseSchedule),
        (status = 400, description = "Invalid references or double booking", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/course-schedules", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn schedule_create(
    input: Json<ScheduleInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<CourseSchedule> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let schedule = db.create_schedule(input.into_inner()).await?;
    Ok(ApiResponse::created(schedule).message("Course schedule created."))
}

#[utoipa::path(
    request_body = ScheduleInput,
    responses((status = 200, description = "Updated schedule", body = CourseSchedule)),
    security(("jwt" = []))
)]
#[put("/course-schedules/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn schedule_update(
    id: Uuid,
    input: Json<ScheduleInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<CourseSchedule> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let schedule = db.update_schedule(id, input.into_inner()).await?;
    Ok(ApiResponse::ok(schedule).message("Course schedule updated."))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted schedule", body = CourseSchedule),
        (status = 400, description = "Schedule has attendance records", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/course-schedules/<id>")]
#[tracing::instrument(skip(db))]
pub async fn schedule_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<CourseSchedule> {
    auth.require(Role::ADMIN)?;

    let schedule = db.delete_schedule(id).await?;
    Ok(ApiResponse::ok(schedule).message("Course schedule deleted."))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header};

    fn schedule_body(day: &str) -> String {
        json!({
            "course": Uuid::new_v4(),
            "section": Uuid::new_v4(),
            "teacher": Uuid::new_v4(),
            "time_slot": Uuid::new_v4(),
            "day_of_week": day,
        })
        .to_string()
    }

    #[rocket::async_test]
    async fn only_admins_schedule_courses() {
        let client = client().await;
        let response = client
            .post("/api/course-schedules")
            .header(token_header(Role::Teacher))
            .header(ContentType::JSON)
            .body(schedule_body("monday"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn sunday_is_not_a_school_day() {
        let client = client().await;
        let response = client
            .post("/api/course-schedules")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(schedule_body("sunday"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn day_filter_is_checked() {
        let client = client().await;
        let response = client
            .get("/api/course-schedules?day_of_week=someday")
            .header(token_header(Role::Student))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["value"], "someday");
    }
}
