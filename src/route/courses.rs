use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::course::db::{problem as course_problem, CourseDbExt, CourseFilter, CourseInput};
use crate::data::course::Course;
use crate::data::Level;
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn course_filter(req: &Request<'_>) -> Result<CourseFilter, Problem> {
    Ok(CourseFilter {
        level: query::optional(req, "level")?,
        grade: query::parsed(req, "grade")?,
        status: query::optional(req, "status")?,
        search: query::optional_str(req, "search"),
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CourseFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, course_filter(req))
    }
}

/// List courses
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("level" = Option<Level>, Query,),
        ("grade" = Option<u32>, Query,),
        ("status" = Option<String>, Query,),
        ("search" = Option<String>, Query, description = "Matches name or code"),
    ),
    responses((status = 200, description = "Page of courses", body = Vec<Course>)),
    security(("jwt" = []))
)]
#[get("/courses")]
#[tracing::instrument(skip(db))]
pub async fn course_list(
    auth: UserRoleToken,
    filter: CourseFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<Course>> {
    auth.require(Role::ANY)?;

    let (courses, total) = db.list_courses(&filter, &page).await?;
    Ok(ApiResponse::page(courses, page.pagination(total)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Course", body = Course),
        (status = 404, description = "No such course", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/courses/<id>")]
#[tracing::instrument(skip(db))]
pub async fn course_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Course> {
    auth.require(Role::ANY)?;

    let course = db.get_course(id).await?.ok_or_else(|| course_problem::not_found(id))?;
    Ok(ApiResponse::ok(course))
}

#[utoipa::path(
    request_body = CourseInput,
    responses(
        (status = 201, description = "Course created", body = Course),
        (status = 400, description = "Invalid input or code in use", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/courses", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn course_create(input: Json<CourseInput>, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Course> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let course = db.create_course(input.into_inner()).await?;
    Ok(ApiResponse::created(course).message("Course created."))
}

#[utoipa::path(
    request_body = CourseInput,
    responses((status = 200, description = "Updated course", body = Course)),
    security(("jwt" = []))
)]
#[put("/courses/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn course_update(
    id: Uuid,
    input: Json<CourseInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Course> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let course = db.update_course(id, input.into_inner()).await?;
    Ok(ApiResponse::ok(course).message("Course updated."))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted course", body = Course),
        (status = 400, description = "Course is scheduled", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/courses/<id>")]
#[tracing::instrument(skip(db))]
pub async fn course_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Course> {
    auth.require(Role::ADMIN)?;

    let course = db.delete_course(id).await?;
    Ok(ApiResponse::ok(course).message("Course deleted."))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::Value;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header};

    #[rocket::async_test]
    async fn credits_out_of_range_are_rejected() {
        let client = client().await;
        let response = client
            .post("/api/courses")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(r#"{"name":"Physics","code":"PHY-1","level":"secondary","grade":4,"credits":12}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["errors"][0]["field"], "credits");
    }

    #[rocket::async_test]
    async fn teachers_cannot_delete_courses() {
        let client = client().await;
        let response = client
            .delete(format!("/api/courses/{}", uuid::Uuid::new_v4()))
            .header(token_header(Role::Teacher))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }
}
