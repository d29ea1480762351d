use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::enrollment::db::{
    problem as enrollment_problem, EnrollmentDbExt, EnrollmentFilter, EnrollmentInput, EnrollmentStatusInput,
};
use crate::data::enrollment::{Enrollment, EnrollmentStatus, EnrollmentView};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn enrollment_filter(req: &Request<'_>) -> Result<EnrollmentFilter, Problem> {
    Ok(EnrollmentFilter {
        student: query::optional(req, "student")?,
        section: query::optional(req, "section")?,
        school_year: query::optional(req, "school_year")?,
        status: query::optional(req, "status")?,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for EnrollmentFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, enrollment_filter(req))
    }
}

/// List enrollments
///
/// Students only ever see their own enrollments.
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("student" = Option<Uuid>, Query,),
        ("section" = Option<Uuid>, Query,),
        ("school_year" = Option<Uuid>, Query,),
        ("status" = Option<EnrollmentStatus>, Query,),
    ),
    responses((status = 200, description = "Page of enrollments", body = Vec<EnrollmentView>)),
    security(("jwt" = []))
)]
#[get("/enrollments")]
#[tracing::instrument(skip(db))]
pub async fn enrollment_list(
    auth: UserRoleToken,
    filter: EnrollmentFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<EnrollmentView>> {
    auth.require(Role::ANY)?;
    let filter = if auth.role == Role::Student {
        EnrollmentFilter {
            student: Some(auth.user),
            ..filter
        }
    } else {
        filter
    };

    let (enrollments, total) = db.list_enrollments(&filter, &page).await?;
    let views = db.populate_enrollments(enrollments).await?;
    Ok(ApiResponse::page(views, page.pagination(total)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Enrollment", body = EnrollmentView),
        (status = 404, description = "No such enrollment", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/enrollments/<id>")]
#[tracing::instrument(skip(db))]
pub async fn enrollment_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<EnrollmentView> {
    auth.require(Role::ANY)?;

    let enrollment = db.get_enrollment(id).await?.ok_or_else(|| enrollment_problem::not_found(id))?;
    if auth.role == Role::Student && enrollment.student != auth.user {
        return Err(enrollment_problem::not_found(id));
    }

    let view = db
        .populate_enrollments(vec![enrollment])
        .await?
        .pop()
        .ok_or_else(|| enrollment_problem::not_found(id))?;
    Ok(ApiResponse::ok(view))
}

/// Enroll a student in a section
///
/// Takes one seat of the section. Fails when the section is full, the
/// student is already enrolled there, or the student has an active
/// enrollment in another section of the same school year.
#[utoipa::path(
    request_body = EnrollmentInput,
    responses(
        (status = 201, description = "Student enrolled", body = Enrollment),
        (status = 400, description = "Section full or duplicate enrollment", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/enrollments", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn enrollment_create(
    input: Json<EnrollmentInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Enrollment> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let enrollment = db.enroll(input.into_inner()).await?;
    Ok(ApiResponse::created(enrollment).message("Student enrolled."))
}

/// Change the status of an enrollment
///
/// Leaving `active` frees the seat; returning to `active` takes one again.
#[utoipa::path(
    request_body = EnrollmentStatusInput,
    responses(
        (status = 200, description = "Updated enrollment", body = Enrollment),
        (status = 400, description = "Section full, student active elsewhere or transition not allowed", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/enrollments/<id>/status", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn enrollment_status(
    id: Uuid,
    input: Json<EnrollmentStatusInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Enrollment> {
    auth.require(Role::ADMIN)?;

    let enrollment = db.set_enrollment_status(id, input.status).await?;
    Ok(ApiResponse::ok(enrollment).message("Enrollment status updated."))
}

#[utoipa::path(
    responses((status = 200, description = "Deleted enrollment", body = Enrollment)),
    security(("jwt" = []))
)]
#[delete("/enrollments/<id>")]
#[tracing::instrument(skip(db))]
pub async fn enrollment_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Enrollment> {
    auth.require(Role::ADMIN)?;

    let enrollment = db.delete_enrollment(id).await?;
    Ok(ApiResponse::ok(enrollment).message("Enrollment deleted."))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::{json, Value};
    use uuid::Uuid;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header};

    #[rocket::async_test]
    async fn teachers_cannot_enroll_students() {
        let client = client().await;
        let response = client
            .post("/api/enrollments")
            .header(token_header(Role::Teacher))
            .header(ContentType::JSON)
            .body(json!({ "student": Uuid::new_v4(), "section": Uuid::new_v4() }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn long_notes_are_rejected() {
        let client = client().await;
        let response = client
            .post("/api/enrollments")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(
                json!({
                    "student": Uuid::new_v4(),
                    "section": Uuid::new_v4(),
                    "notes": "x".repeat(501),
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["errors"][0]["field"], "notes");
    }

    #[rocket::async_test]
    async fn unknown_status_is_unprocessable() {
        let client = client().await;
        let response = client
            .put(format!("/api/enrollments/{}/status", Uuid::new_v4()))
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(r#"{"status":"graduated"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn status_filter_is_checked() {
        let client = client().await;
        let response = client
            .get("/api/enrollments?status=graduated")
            .header(token_header(Role::Admin))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }
}
