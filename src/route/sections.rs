use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::enrollment::db::EnrollmentDbExt;
use crate::data::enrollment::EnrollmentView;
use crate::data::section::db::{problem as section_problem, SectionDbExt, SectionFilter, SectionInput};
use crate::data::section::Section;
use crate::data::Level;
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn section_filter(req: &Request<'_>) -> Result<SectionFilter, Problem> {
    Ok(SectionFilter {
        school_year: query::optional(req, "school_year")?,
        level: query::optional(req, "level")?,
        grade: query::parsed(req, "grade")?,
        status: query::optional(req, "status")?,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SectionFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, section_filter(req))
    }
}

/// List sections
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("school_year" = Option<Uuid>, Query,),
        ("level" = Option<Level>, Query,),
        ("grade" = Option<u32>, Query,),
        ("status" = Option<String>, Query,),
    ),
    responses((status = 200, description = "Page of sections", body = Vec<Section>)),
    security(("jwt" = []))
)]
#[get("/sections")]
#[tracing::instrument(skip(db))]
pub async fn section_list(
    auth: UserRoleToken,
    filter: SectionFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<Section>> {
    auth.require(Role::ANY)?;

    let (sections, total) = db.list_sections(&filter, &page).await?;
    Ok(ApiResponse::page(sections, page.pagination(total)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Section", body = Section),
        (status = 404, description = "No such section", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/sections/<id>")]
#[tracing::instrument(skip(db))]
pub async fn section_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Section> {
    auth.require(Role::ANY)?;

    let section = db.get_section(id).await?.ok_or_else(|| section_problem::not_found(id))?;
    Ok(ApiResponse::ok(section))
}

/// Students actively enrolled in a section
#[utoipa::path(
    responses(
        (status = 200, description = "Active enrollments ordered by student name", body = Vec<EnrollmentView>),
        (status = 404, description = "No such section", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/sections/<id>/students")]
#[tracing::instrument(skip(db))]
pub async fn section_students(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Vec<EnrollmentView>> {
    auth.require(Role::STAFF)?;
    db.get_section(id).await?.ok_or_else(|| section_problem::not_found(id))?;

    Ok(ApiResponse::list(db.section_students(id).await?))
}

#[utoipa::path(
    request_body = SectionInput,
    responses(
        (status = 201, description = "Section created", body = Section),
        (status = 400, description = "Invalid input or duplicate section", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/sections", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn section_create(
    input: Json<SectionInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Section> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let section = db.create_section(input.into_inner()).await?;
    Ok(ApiResponse::created(section).message("Section created."))
}

/// Update a section
///
/// Capacity can't drop below the number of enrolled students.
#[utoipa::path(
    request_body = SectionInput,
    responses((status = 200, description = "Updated section", body = Section)),
    security(("jwt" = []))
)]
#[put("/sections/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn section_update(
    id: Uuid,
    input: Json<SectionInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Section> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let section = db.update_section(id, input.into_inner()).await?;
    Ok(ApiResponse::ok(section).message("Section updated."))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted section", body = Section),
        (status = 400, description = "Section has enrollments or schedules", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/sections/<id>")]
#[tracing::instrument(skip(db))]
pub async fn section_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Section> {
    auth.require(Role::ADMIN)?;

    let section = db.delete_section(id).await?;
    Ok(ApiResponse::ok(section).message("Section deleted."))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::Value;
    use uuid::Uuid;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header};

    #[rocket::async_test]
    async fn capacity_and_letter_are_validated() {
        let client = client().await;
        let body = format!(
            r#"{{"grade":3,"level":"primary","letter":"ab","capacity":80,"school_year":"{}"}}"#,
            Uuid::new_v4()
        );
        let response = client
            .post("/api/sections")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }

    #[rocket::async_test]
    async fn students_cannot_see_class_lists() {
        let client = client().await;
        let response = client
            .get(format!("/api/sections/{}/students", Uuid::new_v4()))
            .header(token_header(Role::Student))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn grade_filter_must_be_numeric() {
        let client = client().await;
        let response = client
            .get("/api/sections?grade=third")
            .header(token_header(Role::Teacher))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
    }
}
