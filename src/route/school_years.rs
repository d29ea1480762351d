use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::school_year::db::{SchoolYearDbExt, SchoolYearFilter, SchoolYearInput};
use crate::data::school_year::{SchoolYear, SchoolYearStatus};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SchoolYearFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let filter = query::optional(req, "status").map(|status| SchoolYearFilter { status });
        query::outcome(req, filter)
    }
}

/// List school years, newest first
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("status" = Option<SchoolYearStatus>, Query,),
    ),
    responses((status = 200, description = "Page of school years", body = Vec<SchoolYear>)),
    security(("jwt" = []))
)]
#[get("/school-years")]
#[tracing::instrument(skip(db))]
pub async fn school_year_list(
    auth: UserRoleToken,
    filter: SchoolYearFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<SchoolYear>> {
    auth.require(Role::ANY)?;

    let (years, total) = db.list_school_years(&filter, &page).await?;
    Ok(ApiResponse::page(years, page.pagination(total)))
}

/// The school year currently in progress
#[utoipa::path(
    responses(
        (status = 200, description = "Active school year", body = SchoolYear),
        (status = 404, description = "No school year is active", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/school-years/active")]
#[tracing::instrument(skip(db))]
pub async fn school_year_active(auth: UserRoleToken, db: &State<Database>) -> ApiResult<SchoolYear> {
    auth.require(Role::ANY)?;

    let year = db
        .active_school_year()
        .await?
        .ok_or_else(|| Problem::new(rocket::http::Status::NotFound, "No active school year."))?;
    Ok(ApiResponse::ok(year))
}

#[utoipa::path(
    responses(
        (status = 200, description = "School year", body = SchoolYear),
        (status = 404, description = "No such school year", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/school-years/<id>", rank = 2)]
#[tracing::instrument(skip(db))]
pub async fn school_year_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<SchoolYear> {
    auth.require(Role::ANY)?;

    let year = db
        .get_school_year(id)
        .await?
        .ok_or_else(|| problems::not_found("School year", id))?;
    Ok(ApiResponse::ok(year))
}

/// Create a school year
///
/// Creating a year as `active` closes the previously active one.
#[utoipa::path(
    request_body = SchoolYearInput,
    responses(
        (status = 201, description = "School year created", body = SchoolYear),
        (status = 400, description = "Invalid dates or duplicate name", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/school-years", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn school_year_create(
    input: Json<SchoolYearInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<SchoolYear> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let year = db.create_school_year(input.into_inner()).await?;
    Ok(ApiResponse::created(year).message("School year created."))
}

#[utoipa::path(
    request_body = SchoolYearInput,
    responses((status = 200, description = "Updated school year", body = SchoolYear)),
    security(("jwt" = []))
)]
#[put("/school-years/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn school_year_update(
    id: Uuid,
    input: Json<SchoolYearInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<SchoolYear> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let year = db.update_school_year(id, input.into_inner()).await?;
    Ok(ApiResponse::ok(year).message("School year updated."))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted school year", body = SchoolYear),
        (status = 400, description = "School year is still referenced", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/school-years/<id>")]
#[tracing::instrument(skip(db))]
pub async fn school_year_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<SchoolYear> {
    auth.require(Role::ADMIN)?;

    let year = db.delete_school_year(id).await?;
    Ok(ApiResponse::ok(year).message("School year deleted."))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::Value;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header};

    #[rocket::async_test]
    async fn end_date_must_follow_start_date() {
        let client = client().await;
        let response = client
            .post("/api/school-years")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(r#"{"name":"2025","start_date":"2025-12-15","end_date":"2025-03-01"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["errors"][0]["field"], "end_date");
    }

    #[rocket::async_test]
    async fn students_cannot_create_years() {
        let client = client().await;
        let response = client
            .post("/api/school-years")
            .header(token_header(Role::Student))
            .header(ContentType::JSON)
            .body(r#"{"name":"2025","start_date":"2025-03-01","end_date":"2025-12-15"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn malformed_ids_do_not_match() {
        let client = client().await;
        let response = client
            .get("/api/school-years/not-a-uuid")
            .header(token_header(Role::Admin))
            .dispatch()
            .await;

        assert!(response.status().class().is_client_error());
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["success"], false);
    }
}
