use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::staff::db::{StaffDbExt, StaffFilter, StaffInput};
use crate::data::staff::{Staff, StaffLevel, StaffRole};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn staff_filter(req: &Request<'_>) -> Result<StaffFilter, Problem> {
    Ok(StaffFilter {
        role: query::optional(req, "role")?,
        level: query::optional(req, "level")?,
        status: query::optional(req, "status")?,
        search: query::optional_str(req, "search"),
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StaffFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, staff_filter(req))
    }
}

/// List staff members
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("role" = Option<StaffRole>, Query,),
        ("level" = Option<StaffLevel>, Query,),
        ("status" = Option<String>, Query,),
        ("search" = Option<String>, Query, description = "Matches names, document number or e-mail"),
    ),
    responses((status = 200, description = "Page of staff", body = Vec<Staff>)),
    security(("jwt" = []))
)]
#[get("/staff")]
#[tracing::instrument(skip(db))]
pub async fn staff_list(
    auth: UserRoleToken,
    filter: StaffFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<Staff>> {
    auth.require(Role::ADMIN)?;

    let (staff, total) = db.list_staff(&filter, &page).await?;
    Ok(ApiResponse::page(staff, page.pagination(total)))
}

/// Get a staff member
#[utoipa::path(
    responses(
        (status = 200, description = "Staff member", body = Staff),
        (status = 404, description = "No such staff member", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/staff/<id>")]
#[tracing::instrument(skip(db))]
pub async fn staff_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Staff> {
    auth.require(Role::ADMIN)?;

    let staff = db
        .get_staff(id)
        .await?
        .ok_or_else(|| problems::not_found("Staff member", id))?;
    Ok(ApiResponse::ok(staff))
}

/// Register a staff member
#[utoipa::path(
    request_body = StaffInput,
    responses(
        (status = 201, description = "Staff member created", body = Staff),
        (status = 400, description = "Invalid input or duplicate document/e-mail", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/staff", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn staff_create(input: Json<StaffInput>, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Staff> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let staff = db.create_staff(input.into_inner()).await?;
    Ok(ApiResponse::created(staff).message("Staff member created."))
}

/// Update a staff member
#[utoipa::path(
    request_body = StaffInput,
    responses((status = 200, description = "Updated staff member", body = Staff)),
    security(("jwt" = []))
)]
#[put("/staff/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn staff_update(
    id: Uuid,
    input: Json<StaffInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Staff> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let staff = db.update_staff(id, input.into_inner()).await?;
    Ok(ApiResponse::ok(staff).message("Staff member updated."))
}

/// Delete a staff member
#[utoipa::path(
    responses((status = 200, description = "Deleted staff member", body = Staff)),
    security(("jwt" = []))
)]
#[delete("/staff/<id>")]
#[tracing::instrument(skip(db))]
pub async fn staff_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Staff> {
    auth.require(Role::ADMIN)?;

    let staff = db.delete_staff(id).await?;
    Ok(ApiResponse::ok(staff).message("Staff member deleted."))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::Value;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header};

    #[rocket::async_test]
    async fn teachers_cannot_register_staff() {
        let client = client().await;
        let response = client
            .post("/api/staff")
            .header(token_header(Role::Teacher))
            .header(ContentType::JSON)
            .body(
                r#"{"first_name":"Rosa","last_name":"Paz","document_number":"12345678",
                    "email":"rosa@school.org","role":"teacher","level":"primary"}"#,
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn invalid_staff_is_reported_per_field() {
        let client = client().await;
        let response = client
            .post("/api/staff")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(
                r#"{"first_name":"R","last_name":"Paz","document_number":"12",
                    "email":"rosa","role":"teacher","level":"all"}"#,
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["first_name", "document_number", "email"]);
    }

    #[rocket::async_test]
    async fn unknown_roles_fail_body_parsing() {
        let client = client().await;
        let response = client
            .post("/api/staff")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(r#"{"first_name":"Rosa","role":"janitor"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["success"], false);
    }
}
