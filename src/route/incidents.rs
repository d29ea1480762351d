use chrono::NaiveDate;
use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::incident::db::{
    problem as incident_problem, CloseIncidentInput, IncidentDbExt, IncidentFilter, IncidentInput, IncidentStats,
};
use crate::data::incident::{Incident, IncidentStatus, IncidentType, IncidentView};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn incident_filter(req: &Request<'_>) -> Result<IncidentFilter, Problem> {
    Ok(IncidentFilter {
        incident_type: query::optional(req, "incident_type")?,
        status: query::optional(req, "status")?,
        is_violent: query::optional_bool(req, "is_violent")?,
        from: query::optional(req, "from")?,
        to: query::optional(req, "to")?,
        search: query::optional_str(req, "search"),
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for IncidentFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, incident_filter(req))
    }
}

/// List incidents, newest first
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("incident_type" = Option<IncidentType>, Query,),
        ("status" = Option<IncidentStatus>, Query,),
        ("is_violent" = Option<bool>, Query,),
        ("from" = Option<NaiveDate>, Query,),
        ("to" = Option<NaiveDate>, Query,),
        ("search" = Option<String>, Query, description = "Matches description, location or reporter"),
    ),
    responses((status = 200, description = "Page of incidents", body = Vec<IncidentView>)),
    security(("jwt" = []))
)]
#[get("/incidents")]
#[tracing::instrument(skip(db))]
pub async fn incident_list(
    auth: UserRoleToken,
    filter: IncidentFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<IncidentView>> {
    auth.require(Role::STAFF)?;

    let (incidents, total) = db.list_incidents(&filter, &page).await?;
    let views = db.populate_incidents(incidents).await?;
    Ok(ApiResponse::page(views, page.pagination(total)))
}

/// Incident counts by type and status
#[utoipa::path(
    params(
        ("from" = Option<NaiveDate>, Query,),
        ("to" = Option<NaiveDate>, Query,),
    ),
    responses((status = 200, description = "Incident statistics", body = IncidentStats)),
    security(("jwt" = []))
)]
#[get("/incidents/stats")]
#[tracing::instrument(skip(db))]
pub async fn incident_stats(
    auth: UserRoleToken,
    filter: IncidentFilter,
    db: &State<Database>,
) -> ApiResult<IncidentStats> {
    auth.require(Role::STAFF)?;

    Ok(ApiResponse::ok(db.incident_stats(&filter).await?))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Incident", body = IncidentView),
        (status = 404, description = "No such incident", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/incidents/<id>", rank = 2)]
#[tracing::instrument(skip(db))]
pub async fn incident_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<IncidentView> {
    auth.require(Role::STAFF)?;

    let incident = db.get_incident(id).await?.ok_or_else(|| incident_problem::not_found(id))?;
    let view = db
        .populate_incidents(vec![incident])
        .await?
        .pop()
        .ok_or_else(|| incident_problem::not_found(id))?;
    Ok(ApiResponse::ok(view))
}

/// Report an incident
///
/// The caller is recorded as the user who registered it.
#[utoipa::path(
    request_body = IncidentInput,
    responses(
        (status = 201, description = "Incident registered", body = Incident),
        (status = 400, description = "Invalid input", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/incidents", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn incident_create(
    input: Json<IncidentInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Incident> {
    auth.require(Role::STAFF)?;
    input.validate()?;

    let incident = db.create_incident(input.into_inner(), auth.user).await?;
    Ok(ApiResponse::created(incident).message("Incident registered."))
}

#[utoipa::path(
    request_body = IncidentInput,
    responses(
        (status = 200, description = "Updated incident", body = Incident),
        (status = 400, description = "Incident is closed", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/incidents/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn incident_update(
    id: Uuid,
    input: Json<IncidentInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Incident> {
    auth.require(Role::STAFF)?;
    input.validate()?;

    let incident = db.update_incident(id, input.into_inner()).await?;
    Ok(ApiResponse::ok(incident).message("Incident updated."))
}

/// Close an incident with a resolution
#[utoipa::path(
    request_body = CloseIncidentInput,
    responses(
        (status = 200, description = "Closed incident", body = Incident),
        (status = 400, description = "Incident already closed", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/incidents/<id>/close", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn incident_close(
    id: Uuid,
    input: Json<CloseIncidentInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<Incident> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let incident = db.close_incident(id, input.into_inner(), auth.user).await?;
    Ok(ApiResponse::ok(incident).message("Incident closed."))
}

#[utoipa::path(
    responses((status = 200, description = "Deleted incident", body = Incident)),
    security(("jwt" = []))
)]
#[delete("/incidents/<id>")]
#[tracing::instrument(skip(db))]
pub async fn incident_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<Incident> {
    auth.require(Role::ADMIN)?;

    let incident = db.delete_incident(id).await?;
    Ok(ApiResponse::ok(incident).message("Incident deleted."))
}
