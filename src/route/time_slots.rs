use mongodb::Database;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::time_slot::db::{problem as slot_problem, TimeSlotDbExt, TimeSlotFilter, TimeSlotInput};
use crate::data::time_slot::{SlotType, TimeSlot};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

fn time_slot_filter(req: &Request<'_>) -> Result<TimeSlotFilter, Problem> {
    Ok(TimeSlotFilter {
        slot_type: query::optional(req, "slot_type")?,
        status: query::optional(req, "status")?,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for TimeSlotFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, time_slot_filter(req))
    }
}

/// List time slots in day order
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query,),
        ("limit" = Option<u64>, Query,),
        ("slot_type" = Option<SlotType>, Query,),
        ("status" = Option<String>, Query,),
    ),
    responses((status = 200, description = "Page of time slots", body = Vec<TimeSlot>)),
    security(("jwt" = []))
)]
#[get("/time-slots")]
#[tracing::instrument(skip(db))]
pub async fn time_slot_list(
    auth: UserRoleToken,
    filter: TimeSlotFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<TimeSlot>> {
    auth.require(Role::ANY)?;

    let (slots, total) = db.list_time_slots(&filter, &page).await?;
    Ok(ApiResponse::page(slots, page.pagination(total)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Time slot", body = TimeSlot),
        (status = 404, description = "No such time slot", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/time-slots/<id>")]
#[tracing::instrument(skip(db))]
pub async fn time_slot_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<TimeSlot> {
    auth.require(Role::ANY)?;

    let slot = db.get_time_slot(id).await?.ok_or_else(|| slot_problem::not_found(id))?;
    Ok(ApiResponse::ok(slot))
}

/// Create a time slot
///
/// Rejected when it intersects any existing slot.
#[utoipa::path(
    request_body = TimeSlotInput,
    responses(
        (status = 201, description = "Time slot created", body = TimeSlot),
        (status = 400, description = "Invalid times or overlap", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/time-slots", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn time_slot_create(
    input: Json<TimeSlotInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<TimeSlot> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let slot = db.create_time_slot(input.into_inner()).await?;
    Ok(ApiResponse::created(slot).message("Time slot created."))
}

#[utoipa::path(
    request_body = TimeSlotInput,
    responses((status = 200, description = "Updated time slot", body = TimeSlot)),
    security(("jwt" = []))
)]
#[put("/time-slots/<id>", format = "application/json", data = "<input>")]
#[tracing::instrument(skip(db))]
pub async fn time_slot_update(
    id: Uuid,
    input: Json<TimeSlotInput>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<TimeSlot> {
    auth.require(Role::ADMIN)?;
    input.validate()?;

    let slot = db.update_time_slot(id, input.into_inner()).await?;
    Ok(ApiResponse::ok(slot).message("Time slot updated."))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted time slot", body = TimeSlot),
        (status = 400, description = "Time slot is scheduled", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/time-slots/<id>")]
#[tracing::instrument(skip(db))]
pub async fn time_slot_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<TimeSlot> {
    auth.require(Role::ADMIN)?;

    let slot = db.delete_time_slot(id).await?;
    Ok(ApiResponse::ok(slot).message("Time slot deleted."))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::Value;

    use crate::role::Role;
    use crate::route::test_util::{client, token_header};

    async fn create(body: &'static str) -> (Status, Value) {
        let client = client().await;
        let response = client
            .post("/api/time-slots")
            .header(token_header(Role::Admin))
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .await;
        let status = response.status();
        (status, response.into_json().await.unwrap())
    }

    #[rocket::async_test]
    async fn empty_intervals_are_rejected() {
        let (status, body) = create(r#"{"name":"First","start_time":"08:00","end_time":"08:00"}"#).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body["errors"][0]["field"], "end_time");
    }

    #[rocket::async_test]
    async fn times_need_two_digit_hours() {
        let (status, body) = create(r#"{"name":"First","start_time":"8:00","end_time":"08:45"}"#).await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body["errors"][0]["field"], "start_time");
    }
}
