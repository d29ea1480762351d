use mongodb::Database;
use rocket::State;

use crate::data::dashboard::{dashboard_stats, DashboardStats};
use crate::resp::jwt::UserRoleToken;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;

/// School-wide totals and today's attendance
#[utoipa::path(
    responses((status = 200, description = "Dashboard totals", body = DashboardStats)),
    security(("jwt" = []))
)]
#[get("/dashboard/stats")]
#[tracing::instrument(skip(db))]
pub async fn dashboard_get(auth: UserRoleToken, db: &State<Database>) -> ApiResult<DashboardStats> {
    auth.require(Role::STAFF)?;

    Ok(ApiResponse::ok(dashboard_stats(db).await?))
}
