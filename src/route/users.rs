use mongodb::Database;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::serde::json::Json;
use rocket::{Request, State};
use uuid::Uuid;

use crate::data::user::db::{
    problem as user_problem, PasswordChangeData, UserCreateData, UserDbExt, UserFilter, UserUpdateData,
};
use crate::data::user::{PasswordHash, UserResponse};
use crate::middleware::paging::PageState;
use crate::middleware::query;
use crate::resp::jwt::{auth_problem, UserRoleToken};
use crate::resp::problem::{problems, Problem};
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;
use crate::security::Security;

fn user_filter(req: &Request<'_>) -> Result<UserFilter, Problem> {
    Ok(UserFilter {
        role: query::optional(req, "role")?,
        status: query::optional(req, "status")?,
        search: query::optional_str(req, "search"),
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserFilter {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        query::outcome(req, user_filter(req))
    }
}

/// List users
#[utoipa::path(
    params(
        ("page" = Option<u64>, Query, description = "1-based page number"),
        ("limit" = Option<u64>, Query, description = "Page length"),
        ("role" = Option<Role>, Query,),
        ("status" = Option<String>, Query,),
        ("search" = Option<String>, Query, description = "Matches name or e-mail"),
    ),
    responses(
        (status = 200, description = "Page of users", body = Vec<UserResponse>),
        (status = 403, description = "Not an administrator", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users")]
#[tracing::instrument(skip(db))]
pub async fn user_list(
    auth: UserRoleToken,
    filter: UserFilter,
    page: PageState,
    db: &State<Database>,
) -> ApiResult<Vec<UserResponse>> {
    auth.require(Role::ADMIN)?;

    let (users, total) = db.list_users(&filter, &page).await?;
    Ok(ApiResponse::page(
        users.into_iter().map(UserResponse::from).collect(),
        page.pagination(total),
    ))
}

/// Get a user
///
/// Staff can look up anyone; students only themselves.
#[utoipa::path(
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 404, description = "No such user", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users/<id>")]
#[tracing::instrument(skip(db))]
pub async fn user_get(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<UserResponse> {
    if auth.role == Role::Student {
        auth.require_self_or_admin(id)?;
    }

    let user = db.get_user(id).await?.ok_or_else(|| user_problem::not_found(id))?;
    Ok(ApiResponse::ok(user.into()))
}

/// Create a user with any role
#[utoipa::path(
    request_body = UserCreateData,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid input or e-mail taken", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/users", format = "application/json", data = "<create>")]
#[tracing::instrument(skip(db, security))]
pub async fn user_create(
    create: Json<UserCreateData>,
    auth: UserRoleToken,
    db: &State<Database>,
    security: &State<Security>,
) -> ApiResult<UserResponse> {
    auth.require(Role::ADMIN)?;
    create.validate()?;

    let user = db.create_user(create.into_inner(), security.bcrypt_cost).await?;
    tracing::info!("Administrator {} created {} {}", auth.user, user.role, user.id);

    Ok(ApiResponse::created(user.into()).message("User created."))
}

/// Update a user
///
/// Users may edit their own name, e-mail and phone. Role and status are
/// reserved to administrators.
#[utoipa::path(
    request_body = UserUpdateData,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 403, description = "Not allowed", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/users/<id>", format = "application/json", data = "<update>")]
#[tracing::instrument(skip(db))]
pub async fn user_update(
    id: Uuid,
    update: Json<UserUpdateData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> ApiResult<UserResponse> {
    auth.require_self_or_admin(id)?;
    if update.touches_privileges() && !auth.is_admin() {
        return Err(auth_problem("Only administrators can change roles or account status."));
    }
    update.validate()?;

    let user = db.update_user(id, update.into_inner()).await?;
    Ok(ApiResponse::ok(user.into()).message("User updated."))
}

/// Change a password
///
/// The current password is required unless an administrator resets another
/// user's password.
#[utoipa::path(
    request_body = PasswordChangeData,
    responses(
        (status = 200, description = "Password changed"),
        (status = 401, description = "Current password is wrong", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/users/<id>/password", format = "application/json", data = "<change>")]
#[tracing::instrument(skip(db, security))]
pub async fn user_password(
    id: Uuid,
    change: Json<PasswordChangeData>,
    auth: UserRoleToken,
    db: &State<Database>,
    security: &State<Security>,
) -> ApiResult<()> {
    auth.require_self_or_admin(id)?;
    change.validate()?;

    let user = db.get_user(id).await?.ok_or_else(|| user_problem::not_found(id))?;
    let admin_reset = auth.is_admin() && auth.user != id;
    if !admin_reset {
        let current = change.current_password.as_deref().ok_or_else(|| {
            problems::validation(vec![crate::resp::problem::FieldError::new(
                "current_password",
                "is required",
            )])
        })?;
        if !user.pw_hash.verify(current) {
            return Err(Problem::new(Status::Unauthorized, "Current password is incorrect."));
        }
    }

    let change = change.into_inner();
    db.set_password(id, PasswordHash::new(&change.new_password, security.bcrypt_cost))
        .await?;
    tracing::info!("Password changed for user {}", id);

    Ok(ApiResponse::ok(()).message("Password updated."))
}

/// Delete a user
#[utoipa::path(
    responses(
        (status = 200, description = "Deleted user", body = UserResponse),
        (status = 400, description = "User is still referenced", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/users/<id>")]
#[tracing::instrument(skip(db))]
pub async fn user_delete(id: Uuid, auth: UserRoleToken, db: &State<Database>) -> ApiResult<UserResponse> {
    auth.require(Role::ADMIN)?;
    if auth.user == id {
        return Err(problems::bad_request("Administrators can't delete their own account."));
    }

    let removed = db.delete_user(id).await?;
    Ok(ApiResponse::ok(removed.into()).message("User deleted."))
}
