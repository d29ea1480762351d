use chrono::{DateTime, Duration, Utc};
use mongodb::Database;
use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::State;
use utoipa::ToSchema;

use crate::config::Config;
use crate::data::user::db::{problem as user_problem, LoginData, SignupData, UserCreateData, UserDbExt};
use crate::data::user::{User, UserResponse};
use crate::resp::jwt::{UserRoleToken, AUTH_COOKIE_NAME};
use crate::resp::problem::Problem;
use crate::resp::{ApiResponse, ApiResult};
use crate::role::Role;
use crate::security::Security;

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub expires: DateTime<Utc>,
    pub user: UserResponse,
}

/// Signs a token for `user` and stores it in the auth cookie as well.
fn issue_token(user: User, c: &Config, security: &Security, cookies: &CookieJar<'_>) -> Result<AuthResponse, Problem> {
    let urt = UserRoleToken::new(&user, Duration::hours(c.token_lifetime_hours));
    let token = urt.encode_jwt(&security.jwt_secret)?;
    cookies.add(urt.cookie(token.clone()));

    Ok(AuthResponse {
        token,
        expires: urt.expires(),
        user: user.into(),
    })
}

/// Register a student account
#[utoipa::path(
    request_body = SignupData,
    responses(
        (status = 201, description = "Account created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid input or e-mail taken", body = Problem),
    )
)]
#[post("/auth/register", format = "application/json", data = "<signup>")]
#[tracing::instrument(skip(cookies, db, c, security))]
pub async fn register(
    signup: Json<SignupData>,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    c: &State<Config>,
    security: &State<Security>,
) -> ApiResult<AuthResponse> {
    signup.validate()?;

    let mut create = UserCreateData::from(signup.into_inner());
    if c.is_admin_email(&create.email) {
        tracing::info!("Registering configured administrator {}", create.email);
        create.role = Role::Admin;
    }

    let user = db.create_user(create, security.bcrypt_cost).await?;
    let auth = issue_token(user, c, security, cookies)?;

    Ok(ApiResponse::created(auth).message("Registration successful."))
}

/// Sign in with e-mail and password
#[utoipa::path(
    request_body = LoginData,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Bad e-mail or password", body = Problem),
        (status = 403, description = "Account is inactive", body = Problem),
    )
)]
#[post("/auth/login", format = "application/json", data = "<login>")]
#[tracing::instrument(skip(cookies, db, c, security))]
pub async fn login(
    login: Json<LoginData>,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    c: &State<Config>,
    security: &State<Security>,
) -> ApiResult<AuthResponse> {
    login.validate()?;

    let user = db.login(&login).await?;
    tracing::debug!("User {} signed in", user.id);

    Ok(ApiResponse::ok(issue_token(user, c, security, cookies)?).message("Login successful."))
}

/// Current account
#[utoipa::path(
    responses(
        (status = 200, description = "Signed in user", body = UserResponse),
        (status = 401, description = "Missing or invalid token", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/auth/me")]
#[tracing::instrument(skip(db))]
pub async fn me(auth: UserRoleToken, db: &State<Database>) -> ApiResult<UserResponse> {
    let user = db
        .get_user(auth.user)
        .await?
        .ok_or_else(|| user_problem::not_found(auth.user))?;

    Ok(ApiResponse::ok(user.into()))
}

/// Drop the auth cookie
#[utoipa::path(responses((status = 200, description = "Signed out")))]
#[post("/auth/logout")]
#[tracing::instrument(skip(cookies))]
pub async fn logout(cookies: &CookieJar<'_>) -> ApiResponse<()> {
    cookies.remove(AUTH_COOKIE_NAME);
    ApiResponse::ok(()).message("Logged out.")
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::Value;

    use crate::route::test_util::{client, token_header};
    use crate::role::Role;

    #[rocket::async_test]
    async fn me_requires_a_token() {
        let client = client().await;
        let response = client.get("/api/auth/me").dispatch().await;

        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "No auth token provided.");
    }

    #[rocket::async_test]
    async fn garbage_tokens_are_unauthorized() {
        let client = client().await;
        let response = client
            .get("/api/auth/me")
            .header(rocket::http::Header::new("Authorization", "Bearer not.a.jwt"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn register_validates_before_touching_the_database() {
        let client = client().await;
        let response = client
            .post("/api/auth/register")
            .header(ContentType::JSON)
            .body(r#"{"name":"A","email":"nope","password":"123"}"#)
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::BadRequest);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["message"], "Validation failed.");
        assert_eq!(body["errors"].as_array().unwrap().len(), 3);
    }

    #[rocket::async_test]
    async fn logout_clears_the_cookie() {
        let client = client().await;
        let response = client
            .post("/api/auth/logout")
            .header(token_header(Role::Student))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["message"], "Logged out.");
    }
}
