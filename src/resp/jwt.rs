use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::{Cookie, Status};
use rocket::request::{self, FromRequest, Request};
use rocket::time::OffsetDateTime;
use serde::{Deserialize, Serialize};

use crate::data::user::User;
use crate::middleware::query;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::security::Security;
use crate::util::date_time_as_unix_seconds;
use uuid::Uuid;

pub static AUTH_COOKIE_NAME: &str = "jwt_auth";

/// Claims carried by the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleToken {
    #[serde(with = "date_time_as_unix_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "date_time_as_unix_seconds")]
    exp: DateTime<Utc>,
    pub user: Uuid,
    pub role: Role,
}

impl UserRoleToken {
    pub fn new(user: &User, lifetime: Duration) -> UserRoleToken {
        UserRoleToken::issue(user.id, user.role, lifetime)
    }

    pub fn issue(user: Uuid, role: Role, lifetime: Duration) -> UserRoleToken {
        let now = Utc::now();
        UserRoleToken {
            iat: now,
            exp: now + lifetime,
            user,
            role,
        }
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.exp
    }

    pub fn encode_jwt(&self, secret: impl AsRef<[u8]>) -> Result<String, jsonwebtoken::errors::Error> {
        let header = Header::new(Algorithm::HS256);
        encode(&header, &self, &EncodingKey::from_secret(secret.as_ref()))
    }

    pub fn decode_jwt(token: &str, secret: impl AsRef<[u8]>) -> Result<UserRoleToken, Problem> {
        decode::<UserRoleToken>(
            token,
            &DecodingKey::from_secret(secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(Problem::from)
    }

    pub fn cookie(&self, token: String) -> Cookie<'static> {
        let mut cookie = Cookie::new(AUTH_COOKIE_NAME, token);
        cookie.set_secure(true);
        cookie.set_http_only(true);
        cookie.set_path("/");
        if let Ok(expires) = OffsetDateTime::from_unix_timestamp(self.exp.timestamp()) {
            cookie.set_expires(expires);
        }
        cookie
    }

    /// Fails with 403 unless the token's role is in `allowed`.
    pub fn require(&self, allowed: &[Role]) -> Result<(), Problem> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(auth_problem(format!(
                "Role '{}' is not allowed to perform this action.",
                self.role
            )))
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins may act on anyone; everyone else only on themselves.
    pub fn require_self_or_admin(&self, user: Uuid) -> Result<(), Problem> {
        if self.is_admin() || self.user == user {
            Ok(())
        } else {
            Err(auth_problem("Only administrators can act on other users."))
        }
    }
}

pub fn auth_problem(detail: impl ToString) -> Problem {
    problems::forbidden("Insufficient permissions.").insert_str("detail", detail)
}

fn bearer_token(req: &Request<'_>) -> Option<String> {
    if let Some(header) = req.headers().get_one("Authorization") {
        if let Some((kind, token)) = header.split_once(' ') {
            if kind.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
                return Some(token.trim().to_string());
            }
        }
    }

    req.cookies()
        .get(AUTH_COOKIE_NAME)
        .map(|jwt| jwt.value().to_owned())
}

pub fn extract_claims(req: &Request<'_>, secret: impl AsRef<[u8]>) -> Result<UserRoleToken, Problem> {
    let token = bearer_token(req).ok_or_else(|| problems::unauthorized("No auth token provided."))?;
    tracing::trace!("extracted auth token from request");

    let claims = UserRoleToken::decode_jwt(&token, secret)?;
    tracing::debug!("decoded user roles token for user: {}", claims.user);

    Ok(claims)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserRoleToken {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let security = match req.rocket().state::<Security>() {
            Some(it) => it,
            None => return query::outcome(req, Err(query::internal())),
        };

        let claims = extract_claims(req, &security.jwt_secret).map_err(|e| {
            tracing::debug!("unable to extract claims from request");
            Problem {
                status: Status::Unauthorized,
                ..e
            }
        });

        query::outcome(req, claims)
    }
}

pub mod doc {
    use utoipa::openapi::security::*;

    #[derive(Clone, Copy)]
    pub struct JWTAuth;

    impl From<JWTAuth> for SecurityScheme {
        fn from(_: JWTAuth) -> Self {
            let mut http = Http::new(HttpAuthScheme::Bearer);
            http.bearer_format = Some("JWT".to_string());
            SecurityScheme::Http(http)
        }
    }

    impl utoipa::Modify for JWTAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(c) = openapi.components.as_mut() {
                c.add_security_scheme("jwt", *self)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn token(role: Role, iat: DateTime<Utc>, exp: DateTime<Utc>) -> UserRoleToken {
        UserRoleToken {
            iat,
            exp,
            user: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn jwt_configured_properly() {
        let now = Utc::now().round_subsecs(0);
        let urt = token(Role::Admin, now, now + Duration::weeks(1));

        let encoded = urt.encode_jwt(SECRET).expect("encoding should work for example");
        let decoded = UserRoleToken::decode_jwt(&encoded, SECRET).expect("valid token");

        assert_eq!(now, decoded.iat);
        assert_eq!(now + Duration::weeks(1), decoded.exp);
        assert_eq!(urt.user, decoded.user);
        assert_eq!(decoded.role, Role::Admin);
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let now = Utc::now();
        let urt = token(Role::Teacher, now - Duration::days(2), now - Duration::days(1));
        let encoded = urt.encode_jwt(SECRET).unwrap();

        let problem = UserRoleToken::decode_jwt(&encoded, SECRET).unwrap_err();
        assert_eq!(problem.status, Status::Unauthorized);
        assert_eq!(problem.message, "Expired token.");
    }

    #[test]
    fn tokens_signed_with_other_secret_are_rejected() {
        let now = Utc::now();
        let urt = token(Role::Admin, now, now + Duration::hours(1));
        let encoded = urt.encode_jwt(b"another-secret-another-secret-xx").unwrap();

        assert!(UserRoleToken::decode_jwt(&encoded, SECRET).is_err());
    }

    #[test]
    fn role_allow_list_is_enforced() {
        let now = Utc::now();
        let student = token(Role::Student, now, now + Duration::hours(1));

        assert!(student.require(Role::ANY).is_ok());
        let problem = student.require(Role::STAFF).unwrap_err();
        assert_eq!(problem.status, Status::Forbidden);

        assert!(student.require_self_or_admin(student.user).is_ok());
        assert!(student.require_self_or_admin(Uuid::new_v4()).is_err());
    }
}
