use std::fmt::{Display, Formatter};
use std::io::Cursor;

use rocket::http::hyper::header::CONTENT_LANGUAGE;
use rocket::http::ContentType;
use rocket::http::Status;
use rocket::response::Responder;
use rocket::{response, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl ToString, message: impl ToString) -> FieldError {
        FieldError {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Failure response. Rendered as `{ success: false, message, errors? }` with
/// any extra body entries merged in.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Problem {
    #[serde(skip)]
    pub status: Status,
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    #[schema(value_type = Object)]
    pub body: Map<String, Value>,
}

impl Default for Problem {
    fn default() -> Self {
        Problem {
            status: Status::InternalServerError,
            message: "Internal server error.".to_string(),
            errors: Vec::new(),
            body: Map::new(),
        }
    }
}

impl Problem {
    pub fn new(status: Status, message: impl ToString) -> Problem {
        Problem {
            status,
            message: message.to_string(),
            ..Default::default()
        }
    }

    pub fn with_errors(mut self, errors: Vec<FieldError>) -> Problem {
        self.errors = errors;
        self
    }

    pub fn field(mut self, field: impl ToString, message: impl ToString) -> Problem {
        self.errors.push(FieldError::new(field, message));
        self
    }

    pub fn insert<V: Serialize>(mut self, key: impl ToString, value: V) -> Problem {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.body.insert(key.to_string(), value);
        self
    }

    pub fn insert_str(mut self, key: impl ToString, value: impl ToString) -> Problem {
        self.body
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn to_json(&self) -> Value {
        let mut body = self.body.clone();

        body.insert(String::from("success"), Value::Bool(false));
        body.insert(String::from("message"), Value::from(self.message.clone()));
        if !self.errors.is_empty() {
            body.insert(
                String::from("errors"),
                serde_json::to_value(&self.errors).unwrap_or(Value::Null),
            );
        }

        Value::Object(body)
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for Problem {}

impl<'r> Responder<'r, 'static> for Problem {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        if self.status.code >= 500 {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }

        let body_string = self.to_json().to_string();

        Response::build()
            .status(self.status)
            .header(ContentType::JSON)
            .raw_header(CONTENT_LANGUAGE.as_str(), "en")
            .sized_body(body_string.len(), Cursor::new(body_string))
            .ok()
    }
}

pub mod problems {
    use crate::resp::problem::{FieldError, Problem};
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn bad_request(message: impl ToString) -> Problem {
        Problem::new(Status::BadRequest, message)
    }

    #[inline]
    pub fn validation(errors: Vec<FieldError>) -> Problem {
        Problem::new(Status::BadRequest, "Validation failed.").with_errors(errors)
    }

    #[inline]
    pub fn not_found(kind: &str, id: Uuid) -> Problem {
        Problem::new(Status::NotFound, format!("{} not found.", kind)).insert_str("id", id)
    }

    #[inline]
    pub fn unauthorized(message: impl ToString) -> Problem {
        Problem::new(Status::Unauthorized, message)
    }

    #[inline]
    pub fn forbidden(message: impl ToString) -> Problem {
        Problem::new(Status::Forbidden, message)
    }

    /// Deleting a record that other documents still point at.
    #[inline]
    pub fn in_use(kind: &str, referenced_by: &str, count: u64) -> Problem {
        Problem::new(
            Status::BadRequest,
            format!("{} is referenced by {} {} and can't be deleted.", kind, count, referenced_by),
        )
    }
}

/// MongoDB server code for unique index violations.
const DUPLICATE_KEY: i32 = 11000;

pub(crate) fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(w)) => w.code == DUPLICATE_KEY,
        ErrorKind::BulkWrite(b) => b
            .write_errors
            .iter()
            .flatten()
            .any(|w| w.code == DUPLICATE_KEY),
        ErrorKind::Command(c) => c.code == DUPLICATE_KEY,
        _ => false,
    }
}

impl From<mongodb::error::Error> for Problem {
    fn from(e: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        fn mongodb_problem() -> Problem {
            Problem::new(
                Status::InternalServerError,
                "MongoDB failed while processing request.",
            )
        }

        fn access_problem() -> Problem {
            Problem::new(
                Status::InternalServerError,
                "Server was unable to access MongoDB.",
            )
        }

        fn bson_problem() -> Problem {
            Problem::new(
                Status::InternalServerError,
                "There was a problem with handling MongoDB bson.",
            )
        }

        if is_duplicate_key(&e) {
            return Problem::new(Status::BadRequest, "Duplicate value.")
                .insert_str("detail", "A record with the same unique fields already exists.");
        }

        tracing::error!("MongoDB error: {}", e);

        match e.kind.as_ref() {
            ErrorKind::Authentication { .. } => access_problem(),
            ErrorKind::BsonDeserialization(_) => bson_problem(),
            ErrorKind::BsonSerialization(_) => bson_problem(),
            ErrorKind::DnsResolve { .. } => access_problem(),
            ErrorKind::ServerSelection { .. } => access_problem(),
            ErrorKind::InvalidTlsConfig { .. } => access_problem(),
            ErrorKind::IncompatibleServer { .. } => access_problem(),
            ErrorKind::Io(_) => mongodb_problem().insert_str(
                "detail",
                "An IO error occurred. Submitted data might not be properly stored.",
            ),
            ErrorKind::Write(_) => mongodb_problem().insert_str(
                "detail",
                "A write error occurred. Submitted data might not be properly stored.",
            ),
            _ => mongodb_problem(),
        }
    }
}

impl From<bson::de::Error> for Problem {
    fn from(e: bson::de::Error) -> Self {
        tracing::error!("BSON deserialization error: {}", e);
        Problem::new(
            Status::InternalServerError,
            "An error occurred while processing BSON data.",
        )
    }
}

impl From<bson::ser::Error> for Problem {
    fn from(e: bson::ser::Error) -> Self {
        tracing::error!("BSON serialization error: {}", e);
        Problem::new(
            Status::InternalServerError,
            "An error occurred while processing BSON data.",
        )
    }
}

impl From<serde_json::Error> for Problem {
    fn from(_: serde_json::Error) -> Self {
        Problem::new(
            Status::InternalServerError,
            "An error occurred while processing JSON data.",
        )
    }
}

impl From<jsonwebtoken::errors::Error> for Problem {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match e.into_kind() {
            ErrorKind::ExpiredSignature => {
                Problem::new(Status::Unauthorized, "Expired token.")
            }
            _ => Problem::new(Status::Unauthorized, "Invalid token."),
        }
    }
}

impl From<std::io::Error> for Problem {
    fn from(_: std::io::Error) -> Self {
        Problem::new(Status::InternalServerError, "Server IO error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_failure_envelope() {
        let problem = problems::validation(vec![FieldError::new("name", "is required")]);
        let json = problem.to_json();

        assert_eq!(json["success"], Value::Bool(false));
        assert_eq!(json["message"], "Validation failed.");
        assert_eq!(json["errors"][0]["field"], "name");
        assert_eq!(problem.status, Status::BadRequest);
    }

    #[test]
    fn errors_are_omitted_when_empty() {
        let json = problems::forbidden("nope").insert_str("role", "student").to_json();
        assert!(json.get("errors").is_none());
        assert_eq!(json["role"], "student");
    }

    #[test]
    fn expired_jwt_maps_to_unauthorized() {
        let err = jsonwebtoken::errors::Error::from(
            jsonwebtoken::errors::ErrorKind::ExpiredSignature,
        );
        let problem = Problem::from(err);
        assert_eq!(problem.status, Status::Unauthorized);
        assert_eq!(problem.message, "Expired token.");
    }
}
