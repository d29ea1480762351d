//! Typed access to optional query values for request guards.

use rocket::http::Status;
use rocket::request::Outcome;
use rocket::Request;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::resp::problem::{problems, Problem};

/// Reads `name` and parses it the way a JSON string value would be parsed,
/// which covers enums, ids and dates.
pub fn optional<T: DeserializeOwned>(req: &Request<'_>, name: &str) -> Result<Option<T>, Problem> {
    match optional_str(req, name) {
        None => Ok(None),
        Some(raw) => serde_json::from_value(Value::String(raw.clone()))
            .map(Some)
            .map_err(|_| {
                problems::bad_request(format!("Invalid query parameter '{}'.", name))
                    .insert_str("value", raw)
            }),
    }
}

/// Reads `name` through its `FromStr` form, for numbers.
pub fn parsed<T: std::str::FromStr>(req: &Request<'_>, name: &str) -> Result<Option<T>, Problem> {
    match optional_str(req, name) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            problems::bad_request(format!("Invalid query parameter '{}'.", name)).insert_str("value", raw)
        }),
    }
}

pub fn optional_str(req: &Request<'_>, name: &str) -> Option<String> {
    req.query_value::<String>(name)
        .and_then(|it| it.ok())
        .map(|it| it.trim().to_string())
        .filter(|it| !it.is_empty())
}

pub fn optional_bool(req: &Request<'_>, name: &str) -> Result<Option<bool>, Problem> {
    match optional_str(req, name).as_deref() {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(_) => Err(problems::bad_request(format!(
            "Invalid query parameter '{}'.",
            name
        ))),
    }
}

/// Converts a parsed guard value into an outcome, keeping the problem around
/// for the catcher.
pub fn outcome<T>(req: &Request<'_>, result: Result<T, Problem>) -> Outcome<T, Problem> {
    match result {
        Ok(it) => Outcome::Success(it),
        Err(problem) => {
            let status = problem.status;
            req.local_cache(|| Some(problem.clone()));
            Outcome::Error((status, problem))
        }
    }
}

/// Problem stored by a failing guard of this request, if any.
pub fn cached_problem(req: &Request<'_>) -> Option<Problem> {
    req.local_cache(|| None::<Problem>).clone()
}

#[inline]
pub fn internal() -> Problem {
    Problem::new(Status::InternalServerError, "Server state is missing.")
}
