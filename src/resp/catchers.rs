use rocket::http::Status;
use rocket::{Catcher, Request};

use crate::middleware::query::cached_problem;
use crate::resp::problem::Problem;

fn fallback_message(status: Status) -> &'static str {
    match status.code {
        400 => "Bad request.",
        401 => "Authentication required.",
        403 => "Insufficient permissions.",
        404 => "Resource not found.",
        422 => "Request body could not be parsed.",
        500 => "Internal server error.",
        _ => status.reason().unwrap_or("Request failed."),
    }
}

/// Renders every unhandled failure in the failure envelope, preferring the
/// problem left behind by a failing guard.
#[catch(default)]
pub fn default_catcher(status: Status, req: &Request<'_>) -> Problem {
    match cached_problem(req) {
        Some(problem) if problem.status == status => problem,
        _ => Problem::new(status, fallback_message(status)).insert_str("path", req.uri().path()),
    }
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_statuses_have_messages() {
        assert_eq!(fallback_message(Status::Unauthorized), "Authentication required.");
        assert_eq!(fallback_message(Status::NotFound), "Resource not found.");
        assert_eq!(fallback_message(Status::ImATeapot), "I'm a teapot");
    }
}
