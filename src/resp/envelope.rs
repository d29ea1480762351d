use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Request, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::resp::problem::Problem;

/// Paging block of list responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

/// Success envelope: `{ success: true, data, count?, total?, pagination?, message? }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    #[serde(skip)]
    status: Status,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

pub type ApiResult<T> = Result<ApiResponse<T>, Problem>;

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> ApiResponse<T> {
        ApiResponse {
            status: Status::Ok,
            success: true,
            message: None,
            data,
            count: None,
            total: None,
            pagination: None,
        }
    }

    pub fn created(data: T) -> ApiResponse<T> {
        ApiResponse {
            status: Status::Created,
            ..ApiResponse::ok(data)
        }
    }

    pub fn message(mut self, message: impl ToString) -> ApiResponse<T> {
        self.message = Some(message.to_string());
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub fn list(data: Vec<T>) -> ApiResponse<Vec<T>> {
        let count = data.len();
        ApiResponse {
            count: Some(count),
            ..ApiResponse::ok(data)
        }
    }

    pub fn page(data: Vec<T>, pagination: Pagination) -> ApiResponse<Vec<T>> {
        ApiResponse {
            total: Some(pagination.total),
            pagination: Some(pagination),
            ..ApiResponse::list(data)
        }
    }
}

impl<'r, T: Serialize> Responder<'r, 'static> for ApiResponse<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status;
        Response::build_from(Json(self).respond_to(req)?)
            .status(status)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn page_envelope_carries_counts() {
        let pagination = Pagination {
            page: 2,
            limit: 2,
            total: 5,
            pages: 3,
        };
        let resp = ApiResponse::page(vec![1, 2], pagination);
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["success"], Value::Bool(true));
        assert_eq!(json["count"], 2);
        assert_eq!(json["total"], 5);
        assert_eq!(json["pagination"]["pages"], 3);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn created_uses_201() {
        let resp = ApiResponse::created("x").message("Created.");
        assert_eq!(resp.status(), Status::Created);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["message"], "Created.");
        assert!(json.get("count").is_none());
    }
}
