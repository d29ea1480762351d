pub mod catchers;
pub mod envelope;
pub mod jwt;
pub mod problem;

pub use envelope::{ApiResponse, ApiResult};
