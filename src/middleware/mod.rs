pub mod paging;
pub mod query;
