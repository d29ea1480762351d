use std::convert::Infallible;

use bson::Document;
use mongodb::options::FindOptions;
use rocket::request::{FromRequest, Outcome};
use rocket::Request;

use crate::config::Config;
use crate::resp::envelope::Pagination;

pub const DEFAULT_PAGE_LENGTH: u64 = 20;

/// 1-based page selection read from `page`/`limit` query values.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PageState {
    pub limit: u64,
    pub page: u64,
}

impl Default for PageState {
    fn default() -> Self {
        PageState {
            limit: DEFAULT_PAGE_LENGTH,
            page: 1,
        }
    }
}

impl PageState {
    pub fn new(page: u64, limit: u64, max_limit: u64) -> PageState {
        PageState {
            page: page.max(1),
            limit: limit.clamp(1, max_limit.max(1)),
        }
    }

    /// Capped at `i64::MAX`, the largest skip the server accepts.
    pub fn skip(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.limit)
            .min(i64::MAX as u64)
    }

    pub fn pagination(&self, total: u64) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
            total,
            pages: (total + self.limit - 1) / self.limit,
        }
    }

    pub fn find_options(&self, sort: Document) -> FindOptions {
        FindOptions::builder()
            .skip(self.skip())
            .limit(self.limit as i64)
            .sort(sort)
            .build()
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PageState {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let max_limit = request
            .rocket()
            .state::<Config>()
            .map(|c| c.max_page_length)
            .unwrap_or(100);

        let limit: Option<u64> = request
            .query_value("limit")
            .and_then(|it| it.ok())
            .or_else(|| request.query_value("l").and_then(|it| it.ok()));

        let page: Option<u64> = request
            .query_value("page")
            .and_then(|it| it.ok())
            .or_else(|| request.query_value("p").and_then(|it| it.ok()));

        Outcome::Success(PageState::new(
            page.unwrap_or(1),
            limit.unwrap_or(DEFAULT_PAGE_LENGTH),
            max_limit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_round_up() {
        let page = PageState::new(1, 20, 100);
        assert_eq!(page.pagination(0).pages, 0);
        assert_eq!(page.pagination(20).pages, 1);
        assert_eq!(page.pagination(21).pages, 2);
    }

    #[test]
    fn skip_is_relative_to_first_page() {
        assert_eq!(PageState::new(1, 10, 100).skip(), 0);
        assert_eq!(PageState::new(3, 10, 100).skip(), 20);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let page = PageState::new(0, 1000, 100);
        assert_eq!(page, PageState { page: 1, limit: 100 });
        assert_eq!(PageState::new(2, 0, 100).limit, 1);
    }

    #[test]
    fn huge_page_numbers_saturate() {
        let page = PageState::new(u64::MAX, 20, 100);
        assert_eq!(page.skip(), i64::MAX as u64);

        let options = page.find_options(Document::new());
        assert_eq!(options.skip, Some(i64::MAX as u64));
        assert_eq!(options.limit, Some(20));
    }
}
