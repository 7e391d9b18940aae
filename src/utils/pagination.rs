use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
/// Keeps `offset()` inside `i64` for every accepted page size.
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

/// Raw `page` / `pageSize` query values. Kept as strings so garbage input
/// falls back to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    pub fn from_query(query: &PaginationQuery) -> Self {
        Self::with_default_size(query, DEFAULT_PAGE_SIZE)
    }

    pub fn with_default_size(query: &PaginationQuery, default_size: i64) -> Self {
        let page = query
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p >= 1)
            .map(|p| p.min(MAX_PAGE))
            .unwrap_or(1);
        let page_size = query
            .page_size
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .filter(|p| *p != 0)
            .map(|p| p.clamp(1, MAX_PAGE_SIZE))
            .unwrap_or(default_size);

        Pagination { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, pagination: Pagination) -> Self {
        let total_pages = if total <= 0 {
            0
        } else {
            (total + pagination.page_size - 1) / pagination.page_size
        };

        Paginated {
            data,
            pagination: PageInfo {
                page: pagination.page,
                page_size: pagination.page_size,
                total,
                total_pages,
                has_more: pagination.page < total_pages,
            },
        }
    }
}
