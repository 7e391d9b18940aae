pub mod pagination;
pub mod patch;
pub mod validation;

pub use pagination::{Paginated, Pagination, PaginationQuery};
pub use patch::{PatchBuilder, nullable};
pub use validation::parse_id;

pub mod error_codes {
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const CONFLICT: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const INTERNAL_ERROR: i32 = 5000;
}
