pub mod models;
pub mod sqlite;
pub mod traits;

pub use models::{
    ApiKeyRecord, Pagination, ResultPage, ResultQuery, ResultRecord, ResultStats, SortField,
    SortOrder, MAX_PAGE_LIMIT, MIN_PAGE_LIMIT,
};
pub use sqlite::SqliteDashboardDb;
pub use traits::DashboardDb;
