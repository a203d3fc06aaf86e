use crate::models::{RunStatus, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored remote-service API key.
///
/// `ciphertext` is `hex(nonce):hex(tag):hex(payload)` produced by the vault
/// and is never serialized into API responses. The plaintext key itself is
/// returned exactly once, at creation, and is unrecoverable afterwards
/// without the process master secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: Uuid,
    pub user_id: UserId,
    pub name: String,
    /// Leading characters of the plaintext, for display ("ob_01J8WX…").
    pub key_prefix: String,
    #[serde(skip_serializing, default)]
    pub ciphertext: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Locally cached optimization result, mirrored from the remote service.
///
/// `(user_id, operation_id)` is unique; syncs update rows in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub operation_id: String,
    /// Optional human-readable problem label, used by dashboard search.
    pub problem_id: Option<String>,
    pub best_solution: Option<serde_json::Value>,
    pub optimal_value: Option<f64>,
    pub strategy_used: Option<String>,
    pub evaluations_used: Option<i64>,
    pub convergence_history: Option<serde_json::Value>,
    pub execution_time_seconds: Option<f64>,
    pub iterations: Option<i64>,
    pub status: RunStatus,
    pub success: bool,
    pub error_message: Option<String>,
    pub learning_enabled: bool,
    pub learning_evaluations: Option<i64>,
    pub config: Option<serde_json::Value>,
    pub insights: Option<serde_json::Value>,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Sortable columns for result listings.
///
/// A closed enum rather than a free-form column name: anything outside this
/// set is rejected at deserialization and can never reach the SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    OptimalValue,
    EvaluationsUsed,
}

impl SortField {
    pub fn as_column(self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::OptimalValue => "optimal_value",
            SortField::EvaluationsUsed => "evaluations_used",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

pub const MIN_PAGE_LIMIT: u32 = 1;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Filtered, paginated, sorted result listing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultQuery {
    pub page: u32,
    pub limit: u32,
    pub status: Option<RunStatus>,
    pub strategy: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Matched against `problem_id`.
    pub search: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for ResultQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            status: None,
            strategy: None,
            since: None,
            until: None,
            search: None,
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
        }
    }
}

impl ResultQuery {
    /// Clamp page to `>= 1` and limit to `[1, 100]`.
    pub fn clamped(&self) -> Self {
        let mut q = self.clone();
        q.page = q.page.max(1);
        q.limit = q.limit.clamp(MIN_PAGE_LIMIT, MAX_PAGE_LIMIT);
        q
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let total_pages = total.div_ceil(limit.max(1) as u64);
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// Aggregates over the unfiltered owner scope, so dashboard summary cards
/// stay stable while the table is filtered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ResultStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub running: u64,
    pub avg_execution_seconds: Option<f64>,
    pub avg_evaluations: Option<f64>,
}

/// One page of results plus pagination and owner-scope stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    pub items: Vec<ResultRecord>,
    pub pagination: Pagination,
    pub stats: ResultStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_and_page_are_clamped() {
        let q = ResultQuery {
            page: 0,
            limit: 0,
            ..ResultQuery::default()
        }
        .clamped();
        assert_eq!(q.page, 1);
        assert_eq!(q.limit, 1);

        let q = ResultQuery {
            page: 3,
            limit: 500,
            ..ResultQuery::default()
        }
        .clamped();
        assert_eq!(q.page, 3);
        assert_eq!(q.limit, 100);
    }

    #[test]
    fn sort_field_rejects_unknown_columns_at_deserialization() {
        assert!(serde_json::from_str::<SortField>("\"optimal_value\"").is_ok());
        assert!(serde_json::from_str::<SortField>("\"id; DROP TABLE\"").is_err());
    }

    #[test]
    fn pagination_rounds_total_pages_up() {
        let p = Pagination::new(1, 20, 41);
        assert_eq!(p.total_pages, 3);
        assert_eq!(Pagination::new(1, 20, 0).total_pages, 0);
    }
}
