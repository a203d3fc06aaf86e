use crate::models::UserId;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use crate::store::models::{
    ApiKeyRecord, Pagination, ResultPage, ResultQuery, ResultRecord, ResultStats, SortField,
    SortOrder,
};

/// Local dashboard store: encrypted API keys plus the mirrored result cache.
///
/// The store is the serialization point for concurrent syncs: the unique key
/// on `(user_id, operation_id)` and an atomic upsert make simultaneous
/// dashboard loads safe without any cross-item locking in the orchestrator.
#[async_trait]
pub trait DashboardDb: Send + Sync {
    // API keys (ciphertext blobs; encryption is handled by the vault).
    async fn insert_api_key(&self, key: &ApiKeyRecord) -> Result<()>;
    async fn list_api_keys(&self, user_id: UserId) -> Result<Vec<ApiKeyRecord>>;
    /// Flip `active` to false. `NotFound` when the key is not the user's.
    async fn revoke_api_key(&self, user_id: UserId, key_id: Uuid) -> Result<ApiKeyRecord>;
    /// Most recently created key with `active = true`, if any.
    async fn latest_active_api_key(&self, user_id: UserId) -> Result<Option<ApiKeyRecord>>;
    async fn touch_api_key_last_used(&self, key_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // Result cache.
    /// Insert-or-update keyed by `(user_id, operation_id)`; preserves the
    /// local `id` and `created_at` of an existing row. Returns the stored row.
    async fn upsert_result(&self, record: &ResultRecord) -> Result<ResultRecord>;
    async fn get_result(&self, user_id: UserId, operation_id: &str)
        -> Result<Option<ResultRecord>>;
    /// Returns the matching page plus the total row count for the filters.
    async fn list_results(
        &self,
        user_id: UserId,
        query: &ResultQuery,
    ) -> Result<(Vec<ResultRecord>, u64)>;
    /// Aggregates over the whole owner scope, ignoring any listing filters.
    async fn result_stats(&self, user_id: UserId) -> Result<ResultStats>;
}
