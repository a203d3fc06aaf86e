//! Sync orchestration between the remote optimization service and the local
//! result cache.
//!
//! Per requested operation the flow is fetch → transform → upsert. Batch
//! paths isolate failures per item: credential absence, remote 4xx/5xx, and
//! store hiccups are recorded in the per-item outcome, never allowed to abort
//! the loop. The store's unique key on `(user_id, operation_id)` is the
//! serialization point for concurrent syncs.

use crate::models::{ListWindow, UserId};
use crate::remote::RemoteResults;
use crate::store::models::ResultRecord;
use crate::store::traits::DashboardDb;
use crate::telemetry::{TelemetrySink, TracingSink};
use crate::transform::to_result_record;
use crate::vault::CredentialVault;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How many recent remote operations an automatic sync considers.
const AUTO_SYNC_WINDOW: usize = 100;

/// Outcome for a single operation id within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub operation_id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Aggregate counts plus the per-item outcomes of a batch sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<SyncOutcome>,
}

#[derive(Clone)]
pub struct SyncEngine {
    db: Arc<dyn DashboardDb>,
    vault: Arc<CredentialVault>,
    remote: Arc<dyn RemoteResults>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SyncEngine {
    pub fn new(
        db: Arc<dyn DashboardDb>,
        vault: Arc<CredentialVault>,
        remote: Arc<dyn RemoteResults>,
    ) -> Self {
        Self {
            db,
            vault,
            remote,
            telemetry: Arc::new(TracingSink),
        }
    }

    /// Replace the default tracing-backed telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Fetch one operation and mirror it locally.
    ///
    /// `Ok(None)` means the remote service has nothing under this id (result
    /// and status endpoints both empty): a valid outcome, not an error.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn sync_one(
        &self,
        user_id: UserId,
        operation_id: &str,
    ) -> Result<Option<ResultRecord>> {
        if operation_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "operation_id must not be empty".to_string(),
            ));
        }

        let Some(key) = self.vault.decrypt_for_use(user_id).await? else {
            return Err(Error::CredentialUnavailable);
        };

        self.sync_with_key(user_id, &key, operation_id).await
    }

    /// Sync a batch of operation ids independently.
    ///
    /// Exactly one outcome per input id; a failing id never aborts the rest.
    #[tracing::instrument(level = "info", skip(self, operation_ids), fields(count = operation_ids.len()))]
    pub async fn sync_many(
        &self,
        user_id: UserId,
        operation_ids: &[String],
    ) -> Result<SyncReport> {
        if operation_ids.is_empty() {
            return Err(Error::InvalidInput(
                "operation_ids must not be empty".to_string(),
            ));
        }

        // Resolve the key once for the whole batch.
        let key = self.vault.decrypt_for_use(user_id).await?;

        let mut report = SyncReport::default();
        for operation_id in operation_ids {
            let outcome = if operation_id.trim().is_empty() {
                Err(Error::InvalidInput("empty operation id".to_string()))
            } else {
                match &key {
                    None => Err(Error::CredentialUnavailable),
                    Some(key) => self.sync_with_key(user_id, key, operation_id).await,
                }
            };

            match outcome {
                Ok(Some(_)) => {
                    report.synced += 1;
                    report.outcomes.push(SyncOutcome {
                        operation_id: operation_id.clone(),
                        success: true,
                        error: None,
                    });
                }
                Ok(None) => {
                    report.skipped += 1;
                    report.outcomes.push(SyncOutcome {
                        operation_id: operation_id.clone(),
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(%operation_id, error = %e, "batch item sync failed");
                    report.failed += 1;
                    report.outcomes.push(SyncOutcome {
                        operation_id: operation_id.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.telemetry.record(
            "sync.many",
            &serde_json::json!({
                "user_id": user_id.to_string(),
                "synced": report.synced,
                "skipped": report.skipped,
                "failed": report.failed,
            }),
        );
        Ok(report)
    }

    /// Mirror the most recent remote operations that aren't cached yet.
    ///
    /// Operations already present locally are skipped without any remote
    /// fetch, so re-running never re-fetches or duplicates mirrored rows. With
    /// no usable key, or when the remote listing fails, the sync degrades to
    /// the cached state instead of erroring.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn auto_sync(&self, user_id: UserId) -> Result<SyncReport> {
        let Some(key) = self.vault.decrypt_for_use(user_id).await? else {
            tracing::debug!(%user_id, "auto sync unavailable: no usable api key");
            return Ok(SyncReport::default());
        };

        let window = ListWindow {
            limit: AUTO_SYNC_WINDOW,
            offset: 0,
        };
        let items = match self.remote.list_recent(&key, window).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "auto sync degraded: remote list failed");
                return Ok(SyncReport::default());
            }
        };

        let mut report = SyncReport::default();
        for item in items {
            let Some(operation_id) = item
                .get("operation_id")
                .and_then(|v| v.as_str())
                .or_else(|| item.get("id").and_then(|v| v.as_str()))
                .map(str::to_string)
            else {
                tracing::debug!("skipping listed operation without an id");
                continue;
            };

            match self.db.get_result(user_id, &operation_id).await {
                Ok(Some(_)) => {
                    report.skipped += 1;
                    report.outcomes.push(SyncOutcome {
                        operation_id,
                        success: true,
                        error: None,
                    });
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(%operation_id, error = %e, "cache lookup failed");
                    report.failed += 1;
                    report.outcomes.push(SyncOutcome {
                        operation_id,
                        success: false,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            }

            let stored = match self.sync_with_key(user_id, &key, &operation_id).await {
                Ok(Some(record)) => Ok(record),
                // The by-id endpoints may lag the listing; the listed payload
                // itself is still worth mirroring.
                Ok(None) => {
                    let record = to_result_record(user_id, &operation_id, &item);
                    self.db.upsert_result(&record).await
                }
                Err(e) => Err(e),
            };

            match stored {
                Ok(_) => {
                    report.synced += 1;
                    report.outcomes.push(SyncOutcome {
                        operation_id,
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(%operation_id, error = %e, "auto sync item failed");
                    report.failed += 1;
                    report.outcomes.push(SyncOutcome {
                        operation_id,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        self.telemetry.record(
            "sync.auto",
            &serde_json::json!({
                "user_id": user_id.to_string(),
                "synced": report.synced,
                "skipped": report.skipped,
                "failed": report.failed,
            }),
        );
        Ok(report)
    }

    async fn sync_with_key(
        &self,
        user_id: UserId,
        key: &str,
        operation_id: &str,
    ) -> Result<Option<ResultRecord>> {
        let payload = match self.remote.fetch_result(key, operation_id).await? {
            Some(payload) => Some(payload),
            None => self.remote.fetch_status(key, operation_id).await?,
        };
        let Some(payload) = payload else {
            return Ok(None);
        };

        let record = to_result_record(user_id, operation_id, &payload);
        let stored = self.db.upsert_result(&record).await?;
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;
    use crate::store::models::ResultQuery;
    use crate::store::sqlite::SqliteDashboardDb;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct StubRemote {
        results: Mutex<HashMap<String, serde_json::Value>>,
        statuses: Mutex<HashMap<String, serde_json::Value>>,
        listed: Mutex<Vec<serde_json::Value>>,
        failing: Mutex<HashSet<String>>,
        fetch_calls: Mutex<usize>,
    }

    impl StubRemote {
        fn set_result(&self, operation_id: &str, payload: serde_json::Value) {
            self.results
                .lock()
                .unwrap()
                .insert(operation_id.to_string(), payload);
        }

        fn set_status(&self, operation_id: &str, payload: serde_json::Value) {
            self.statuses
                .lock()
                .unwrap()
                .insert(operation_id.to_string(), payload);
        }

        fn set_listed(&self, items: Vec<serde_json::Value>) {
            *self.listed.lock().unwrap() = items;
        }

        fn fail_on(&self, operation_id: &str) {
            self.failing
                .lock()
                .unwrap()
                .insert(operation_id.to_string());
        }

        fn fetch_calls(&self) -> usize {
            *self.fetch_calls.lock().unwrap()
        }

        fn check_failure(&self, operation_id: &str) -> Result<()> {
            if self.failing.lock().unwrap().contains(operation_id) {
                return Err(Error::Remote {
                    status: 500,
                    body: "upstream exploded".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteResults for StubRemote {
        async fn fetch_result(
            &self,
            _api_key: &str,
            operation_id: &str,
        ) -> Result<Option<serde_json::Value>> {
            *self.fetch_calls.lock().unwrap() += 1;
            self.check_failure(operation_id)?;
            Ok(self.results.lock().unwrap().get(operation_id).cloned())
        }

        async fn fetch_status(
            &self,
            _api_key: &str,
            operation_id: &str,
        ) -> Result<Option<serde_json::Value>> {
            self.check_failure(operation_id)?;
            Ok(self.statuses.lock().unwrap().get(operation_id).cloned())
        }

        async fn list_recent(
            &self,
            _api_key: &str,
            _window: ListWindow,
        ) -> Result<Vec<serde_json::Value>> {
            Ok(self.listed.lock().unwrap().clone())
        }
    }

    struct Fixture {
        db: Arc<dyn DashboardDb>,
        remote: Arc<StubRemote>,
        engine: SyncEngine,
        user: UserId,
    }

    async fn fixture_with_key(create_key: bool) -> Fixture {
        let db: Arc<dyn DashboardDb> = Arc::new(SqliteDashboardDb::in_memory().await.unwrap());
        let vault = Arc::new(CredentialVault::new(db.clone(), "test-secret").unwrap());
        let remote = Arc::new(StubRemote::default());
        let engine = SyncEngine::new(db.clone(), vault.clone(), remote.clone());
        let user = UserId(Uuid::new_v4());
        if create_key {
            vault.create(user, "test").await.unwrap();
        }
        Fixture {
            db,
            remote,
            engine,
            user,
        }
    }

    #[tokio::test]
    async fn auto_sync_then_list_end_to_end() {
        let f = fixture_with_key(true).await;
        let payload = json!({
            "operation_id": "op_1",
            "optimal_value": 0.0001,
            "strategy_used": "cma_es",
        });
        f.remote.set_listed(vec![payload.clone()]);
        f.remote.set_result("op_1", payload);

        let report = f.engine.auto_sync(f.user).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 0);

        let (items, total) = f
            .db
            .list_results(f.user, &ResultQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        let item = &items[0];
        assert_eq!(item.operation_id, "op_1");
        assert_eq!(item.status, RunStatus::Completed);
        assert!(item.success);
        assert_eq!(item.optimal_value, Some(0.0001));
    }

    #[tokio::test]
    async fn auto_sync_is_idempotent_and_skips_cached_operations() {
        let f = fixture_with_key(true).await;
        let payload = json!({"operation_id": "op_1", "optimal_value": 1.0});
        f.remote.set_listed(vec![payload.clone()]);
        f.remote.set_result("op_1", payload);

        let first = f.engine.auto_sync(f.user).await.unwrap();
        assert_eq!(first.synced, 1);
        let calls_after_first = f.remote.fetch_calls();

        let second = f.engine.auto_sync(f.user).await.unwrap();
        assert_eq!(second.synced, 0);
        assert_eq!(second.skipped, 1);
        // Cached operations are skipped without a redundant remote fetch.
        assert_eq!(f.remote.fetch_calls(), calls_after_first);

        let stats = f.db.result_stats(f.user).await.unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn auto_sync_without_key_degrades_to_empty_report() {
        let f = fixture_with_key(false).await;
        f.remote
            .set_listed(vec![json!({"operation_id": "op_1"})]);

        let report = f.engine.auto_sync(f.user).await.unwrap();
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn auto_sync_falls_back_to_listed_payload() {
        let f = fixture_with_key(true).await;
        // Listed but not yet available on the by-id endpoints.
        f.remote
            .set_listed(vec![json!({"operation_id": "op_1", "status": "running"})]);

        let report = f.engine.auto_sync(f.user).await.unwrap();
        assert_eq!(report.synced, 1);

        let stored = f.db.get_result(f.user, "op_1").await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn sync_one_stores_despite_empty_remote_listing() {
        let f = fixture_with_key(true).await;
        f.remote.set_listed(Vec::new());
        f.remote
            .set_result("op_9", json!({"operation_id": "op_9", "optimal_value": 3.5}));

        // The empty listing is irrelevant to a direct by-id sync.
        assert_eq!(f.engine.auto_sync(f.user).await.unwrap().synced, 0);
        let record = f.engine.sync_one(f.user, "op_9").await.unwrap().unwrap();
        assert_eq!(record.optimal_value, Some(3.5));
    }

    #[tokio::test]
    async fn sync_one_falls_back_to_the_status_endpoint() {
        let f = fixture_with_key(true).await;
        f.remote
            .set_status("op_2", json!({"operation_id": "op_2", "status": "running"}));

        let record = f.engine.sync_one(f.user, "op_2").await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Running);

        // The run finishes remotely; the next sync updates the row in place.
        f.remote.set_result(
            "op_2",
            json!({"operation_id": "op_2", "status": "completed", "optimal_value": 0.25}),
        );
        let updated = f.engine.sync_one(f.user, "op_2").await.unwrap().unwrap();
        assert_eq!(updated.id, record.id);
        assert_eq!(updated.status, RunStatus::Completed);
        assert_eq!(f.db.result_stats(f.user).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn sync_one_returns_none_when_upstream_has_nothing() {
        let f = fixture_with_key(true).await;
        assert!(f.engine.sync_one(f.user, "op_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_one_without_key_surfaces_credential_unavailable() {
        let f = fixture_with_key(false).await;
        assert!(matches!(
            f.engine.sync_one(f.user, "op_1").await,
            Err(Error::CredentialUnavailable)
        ));
    }

    #[tokio::test]
    async fn sync_many_isolates_failures_per_item() {
        let f = fixture_with_key(true).await;
        f.remote
            .set_result("op_a", json!({"operation_id": "op_a", "optimal_value": 1.0}));
        f.remote
            .set_result("op_c", json!({"operation_id": "op_c", "optimal_value": 2.0}));
        f.remote.fail_on("op_b");

        let ids = vec!["op_a".to_string(), "op_b".to_string(), "op_c".to_string()];
        let report = f.engine.sync_many(f.user, &ids).await.unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 1);

        let by_id: HashMap<_, _> = report
            .outcomes
            .iter()
            .map(|o| (o.operation_id.as_str(), o))
            .collect();
        assert!(by_id["op_a"].success);
        assert!(by_id["op_c"].success);
        assert!(!by_id["op_b"].success);
        assert!(by_id["op_b"].error.as_deref().unwrap().contains("500"));

        // The failing item never blocked its neighbors.
        assert_eq!(f.db.result_stats(f.user).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_before_any_remote_call() {
        let f = fixture_with_key(true).await;
        assert!(matches!(
            f.engine.sync_many(f.user, &[]).await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(f.remote.fetch_calls(), 0);
    }
}
