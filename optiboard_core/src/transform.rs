//! Mapping from remote result payloads to local cache records.
//!
//! The remote service omits fields freely, so every accessor here coerces
//! rather than fails: malformed or missing fields simply become absent local
//! fields. This is the only place loose `serde_json::Value` payloads are
//! interpreted.

use crate::models::{RunStatus, UserId};
use crate::store::models::ResultRecord;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Build a local record from a remote payload. Never fails.
///
/// Lifecycle-status inference, in order: an explicit parseable `status`
/// field wins; otherwise a present optimal value implies `completed`;
/// otherwise a present error implies `failed`; otherwise `running`.
pub fn to_result_record(
    user_id: UserId,
    operation_id: &str,
    payload: &serde_json::Value,
) -> ResultRecord {
    let explicit_status = opt_str(payload, &["status"]).and_then(|s| RunStatus::parse_str(&s));
    let optimal_value = opt_f64(payload, &["optimal_value"]);
    let error_message = opt_str(payload, &["error", "error_message"]);

    let status = match explicit_status {
        Some(s) => s,
        None if optimal_value.is_some() => RunStatus::Completed,
        None if error_message.is_some() => RunStatus::Failed,
        None => RunStatus::Running,
    };

    let success = opt_bool(payload, &["success"])
        .unwrap_or(status == RunStatus::Completed && error_message.is_none());

    let completed_at = opt_datetime(payload, &["completed_at", "finished_at"]).or_else(|| {
        // A record that resolves to completed without a remote timestamp is
        // stamped at sync time so the dashboard always has one.
        (status == RunStatus::Completed).then(Utc::now)
    });

    ResultRecord {
        id: Uuid::new_v4(),
        user_id,
        operation_id: operation_id.to_string(),
        problem_id: opt_str(payload, &["problem_id"]),
        best_solution: payload
            .get("best_solution")
            .or_else(|| payload.get("solution"))
            .filter(|v| !v.is_null())
            .cloned(),
        optimal_value,
        strategy_used: opt_str(payload, &["strategy_used", "strategy"]),
        evaluations_used: opt_i64(payload, &["evaluations_used", "evaluations"]),
        convergence_history: payload
            .get("convergence_history")
            .filter(|v| !v.is_null())
            .cloned(),
        execution_time_seconds: opt_f64(payload, &["execution_time_seconds", "execution_time"]),
        iterations: opt_i64(payload, &["iterations"]),
        status,
        success,
        error_message,
        learning_enabled: opt_bool(payload, &["learning_enabled"]).unwrap_or(false),
        learning_evaluations: opt_i64(payload, &["learning_evaluations"]),
        config: payload.get("config").filter(|v| !v.is_null()).cloned(),
        insights: payload.get("insights").filter(|v| !v.is_null()).cloned(),
        domain: opt_str(payload, &["domain"]),
        created_at: opt_datetime(payload, &["created_at"]).unwrap_or_else(Utc::now),
        completed_at,
    }
}

fn opt_str(payload: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(k).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn opt_f64(payload: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| payload.get(k).and_then(|v| v.as_f64()))
}

fn opt_i64(payload: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| payload.get(k).and_then(|v| v.as_i64()))
}

fn opt_bool(payload: &serde_json::Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| payload.get(k).and_then(|v| v.as_bool()))
}

fn opt_datetime(payload: &serde_json::Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    opt_str(payload, keys).and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
