//! Usage ledger - append-only log of gateway calls.
//!
//! One record is written per call that reaches the AI service, whether it
//! succeeds or fails, so the rate limiter counts attempted load. Records are
//! never updated or deleted.

use crate::{
    db::DbPool,
    error::AppError,
    models::usage::{NewUsageRecord, UsageRecord, UsageSummary},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Append one record to the ledger.
pub async fn record(pool: &DbPool, event: NewUsageRecord) -> Result<UsageRecord, AppError> {
    let record = sqlx::query_as::<_, UsageRecord>(
        r#"
        INSERT INTO usage_records (
            user_id,
            api_key_id,
            endpoint,
            request_size,
            response_size,
            document_size,
            processing_time_ms,
            successful,
            error
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(event.user_id)
    .bind(event.api_key_id)
    .bind(event.endpoint.as_str())
    .bind(event.request_size)
    .bind(event.response_size)
    .bind(event.document_size)
    .bind(event.processing_time_ms)
    .bind(event.successful)
    .bind(event.error)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Number of records for a key at or after `since`.
pub async fn count_since(
    pool: &DbPool,
    api_key_id: Uuid,
    since: DateTime<Utc>,
) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM usage_records WHERE api_key_id = $1 AND recorded_at >= $2",
    )
    .bind(api_key_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Tally a key's records since `since` by endpoint and by UTC day.
pub async fn aggregate(
    pool: &DbPool,
    api_key_id: Uuid,
    since: DateTime<Utc>,
) -> Result<UsageSummary, AppError> {
    let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT endpoint, recorded_at FROM usage_records WHERE api_key_id = $1 AND recorded_at >= $2",
    )
    .bind(api_key_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(tally(rows.iter().map(|(e, t)| (e.as_str(), *t))))
}

/// Fold `(endpoint, timestamp)` pairs into a summary.
pub fn tally<'a, I>(records: I) -> UsageSummary
where
    I: IntoIterator<Item = (&'a str, DateTime<Utc>)>,
{
    let mut summary = UsageSummary::default();
    for (endpoint, at) in records {
        summary.total += 1;
        *summary.by_endpoint.entry(endpoint.to_string()).or_default() += 1;
        let day = at.date_naive().format("%Y-%m-%d").to_string();
        *summary.by_day.entry(day).or_default() += 1;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tally_groups_by_endpoint_and_day() {
        let d1 = Utc.with_ymd_and_hms(2025, 12, 20, 9, 0, 0).unwrap();
        let records = vec![
            ("useCase", d1),
            ("useCase", d1 + chrono::Duration::hours(1)),
            ("useCase", d1 + chrono::Duration::hours(2)),
            ("multiAgent", d1 + chrono::Duration::hours(3)),
            ("multiAgent", d1 + chrono::Duration::hours(4)),
        ];

        let summary = tally(records);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.by_endpoint.len(), 2);
        assert_eq!(summary.by_endpoint["useCase"], 3);
        assert_eq!(summary.by_endpoint["multiAgent"], 2);
        assert_eq!(summary.by_day.len(), 1);
        assert_eq!(summary.by_day["2025-12-20"], 5);
    }

    #[test]
    fn test_tally_splits_days_at_utc_midnight() {
        let late = Utc.with_ymd_and_hms(2025, 12, 20, 23, 59, 59).unwrap();
        let early = Utc.with_ymd_and_hms(2025, 12, 21, 0, 0, 0).unwrap();

        let summary = tally(vec![("reverseTransaction", late), ("reverseTransaction", early)]);

        assert_eq!(summary.by_day["2025-12-20"], 1);
        assert_eq!(summary.by_day["2025-12-21"], 1);
        assert_eq!(summary.by_endpoint["reverseTransaction"], 2);
    }

    #[test]
    fn test_tally_empty() {
        let summary = tally(Vec::<(&str, DateTime<Utc>)>::new());
        assert_eq!(summary, UsageSummary::default());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total"], 0);
        assert!(json["byEndpoint"].as_object().unwrap().is_empty());
    }
}
