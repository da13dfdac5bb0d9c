//! Durable at-least-once job queue on the relational store.
//!
//! A claim is a lease: `available_at` is pushed past the lease window in the
//! same statement that selects the batch, so a crashed consumer's jobs come
//! back after the lease expires. Failures reschedule with exponential backoff
//! until the attempt cap, then park as DEAD for operator inspection.

use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{Result, db::Db, timefmt};

const BASE_BACKOFF_MS: i64 = 500;
const MAX_BACKOFF_MS: i64 = 30_000;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct QueueJob {
	pub job_id: String,
	pub tenant_id: String,
	pub source_id: String,
	pub kind: String,
	pub payload: String,
	pub attempts: i64,
}
impl QueueJob {
	pub fn payload_json(&self) -> Result<Value> {
		Ok(serde_json::from_str(&self.payload)?)
	}
}

pub async fn enqueue(
	db: &Db,
	tenant_id: &str,
	source_id: &str,
	kind: &str,
	payload: &Value,
	now: OffsetDateTime,
) -> Result<String> {
	let job_id = Uuid::new_v4().to_string();
	let now_text = timefmt::to_text(now);

	sqlx::query(
		"\
INSERT INTO job_queue (
	job_id,
	tenant_id,
	source_id,
	kind,
	payload,
	status,
	attempts,
	available_at,
	created_at,
	updated_at
)
VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, $6, $6)",
	)
	.bind(&job_id)
	.bind(tenant_id)
	.bind(source_id)
	.bind(kind)
	.bind(payload.to_string())
	.bind(&now_text)
	.execute(&db.pool)
	.await?;

	Ok(job_id)
}

/// Claims up to `limit` due jobs and leases them for `lease_seconds`.
/// Delivery order follows `available_at`, so chained chunk jobs come out in
/// the order they were enqueued.
pub async fn claim_batch(
	db: &Db,
	limit: u32,
	lease_seconds: i64,
	now: OffsetDateTime,
) -> Result<Vec<QueueJob>> {
	let now_text = timefmt::to_text(now);
	let lease_text = timefmt::to_text(now + Duration::seconds(lease_seconds));
	let jobs = sqlx::query_as::<_, QueueJob>(
		"\
UPDATE job_queue
SET available_at = $1, updated_at = $2
WHERE job_id IN (
	SELECT job_id
	FROM job_queue
	WHERE status IN ('PENDING', 'FAILED') AND available_at <= $2
	ORDER BY available_at ASC, created_at ASC
	LIMIT $3
)
RETURNING job_id, tenant_id, source_id, kind, payload, attempts",
	)
	.bind(&lease_text)
	.bind(&now_text)
	.bind(limit)
	.fetch_all(&db.pool)
	.await?;

	Ok(jobs)
}

pub async fn ack(db: &Db, job_id: &str, now: OffsetDateTime) -> Result<()> {
	sqlx::query("UPDATE job_queue SET status = 'DONE', updated_at = $1 WHERE job_id = $2")
		.bind(timefmt::to_text(now))
		.bind(job_id)
		.execute(&db.pool)
		.await?;

	Ok(())
}

/// Records a failed delivery. Below the attempt cap the job is rescheduled
/// with backoff; at the cap it parks as DEAD and is never delivered again.
pub async fn nack(
	db: &Db,
	job_id: &str,
	attempts: i64,
	max_attempts: u32,
	error: &str,
	now: OffsetDateTime,
) -> Result<()> {
	let next_attempts = attempts.saturating_add(1);
	let status = if next_attempts >= max_attempts as i64 { "DEAD" } else { "FAILED" };
	let available_at = timefmt::to_text(now + backoff_for_attempt(next_attempts));

	sqlx::query(
		"\
UPDATE job_queue
SET status = $1, attempts = $2, last_error = $3, available_at = $4, updated_at = $5
WHERE job_id = $6",
	)
	.bind(status)
	.bind(next_attempts)
	.bind(error)
	.bind(available_at)
	.bind(timefmt::to_text(now))
	.bind(job_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn pending_count(db: &Db, source_id: &str) -> Result<i64> {
	let (count,): (i64,) = sqlx::query_as(
		"\
SELECT COUNT(*)
FROM job_queue
WHERE source_id = $1 AND status IN ('PENDING', 'FAILED')",
	)
	.bind(source_id)
	.fetch_one(&db.pool)
	.await?;

	Ok(count)
}

pub async fn purge_for_source(db: &Db, source_id: &str) -> Result<u64> {
	let result = sqlx::query("DELETE FROM job_queue WHERE source_id = $1")
		.bind(source_id)
		.execute(&db.pool)
		.await?;

	Ok(result.rows_affected())
}

pub fn backoff_for_attempt(attempt: i64) -> Duration {
	let attempts = attempt.max(1) as u32;
	let exp = attempts.saturating_sub(1).min(6);
	let base = BASE_BACKOFF_MS.saturating_mul(1 << exp);

	Duration::milliseconds(base.min(MAX_BACKOFF_MS))
}
