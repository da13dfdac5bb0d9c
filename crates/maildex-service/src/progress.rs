//! Source progress counters and the atomic completion transition.

use time::OffsetDateTime;

use maildex_storage::{db::Db, timefmt};

use crate::Result;

pub async fn increment_expected(
	db: &Db,
	tenant_id: &str,
	source_id: &str,
	count: i64,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE sources
SET expected = expected + $1
WHERE id = $2 AND tenant_id = $3",
	)
	.bind(count)
	.bind(source_id)
	.bind(tenant_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn increment_processed(
	db: &Db,
	tenant_id: &str,
	source_id: &str,
	processed: i64,
	failed: i64,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE sources
SET succeeded = succeeded + $1, failed = failed + $2
WHERE id = $3 AND tenant_id = $4",
	)
	.bind(processed)
	.bind(failed)
	.bind(source_id)
	.bind(tenant_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// The completion transition. Only the consumer whose conditional update
/// changes exactly one row owns the transition; concurrent callers observing
/// the same satisfied predicate become no-ops.
pub async fn try_complete(
	db: &Db,
	tenant_id: &str,
	source_id: &str,
	now: OffsetDateTime,
) -> Result<bool> {
	let result = sqlx::query(
		"\
UPDATE sources
SET status = 'completed', completed_at = $1
WHERE id = $2
	AND tenant_id = $3
	AND status = 'processing'
	AND expected > 0
	AND (succeeded + failed) >= expected",
	)
	.bind(timefmt::to_text(now))
	.bind(source_id)
	.bind(tenant_id)
	.execute(&db.pool)
	.await?;

	Ok(result.rows_affected() == 1)
}

pub async fn mark_processing(
	db: &Db,
	tenant_id: &str,
	source_id: &str,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE sources
SET status = 'processing', started_at = COALESCE(started_at, $1)
WHERE id = $2 AND tenant_id = $3 AND status IN ('pending', 'processing')",
	)
	.bind(timefmt::to_text(now))
	.bind(source_id)
	.bind(tenant_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn fail_source(
	db: &Db,
	tenant_id: &str,
	source_id: &str,
	error: &str,
	now: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
UPDATE sources
SET status = 'failed', error = $1, completed_at = $2
WHERE id = $3 AND tenant_id = $4 AND status NOT IN ('completed', 'failed')",
	)
	.bind(error)
	.bind(timefmt::to_text(now))
	.bind(source_id)
	.bind(tenant_id)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn expected_count(db: &Db, tenant_id: &str, source_id: &str) -> Result<i64> {
	let (expected,): (i64,) =
		sqlx::query_as("SELECT expected FROM sources WHERE id = $1 AND tenant_id = $2")
			.bind(source_id)
			.bind(tenant_id)
			.fetch_one(&db.pool)
			.await?;

	Ok(expected)
}
