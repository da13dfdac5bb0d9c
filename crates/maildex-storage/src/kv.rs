//! Short-TTL key-value state (chunk carryover, ephemeral session records).
//!
//! Expired entries read as absent; writers may leave them for the next put
//! or an occasional purge to reclaim.

use time::{Duration, OffsetDateTime};

use crate::{Result, db::Db, timefmt};

pub async fn put(
	db: &Db,
	key: &str,
	value: &[u8],
	ttl: Duration,
	now: OffsetDateTime,
) -> Result<()> {
	let expires_at = timefmt::to_text(now + ttl);

	sqlx::query(
		"\
INSERT INTO kv_entries (key, value, expires_at)
VALUES ($1, $2, $3)
ON CONFLICT (key) DO UPDATE
SET
	value = excluded.value,
	expires_at = excluded.expires_at",
	)
	.bind(key)
	.bind(value)
	.bind(expires_at)
	.execute(&db.pool)
	.await?;

	Ok(())
}

pub async fn get(db: &Db, key: &str, now: OffsetDateTime) -> Result<Option<Vec<u8>>> {
	let row: Option<(Vec<u8>,)> = sqlx::query_as(
		"\
SELECT value
FROM kv_entries
WHERE key = $1 AND (expires_at IS NULL OR expires_at > $2)",
	)
	.bind(key)
	.bind(timefmt::to_text(now))
	.fetch_optional(&db.pool)
	.await?;

	Ok(row.map(|(value,)| value))
}

pub async fn delete(db: &Db, key: &str) -> Result<()> {
	sqlx::query("DELETE FROM kv_entries WHERE key = $1").bind(key).execute(&db.pool).await?;

	Ok(())
}

pub async fn purge_expired(db: &Db, now: OffsetDateTime) -> Result<u64> {
	let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= $1")
		.bind(timefmt::to_text(now))
		.execute(&db.pool)
		.await?;

	Ok(result.rows_affected())
}
