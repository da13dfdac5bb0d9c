//! Source lifecycle: creation, upload staging, ingestion kickoff, search
//! inclusion, and cascading deletion.

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use maildex_storage::{kv, models::SourceRow, queue, timefmt};

use crate::{Error, MaildexService, Result, carryover_key, chunk_blob_key, progress};

#[derive(Clone, Debug)]
pub struct CreateSourceRequest {
	pub tenant_id: String,
	pub name: String,
	pub kind: String,
	pub file_name: Option<String>,
	pub email_address: Option<String>,
}

impl MaildexService {
	pub async fn create_source(
		&self,
		request: CreateSourceRequest,
		now: OffsetDateTime,
	) -> Result<SourceRow> {
		let allowed = ["gmail", "outlook", "mbox", "pst", "api"];

		if !allowed.contains(&request.kind.as_str()) {
			return Err(Error::InvalidRequest {
				message: format!("Unknown source kind {:?}.", request.kind),
			});
		}

		let id = Uuid::new_v4().to_string();

		sqlx::query(
			"\
INSERT INTO sources (
	id,
	tenant_id,
	name,
	email_address,
	kind,
	file_name,
	status,
	expected,
	succeeded,
	failed,
	included_in_search,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, 0, 0, 1, $7)",
		)
		.bind(&id)
		.bind(&request.tenant_id)
		.bind(&request.name)
		.bind(request.email_address.as_deref())
		.bind(&request.kind)
		.bind(request.file_name.as_deref())
		.bind(timefmt::to_text(now))
		.execute(&self.db.pool)
		.await?;

		self.get_source(&request.tenant_id, &id).await?.ok_or_else(|| Error::NotFound {
			message: format!("Source {id} vanished after insert."),
		})
	}

	pub async fn get_source(&self, tenant_id: &str, source_id: &str) -> Result<Option<SourceRow>> {
		let row = sqlx::query_as::<_, SourceRow>(
			"\
SELECT id, tenant_id, name, email_address, kind, file_name, status, expected, succeeded,
	failed, included_in_search, error, started_at, completed_at, created_at
FROM sources
WHERE id = $1 AND tenant_id = $2",
		)
		.bind(source_id)
		.bind(tenant_id)
		.fetch_optional(&self.db.pool)
		.await?;

		Ok(row)
	}

	pub async fn list_sources(&self, tenant_id: &str) -> Result<Vec<SourceRow>> {
		let rows = sqlx::query_as::<_, SourceRow>(
			"\
SELECT id, tenant_id, name, email_address, kind, file_name, status, expected, succeeded,
	failed, included_in_search, error, started_at, completed_at, created_at
FROM sources
WHERE tenant_id = $1
ORDER BY created_at DESC",
		)
		.bind(tenant_id)
		.fetch_all(&self.db.pool)
		.await?;

		Ok(rows)
	}

	/// Stages one uploaded chunk under the source's upload prefix.
	pub async fn store_chunk(
		&self,
		tenant_id: &str,
		source_id: &str,
		index: u32,
		bytes: &[u8],
	) -> Result<()> {
		self.require_source(tenant_id, source_id).await?;
		self.blobs.put(&chunk_blob_key(source_id, index), bytes).await?;

		Ok(())
	}

	/// Marks the source as processing and enqueues the first chunk job. The
	/// queue chain takes it from here; there is no host-specific background
	/// hook to lose work in.
	pub async fn begin_ingest(
		&self,
		tenant_id: &str,
		source_id: &str,
		total_chunks: u32,
		now: OffsetDateTime,
	) -> Result<()> {
		if total_chunks == 0 {
			return Err(Error::InvalidRequest {
				message: "An upload must have at least one chunk.".to_string(),
			});
		}

		self.require_source(tenant_id, source_id).await?;
		progress::mark_processing(&self.db, tenant_id, source_id, now).await?;
		self.enqueue_chunk_job(tenant_id, source_id, 0, total_chunks, now).await?;

		Ok(())
	}

	pub async fn set_included_in_search(
		&self,
		tenant_id: &str,
		source_id: &str,
		included: bool,
	) -> Result<()> {
		let result =
			sqlx::query("UPDATE sources SET included_in_search = $1 WHERE id = $2 AND tenant_id = $3")
				.bind(included)
				.bind(source_id)
				.bind(tenant_id)
				.execute(&self.db.pool)
				.await?;

		if result.rows_affected() == 0 {
			return Err(Error::NotFound { message: format!("Source {source_id} not found.") });
		}

		Ok(())
	}

	/// Deletes a source and everything it owns: message rows (recipients and
	/// attachment rows cascade), attachment and upload blobs, vectors, queued
	/// work, and the carryover key. Late-arriving queue messages for the
	/// source fail on the foreign key and are counted, not retried forever.
	pub async fn delete_source(&self, tenant_id: &str, source_id: &str) -> Result<()> {
		self.require_source(tenant_id, source_id).await?;

		let message_ids: Vec<(String,)> = sqlx::query_as(
			"SELECT message_id FROM messages WHERE tenant_id = $1 AND source_id = $2",
		)
		.bind(tenant_id)
		.bind(source_id)
		.fetch_all(&self.db.pool)
		.await?;
		let message_ids: Vec<String> = message_ids.into_iter().map(|(id,)| id).collect();
		let attachment_keys: Vec<(String,)> = sqlx::query_as(
			"\
SELECT a.blob_key
FROM attachments a
JOIN messages m ON m.id = a.message_id
WHERE m.tenant_id = $1 AND m.source_id = $2",
		)
		.bind(tenant_id)
		.bind(source_id)
		.fetch_all(&self.db.pool)
		.await?;

		for (key,) in attachment_keys {
			self.blobs.delete(&key).await?;
		}

		self.vectors.delete(tenant_id, &message_ids).await?;

		// Delete message rows directly so the FTS sync triggers fire;
		// recipients and attachment rows cascade from them.
		sqlx::query("DELETE FROM messages WHERE tenant_id = $1 AND source_id = $2")
			.bind(tenant_id)
			.bind(source_id)
			.execute(&self.db.pool)
			.await?;
		sqlx::query("DELETE FROM sources WHERE id = $1 AND tenant_id = $2")
			.bind(source_id)
			.bind(tenant_id)
			.execute(&self.db.pool)
			.await?;

		self.blobs.delete_prefix(&format!("uploads/{source_id}/")).await?;
		kv::delete(&self.db, &carryover_key(source_id)).await?;
		queue::purge_for_source(&self.db, source_id).await?;

		info!(
			source_id = %source_id,
			messages = message_ids.len(),
			"Deleted source and its owned data."
		);

		Ok(())
	}

	async fn require_source(&self, tenant_id: &str, source_id: &str) -> Result<SourceRow> {
		self.get_source(tenant_id, source_id).await?.ok_or_else(|| Error::NotFound {
			message: format!("Source {source_id} not found."),
		})
	}
}
