//! The chunk-processing state machine.
//!
//! Chunks of a source are processed strictly in index order: handler `i`
//! enqueues `i + 1` itself, so the shared carryover key has exactly one
//! in-flight owner. Every step is safe to retry; re-reads of the chunk and
//! carryover are byte-identical, and downstream dedupes on message id.

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use maildex_domain::{mbox, message};
use maildex_storage::kv;

use crate::{Error, MaildexService, Result, carryover_key, chunk_blob_key, progress};

pub const NO_MESSAGES_ERROR: &str = "No emails found in file";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
	pub emitted: u64,
	pub parse_failures: u64,
}

impl MaildexService {
	/// Handles one `process-chunk` job end to end.
	pub async fn process_chunk(
		&self,
		tenant_id: &str,
		source_id: &str,
		index: u32,
		total: u32,
		now: OffsetDateTime,
	) -> Result<ChunkOutcome> {
		let is_last = index + 1 >= total;
		let chunk_key = chunk_blob_key(source_id, index);
		let Some(chunk) = self.blobs.get(&chunk_key).await? else {
			// The chunk is deleted only after the next one is enqueued, so a
			// missing object here is a transient read worth retrying.
			return Err(Error::NotFound { message: format!("Chunk object {chunk_key} is absent.") });
		};
		let carryover_key = carryover_key(source_id);
		let mut buffer = kv::get(&self.db, &carryover_key, now).await?.unwrap_or_default();

		buffer.extend_from_slice(&chunk);

		let split = mbox::split_chunk(&buffer, is_last);
		let mut outcome = ChunkOutcome::default();

		for segment in &split.segments {
			match message::parse(&segment.raw, now, self.cfg.ingest.body_max_chars) {
				Some(email) => {
					self.enqueue_email_job(tenant_id, source_id, email, now).await?;

					outcome.emitted += 1;
				},
				None => {
					outcome.parse_failures += 1;

					debug!(
						source_id = %source_id,
						chunk = index,
						"Dropped a malformed message segment."
					);
				},
			}
		}

		if let Some(carryover) = &split.carryover {
			let ttl = Duration::seconds(self.cfg.ingest.carryover_ttl_seconds);

			kv::put(&self.db, &carryover_key, carryover, ttl, now).await?;
		}

		if outcome.emitted > 0 {
			progress::increment_expected(&self.db, tenant_id, source_id, outcome.emitted as i64)
				.await?;
		}

		if outcome.parse_failures > 0 {
			warn!(
				source_id = %source_id,
				chunk = index,
				parse_failures = outcome.parse_failures,
				"Some message segments failed to parse and were dropped."
			);
		}

		if !is_last {
			// Chain before deleting the consumed chunk: if the enqueue fails
			// the retry still finds this chunk in place.
			self.enqueue_chunk_job(tenant_id, source_id, index + 1, total, now).await?;
			self.blobs.delete(&chunk_key).await?;

			return Ok(outcome);
		}

		self.blobs.delete(&chunk_key).await?;
		kv::delete(&self.db, &carryover_key).await?;

		let expected = progress::expected_count(&self.db, tenant_id, source_id).await?;

		if expected == 0 {
			progress::fail_source(&self.db, tenant_id, source_id, NO_MESSAGES_ERROR, now).await?;

			info!(source_id = %source_id, "Ingestion finished with no messages; source failed.");
		}

		Ok(outcome)
	}
}
