//! Queue job variants and payload spill handling.
//!
//! Jobs are a tagged union with one decoder per variant; the consumer matches
//! exhaustively. A serialized `process-email` above the inline cap spills the
//! whole parsed message to the blob store and enqueues a reference instead,
//! keeping every queue payload under the 256 KiB transport limit.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use maildex_domain::ParsedEmail;
use maildex_storage::queue;

use crate::{Error, MaildexService, Result};

pub const QUEUE_PAYLOAD_CAP_BYTES: usize = 256 * 1_024;

pub const KIND_PROCESS_CHUNK: &str = "process-chunk";
pub const KIND_PROCESS_EMAIL: &str = "process-email";
pub const KIND_PROCESS_EMAIL_REF: &str = "process-email-ref";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Job {
	ProcessChunk { source_id: String, tenant_id: String, index: u32, total: u32 },
	ProcessEmail { source_id: String, tenant_id: String, email: Box<ParsedEmail> },
	ProcessEmailRef { source_id: String, tenant_id: String, blob_key: String, message_id: String },
}
impl Job {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::ProcessChunk { .. } => KIND_PROCESS_CHUNK,
			Self::ProcessEmail { .. } => KIND_PROCESS_EMAIL,
			Self::ProcessEmailRef { .. } => KIND_PROCESS_EMAIL_REF,
		}
	}

	pub fn decode(payload: &str) -> Result<Self> {
		Ok(serde_json::from_str(payload)?)
	}
}

impl MaildexService {
	pub async fn enqueue_chunk_job(
		&self,
		tenant_id: &str,
		source_id: &str,
		index: u32,
		total: u32,
		now: OffsetDateTime,
	) -> Result<()> {
		let job = Job::ProcessChunk {
			source_id: source_id.to_string(),
			tenant_id: tenant_id.to_string(),
			index,
			total,
		};

		self.enqueue_job(tenant_id, source_id, &job, now).await
	}

	/// Enqueues one parsed message, spilling to the blob store when the
	/// inline payload would exceed the configured cap.
	pub async fn enqueue_email_job(
		&self,
		tenant_id: &str,
		source_id: &str,
		email: ParsedEmail,
		now: OffsetDateTime,
	) -> Result<()> {
		let message_id = email.message_id.clone();
		let inline_payload = serde_json::json!({
			"type": KIND_PROCESS_EMAIL,
			"source_id": source_id,
			"tenant_id": tenant_id,
			"email": &email,
		});

		if inline_payload.to_string().len() <= self.cfg.ingest.inline_payload_cap_bytes {
			queue::enqueue(
				&self.db,
				tenant_id,
				source_id,
				KIND_PROCESS_EMAIL,
				&inline_payload,
				now,
			)
			.await?;

			return Ok(());
		}

		let blob_key = format!("uploads/{source_id}/email-body-{}", Uuid::new_v4());

		self.blobs.put(&blob_key, &serde_json::to_vec(&email)?).await?;

		let job = Job::ProcessEmailRef {
			source_id: source_id.to_string(),
			tenant_id: tenant_id.to_string(),
			blob_key,
			message_id,
		};

		self.enqueue_job(tenant_id, source_id, &job, now).await
	}

	async fn enqueue_job(
		&self,
		tenant_id: &str,
		source_id: &str,
		job: &Job,
		now: OffsetDateTime,
	) -> Result<()> {
		let payload = serde_json::to_value(job)?;

		if payload.to_string().len() > QUEUE_PAYLOAD_CAP_BYTES {
			return Err(Error::InvalidRequest {
				message: format!(
					"Job payload exceeds the {QUEUE_PAYLOAD_CAP_BYTES}-byte transport cap."
				),
			});
		}

		queue::enqueue(&self.db, tenant_id, source_id, job.kind(), &payload, now).await?;

		Ok(())
	}

	/// Resolves an email job to its parsed message. Spilled bodies are
	/// fetched and deleted; a missing spill means a retried delivery whose
	/// message was already handled, so it resolves to `None`.
	pub async fn resolve_email_job(&self, job: &Job) -> Result<Option<ParsedEmail>> {
		match job {
			Job::ProcessEmail { email, .. } => Ok(Some(email.as_ref().clone())),
			Job::ProcessEmailRef { blob_key, message_id, .. } => {
				let Some(bytes) = self.blobs.get(blob_key).await? else {
					warn!(
						message_id = %message_id,
						blob_key = %blob_key,
						"Spilled email body is gone; treating redelivery as already handled."
					);

					return Ok(None);
				};
				let email: ParsedEmail = serde_json::from_slice(&bytes)?;

				self.blobs.delete(blob_key).await?;

				Ok(Some(email))
			},
			Job::ProcessChunk { .. } => Err(Error::InvalidRequest {
				message: "Chunk jobs carry no email payload.".to_string(),
			}),
		}
	}
}
