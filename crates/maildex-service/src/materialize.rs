//! The parallel email materializer.
//!
//! One call persists a group of parsed messages sharing `(tenant, source)`:
//! contact and company rows are deduplicated up front, each message is then
//! persisted concurrently (bounded), and the group shares a single batched
//! embedding call. Per-message errors land in the source failure counters,
//! never in the queue; everything here is idempotent on the external
//! message id.

use std::collections::HashMap;

use base64::Engine;
use futures::{StreamExt, stream};
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use tracing::{error, warn};
use uuid::Uuid;

use maildex_domain::{ParsedEmail, company};
use maildex_storage::{
	timefmt,
	vector::{VectorMetadata, VectorRecord},
};

use crate::{MaildexService, Result, embedding_input, progress};

const CONTACT_LOOKUP_CHUNK: usize = 50;
const CREATE_CONCURRENCY: usize = 10;
const PERSIST_CONCURRENCY: usize = 10;
const MAX_RECORDED_ERRORS: usize = 20;

#[derive(Clone, Debug, Default)]
pub struct MaterializeOutcome {
	pub processed: u64,
	pub failed: u64,
	pub errors: Vec<String>,
}
impl MaterializeOutcome {
	fn record_failure(&mut self, message_id: &str, err: impl std::fmt::Display) {
		self.failed += 1;

		if self.errors.len() < MAX_RECORDED_ERRORS {
			self.errors.push(format!("{message_id}: {err}"));
		}
	}
}

#[derive(Clone, Debug, Default)]
struct ContactSeed {
	name: Option<String>,
	earliest_sent: Option<String>,
}

enum PersistStatus {
	Inserted,
	Duplicate,
}

impl MaildexService {
	/// Materializes a group of messages and settles the source counters.
	pub async fn materialize_emails(
		&self,
		tenant_id: &str,
		source_id: &str,
		emails: Vec<ParsedEmail>,
		now: OffsetDateTime,
	) -> Result<MaterializeOutcome> {
		let mut outcome = MaterializeOutcome::default();

		if emails.is_empty() {
			return Ok(outcome);
		}

		let contacts = self.ensure_contacts(tenant_id, &emails, &mut outcome).await?;
		let persisted: Vec<(ParsedEmail, Result<PersistStatus>)> = stream::iter(
			emails.into_iter().map(|email| {
				let contacts = &contacts;

				async move {
					let result =
						self.persist_message(tenant_id, source_id, contacts, &email, now).await;

					(email, result)
				}
			}),
		)
		.buffer_unordered(PERSIST_CONCURRENCY)
		.collect()
		.await;
		let mut inserted: Vec<ParsedEmail> = Vec::new();

		for (email, result) in persisted {
			match result {
				Ok(PersistStatus::Inserted) => {
					outcome.processed += 1;

					inserted.push(email);
				},
				// A duplicate is a successful no-op.
				Ok(PersistStatus::Duplicate) => outcome.processed += 1,
				Err(err) => outcome.record_failure(&email.message_id, err),
			}
		}

		self.upsert_embeddings(tenant_id, &inserted).await;

		progress::increment_processed(
			&self.db,
			tenant_id,
			source_id,
			outcome.processed as i64,
			outcome.failed as i64,
		)
		.await?;
		progress::try_complete(&self.db, tenant_id, source_id, now).await?;

		Ok(outcome)
	}

	/// Resolves every referenced address to a contact id, creating missing
	/// contacts (and their companies) with bounded concurrency. Creation
	/// races lose to the per-tenant unique constraint and fall back to
	/// reading the winner's row.
	async fn ensure_contacts(
		&self,
		tenant_id: &str,
		emails: &[ParsedEmail],
		outcome: &mut MaterializeOutcome,
	) -> Result<HashMap<String, String>> {
		let mut seeds: HashMap<String, ContactSeed> = HashMap::new();

		for email in emails {
			let sent_text = timefmt::to_text(email.sent_at);

			seed_address(&mut seeds, &email.from_email, email.from_name.as_deref(), &sent_text);

			for address in email.to.iter().chain(&email.cc).chain(&email.bcc) {
				seed_address(&mut seeds, &address.email, address.name.as_deref(), &sent_text);
			}
		}

		let mut map = HashMap::with_capacity(seeds.len());
		let keys: Vec<String> = seeds.keys().cloned().collect();

		for chunk in keys.chunks(CONTACT_LOOKUP_CHUNK) {
			let mut builder =
				QueryBuilder::new("SELECT id, email FROM contacts WHERE tenant_id = ");

			builder.push_bind(tenant_id);
			builder.push(" AND email IN (");

			let mut separated = builder.separated(", ");

			for email in chunk {
				separated.push_bind(email);
			}

			builder.push(")");

			let rows: Vec<(String, String)> =
				builder.build_query_as().fetch_all(&self.db.pool).await?;

			for (id, email) in rows {
				map.insert(email, id);
			}
		}

		let missing: Vec<(String, ContactSeed)> = seeds
			.into_iter()
			.filter(|(email, _)| !map.contains_key(email))
			.collect();
		let created: Vec<(String, Result<String>)> = stream::iter(
			missing.into_iter().map(|(email, seed)| async move {
				let result = self.create_contact(tenant_id, &email, &seed).await;

				(email, result)
			}),
		)
		.buffer_unordered(CREATE_CONCURRENCY)
		.collect()
		.await;

		for (email, result) in created {
			match result {
				Ok(id) => {
					map.insert(email, id);
				},
				Err(err) => {
					warn!(email = %email, error = %err, "Contact creation failed.");

					if outcome.errors.len() < MAX_RECORDED_ERRORS {
						outcome.errors.push(format!("contact {email}: {err}"));
					}
				},
			}
		}

		Ok(map)
	}

	async fn create_contact(
		&self,
		tenant_id: &str,
		email: &str,
		seed: &ContactSeed,
	) -> Result<String> {
		let company_id = match company::domain_of(email) {
			Some(domain) if !company::is_free_mail_domain(&domain) =>
				Some(self.ensure_company(tenant_id, &domain).await?),
			_ => None,
		};

		sqlx::query(
			"\
INSERT INTO contacts (id, tenant_id, email, name, company_id, first_seen, last_seen, email_count)
VALUES ($1, $2, $3, $4, $5, $6, $6, 0)
ON CONFLICT (tenant_id, email) DO NOTHING",
		)
		.bind(Uuid::new_v4().to_string())
		.bind(tenant_id)
		.bind(email)
		.bind(seed.name.as_deref())
		.bind(company_id.as_deref())
		.bind(seed.earliest_sent.as_deref())
		.execute(&self.db.pool)
		.await?;

		if let Some(name) = seed.name.as_deref() {
			sqlx::query(
				"\
UPDATE contacts
SET name = COALESCE(name, $1)
WHERE tenant_id = $2 AND email = $3",
			)
			.bind(name)
			.bind(tenant_id)
			.bind(email)
			.execute(&self.db.pool)
			.await?;
		}

		let (id,): (String,) =
			sqlx::query_as("SELECT id FROM contacts WHERE tenant_id = $1 AND email = $2")
				.bind(tenant_id)
				.bind(email)
				.fetch_one(&self.db.pool)
				.await?;

		Ok(id)
	}

	async fn ensure_company(&self, tenant_id: &str, domain: &str) -> Result<String> {
		sqlx::query(
			"\
INSERT INTO companies (id, tenant_id, domain, name, total_emails)
VALUES ($1, $2, $3, $4, 0)
ON CONFLICT (tenant_id, domain) DO NOTHING",
		)
		.bind(Uuid::new_v4().to_string())
		.bind(tenant_id)
		.bind(domain)
		.bind(company::company_name(domain))
		.execute(&self.db.pool)
		.await?;

		let (id,): (String,) =
			sqlx::query_as("SELECT id FROM companies WHERE tenant_id = $1 AND domain = $2")
				.bind(tenant_id)
				.bind(domain)
				.fetch_one(&self.db.pool)
				.await?;

		Ok(id)
	}

	async fn persist_message(
		&self,
		tenant_id: &str,
		source_id: &str,
		contacts: &HashMap<String, String>,
		email: &ParsedEmail,
		now: OffsetDateTime,
	) -> Result<PersistStatus> {
		let Some(from_contact_id) = contacts.get(&email.from_email) else {
			return Err(crate::Error::Storage {
				message: format!("Sender contact {} was not resolved.", email.from_email),
			});
		};
		let thread_id = self.resolve_thread(tenant_id, email).await?;
		let row_id = Uuid::new_v4().to_string();
		let sent_text = timefmt::to_text(email.sent_at);
		let result = sqlx::query(
			"\
INSERT OR IGNORE INTO messages (
	id,
	tenant_id,
	source_id,
	message_id,
	thread_id,
	subject,
	body_text,
	body_html,
	sent_at,
	from_contact_id,
	has_attachments,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
		)
		.bind(&row_id)
		.bind(tenant_id)
		.bind(source_id)
		.bind(&email.message_id)
		.bind(thread_id.as_deref())
		.bind(&email.subject)
		.bind(&email.body_text)
		.bind(email.body_html.as_deref())
		.bind(&sent_text)
		.bind(from_contact_id)
		.bind(!email.attachments.is_empty())
		.bind(timefmt::to_text(now))
		.execute(&self.db.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Ok(PersistStatus::Duplicate);
		}

		self.insert_recipients(&row_id, contacts, email).await?;
		self.insert_attachments(tenant_id, &row_id, email, now).await?;
		self.bump_sender_stats(from_contact_id, &sent_text).await?;

		Ok(PersistStatus::Inserted)
	}

	/// Adopts the thread of the first known ancestor, checking `In-Reply-To`
	/// before the `References` chain. A parent without a thread roots one
	/// with its own id; descendants are never re-threaded.
	async fn resolve_thread(
		&self,
		tenant_id: &str,
		email: &ParsedEmail,
	) -> Result<Option<String>> {
		let candidates = email.in_reply_to.iter().chain(email.references.iter());

		for candidate in candidates {
			let row: Option<(String, Option<String>)> = sqlx::query_as(
				"SELECT id, thread_id FROM messages WHERE tenant_id = $1 AND message_id = $2",
			)
			.bind(tenant_id)
			.bind(candidate)
			.fetch_optional(&self.db.pool)
			.await?;

			if let Some((parent_id, parent_thread)) = row {
				return Ok(Some(parent_thread.unwrap_or(parent_id)));
			}
		}

		Ok(None)
	}

	async fn insert_recipients(
		&self,
		message_row_id: &str,
		contacts: &HashMap<String, String>,
		email: &ParsedEmail,
	) -> Result<()> {
		let groups =
			[("to", &email.to), ("cc", &email.cc), ("bcc", &email.bcc)];

		for (role, addresses) in groups {
			for address in addresses {
				let Some(contact_id) = contacts.get(&address.email) else {
					warn!(email = %address.email, "Recipient contact missing; skipping row.");

					continue;
				};

				sqlx::query(
					"\
INSERT OR IGNORE INTO recipients (message_id, contact_id, role)
VALUES ($1, $2, $3)",
				)
				.bind(message_row_id)
				.bind(contact_id)
				.bind(role)
				.execute(&self.db.pool)
				.await?;
			}
		}

		Ok(())
	}

	async fn insert_attachments(
		&self,
		tenant_id: &str,
		message_row_id: &str,
		email: &ParsedEmail,
		now: OffsetDateTime,
	) -> Result<()> {
		for attachment in &email.attachments {
			let attachment_id = Uuid::new_v4().to_string();
			let filename = sanitize_filename(&attachment.filename);
			let blob_key = format!("{tenant_id}/{message_row_id}/{attachment_id}/{filename}");

			if let Some(content) = attachment.content_base64.as_deref() {
				let bytes = base64::engine::general_purpose::STANDARD
					.decode(content)
					.map_err(|err| crate::Error::Storage {
						message: format!("Attachment payload is not valid base64: {err}."),
					})?;

				self.blobs.put(&blob_key, &bytes).await?;
			}

			sqlx::query(
				"\
INSERT INTO attachments (id, message_id, filename, content_type, size, blob_key, created_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)",
			)
			.bind(&attachment_id)
			.bind(message_row_id)
			.bind(&filename)
			.bind(&attachment.content_type)
			.bind(attachment.size as i64)
			.bind(&blob_key)
			.bind(timefmt::to_text(now))
			.execute(&self.db.pool)
			.await?;
		}

		Ok(())
	}

	async fn bump_sender_stats(&self, from_contact_id: &str, sent_text: &str) -> Result<()> {
		sqlx::query(
			"\
UPDATE contacts
SET
	email_count = email_count + 1,
	first_seen = min(COALESCE(first_seen, $1), $1),
	last_seen = max(COALESCE(last_seen, $1), $1)
WHERE id = $2",
		)
		.bind(sent_text)
		.bind(from_contact_id)
		.execute(&self.db.pool)
		.await?;

		sqlx::query(
			"\
UPDATE companies
SET
	total_emails = total_emails + 1,
	first_contact = min(COALESCE(first_contact, $1), $1),
	last_contact = max(COALESCE(last_contact, $1), $1)
WHERE id = (SELECT company_id FROM contacts WHERE id = $2)",
		)
		.bind(sent_text)
		.bind(from_contact_id)
		.execute(&self.db.pool)
		.await?;

		Ok(())
	}

	/// One batched embedding call per group; failures are logged and the
	/// messages stay searchable lexically.
	async fn upsert_embeddings(&self, tenant_id: &str, inserted: &[ParsedEmail]) {
		if inserted.is_empty() {
			return;
		}

		let texts: Vec<String> = inserted
			.iter()
			.map(|email| embedding_input(&email.subject, &email.body_text))
			.collect();
		let vectors =
			match self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await {
				Ok(vectors) => vectors,
				Err(err) => {
					error!(error = %err, "Embedding call failed; skipping vector upserts.");

					return;
				},
			};

		if vectors.len() != inserted.len() {
			error!(
				expected = inserted.len(),
				got = vectors.len(),
				"Embedding batch size mismatch; skipping vector upserts."
			);

			return;
		}

		let records: Vec<VectorRecord> = inserted
			.iter()
			.zip(vectors)
			.map(|(email, values)| VectorRecord {
				message_id: email.message_id.clone(),
				values,
				metadata: VectorMetadata {
					tenant_id: tenant_id.to_string(),
					message_id: email.message_id.clone(),
					subject: email.subject.clone(),
					sent_at: timefmt::to_text(email.sent_at),
					from_email: email.from_email.clone(),
				},
			})
			.collect();

		if let Err(err) = self.vectors.upsert(&records).await {
			error!(error = %err, "Vector upsert failed; continuing without embeddings.");
		}
	}
}

fn seed_address(
	seeds: &mut HashMap<String, ContactSeed>,
	email: &str,
	name: Option<&str>,
	sent_text: &str,
) {
	let email = email.trim().to_lowercase();

	if email.is_empty() {
		return;
	}

	let seed = seeds.entry(email).or_default();

	if seed.name.is_none()
		&& let Some(name) = name
	{
		seed.name = Some(name.to_string());
	}

	match &seed.earliest_sent {
		Some(existing) if existing.as_str() <= sent_text => {},
		_ => seed.earliest_sent = Some(sent_text.to_string()),
	}
}

fn sanitize_filename(filename: &str) -> String {
	let cleaned: String = filename
		.chars()
		.map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
		.collect();
	let trimmed = cleaned.trim_matches('.').trim();

	if trimmed.is_empty() { "attachment".to_string() } else { trimmed.to_string() }
}
