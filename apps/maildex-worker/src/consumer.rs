//! The queue consumer.
//!
//! A claimed batch is handled on two paths. Chunk jobs run strictly
//! one-by-one (the carryover key has a single owner) with ack-on-success and
//! retry-on-failure. Email jobs are grouped by source and handed to the
//! materializer; the whole group acks afterwards because per-message errors
//! are already accounted in the source counters. Queue retries are reserved
//! for transient infrastructure failures.

use std::{collections::HashMap, time::Duration};

use time::OffsetDateTime;
use tracing::{error, info, warn};

use maildex_service::{Job, MaildexService};
use maildex_storage::queue::{self, QueueJob};

const POLL_INTERVAL_MS: u64 = 500;

pub async fn run_consumer(service: MaildexService) -> color_eyre::Result<()> {
	info!("Maildex worker started.");

	loop {
		match process_batch_once(&service).await {
			Ok(handled) if handled > 0 => {},
			Ok(_) => tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await,
			Err(err) => {
				error!(error = %err, "Queue batch processing failed.");
				tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
			},
		}
	}
}

/// Claims and handles one batch. Returns the number of claimed jobs.
pub async fn process_batch_once(
	service: &MaildexService,
) -> maildex_service::Result<usize> {
	let now = OffsetDateTime::now_utc();
	let jobs = queue::claim_batch(
		&service.db,
		service.cfg.ingest.queue_batch_size,
		service.cfg.ingest.lease_seconds,
		now,
	)
	.await
	.map_err(maildex_service::Error::from)?;

	if jobs.is_empty() {
		return Ok(0);
	}

	let claimed = jobs.len();
	let mut chunk_jobs = Vec::new();
	let mut email_jobs = Vec::new();

	for job in jobs {
		match Job::decode(&job.payload) {
			Ok(decoded @ Job::ProcessChunk { .. }) => chunk_jobs.push((job, decoded)),
			Ok(decoded) => email_jobs.push((job, decoded)),
			Err(err) => {
				// An undecodable payload never gets better; let it burn its
				// retries and park as DEAD.
				warn!(job_id = %job.job_id, error = %err, "Dropping undecodable job payload.");
				nack(service, &job, &err.to_string()).await;
			},
		}
	}

	for (job, decoded) in chunk_jobs {
		handle_chunk_job(service, &job, &decoded).await;
	}

	let mut groups: HashMap<(String, String), Vec<(QueueJob, Job)>> = HashMap::new();

	for (job, decoded) in email_jobs {
		let key = (job.tenant_id.clone(), job.source_id.clone());

		groups.entry(key).or_default().push((job, decoded));
	}

	for ((tenant_id, source_id), group) in groups {
		handle_email_group(service, &tenant_id, &source_id, group).await;
	}

	Ok(claimed)
}

async fn handle_chunk_job(service: &MaildexService, job: &QueueJob, decoded: &Job) {
	let Job::ProcessChunk { source_id, tenant_id, index, total } = decoded else {
		return;
	};
	let now = OffsetDateTime::now_utc();

	match service.process_chunk(tenant_id, source_id, *index, *total, now).await {
		Ok(outcome) => {
			info!(
				source_id = %source_id,
				chunk = index,
				emitted = outcome.emitted,
				parse_failures = outcome.parse_failures,
				"Processed chunk."
			);
			ack(service, job).await;
		},
		Err(err) => {
			error!(source_id = %source_id, chunk = index, error = %err, "Chunk job failed.");
			nack(service, job, &err.to_string()).await;
		},
	}
}

async fn handle_email_group(
	service: &MaildexService,
	tenant_id: &str,
	source_id: &str,
	group: Vec<(QueueJob, Job)>,
) {
	let mut resolved_jobs = Vec::new();
	let mut emails = Vec::new();
	let mut unresolved = Vec::new();

	for (job, decoded) in group {
		match service.resolve_email_job(&decoded).await {
			Ok(Some(email)) => {
				emails.push(email);
				resolved_jobs.push(job);
			},
			// A redelivery whose spill is gone; nothing left to do.
			Ok(None) => resolved_jobs.push(job),
			Err(err) => {
				warn!(job_id = %job.job_id, error = %err, "Failed to resolve email payload.");
				unresolved.push((job, err.to_string()));
			},
		}
	}

	let now = OffsetDateTime::now_utc();

	match service.materialize_emails(tenant_id, source_id, emails, now).await {
		Ok(outcome) => {
			if outcome.failed > 0 {
				warn!(
					source_id = %source_id,
					processed = outcome.processed,
					failed = outcome.failed,
					"Materialized group with per-message failures."
				);
			} else {
				info!(
					source_id = %source_id,
					processed = outcome.processed,
					"Materialized group."
				);
			}

			for job in &resolved_jobs {
				ack(service, job).await;
			}
		},
		Err(err) => {
			// Infrastructure failure; the whole group retries.
			error!(source_id = %source_id, error = %err, "Materializer failed; retrying group.");

			for job in &resolved_jobs {
				nack(service, job, &err.to_string()).await;
			}
		},
	}

	for (job, message) in unresolved {
		nack(service, &job, &message).await;
	}
}

async fn ack(service: &MaildexService, job: &QueueJob) {
	let now = OffsetDateTime::now_utc();

	if let Err(err) = queue::ack(&service.db, &job.job_id, now).await {
		error!(job_id = %job.job_id, error = %err, "Failed to ack job.");
	}
}

async fn nack(service: &MaildexService, job: &QueueJob, message: &str) {
	let now = OffsetDateTime::now_utc();
	let max_attempts = service.cfg.ingest.max_attempts;

	if let Err(err) =
		queue::nack(&service.db, &job.job_id, job.attempts, max_attempts, message, now).await
	{
		error!(job_id = %job.job_id, error = %err, "Failed to nack job.");
	}
}
