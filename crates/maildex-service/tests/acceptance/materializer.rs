use maildex_domain::Address;

use super::{NOW, create_source, harness, sample_email};

#[tokio::test]
async fn contacts_and_companies_deduplicate_per_tenant() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;
	let mut first = sample_email(
		"m1@acme.com",
		"kickoff",
		"hello",
		"alice@acme.com",
		&["bob@acme.com", "carol@gmail.com"],
	);

	first.from_name = Some("Alice".to_string());

	let second = sample_email("m2@acme.com", "minutes", "notes", "alice@acme.com", &[
		"bob@acme.com",
	]);
	let outcome = service
		.materialize_emails("t1", &source, vec![first, second], NOW)
		.await
		.expect("Materializer must succeed.");

	assert_eq!(outcome.processed, 2);
	assert_eq!(outcome.failed, 0);

	let (contact_count,): (i64,) = sqlx::query_as(
		"SELECT COUNT(*) FROM contacts WHERE tenant_id = 't1' AND email = 'alice@acme.com'",
	)
	.fetch_one(&service.db.pool)
	.await
	.expect("count contacts");

	assert_eq!(contact_count, 1);

	// acme.com yields one company; gmail.com is excluded as free webmail.
	let companies: Vec<(String,)> =
		sqlx::query_as("SELECT domain FROM companies WHERE tenant_id = 't1' ORDER BY domain")
			.fetch_all(&service.db.pool)
			.await
			.expect("list companies");

	assert_eq!(companies, vec![("acme.com".to_string(),)]);

	let (name, email_count): (Option<String>, i64) = sqlx::query_as(
		"SELECT name, email_count FROM contacts WHERE tenant_id = 't1' AND email = 'alice@acme.com'",
	)
	.fetch_one(&service.db.pool)
	.await
	.expect("sender stats");

	assert_eq!(name.as_deref(), Some("Alice"));
	assert_eq!(email_count, 2);

	let (total_emails,): (i64,) = sqlx::query_as(
		"SELECT total_emails FROM companies WHERE tenant_id = 't1' AND domain = 'acme.com'",
	)
	.fetch_one(&service.db.pool)
	.await
	.expect("company stats");

	assert_eq!(total_emails, 2);
}

#[tokio::test]
async fn duplicate_message_is_a_successful_no_op() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;
	let email = sample_email("dup@example.com", "once", "body", "alice@acme.com", &[
		"bob@acme.com",
	]);

	let first = service
		.materialize_emails("t1", &source, vec![email.clone()], NOW)
		.await
		.expect("First ingest must succeed.");
	let second = service
		.materialize_emails("t1", &source, vec![email], NOW)
		.await
		.expect("Second ingest must succeed.");

	// Both deliveries count as processed per the accounting contract.
	assert_eq!(first.processed, 1);
	assert_eq!(second.processed, 1);
	assert_eq!(second.failed, 0);

	let (messages,): (i64,) =
		sqlx::query_as("SELECT COUNT(*) FROM messages WHERE tenant_id = 't1'")
			.fetch_one(&service.db.pool)
			.await
			.expect("count messages");

	assert_eq!(messages, 1);

	let (recipients,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipients")
		.fetch_one(&service.db.pool)
		.await
		.expect("count recipients");

	assert_eq!(recipients, 1);

	// One vector entry; the duplicate produced no second upsert.
	assert_eq!(harness.vectors.len(), 1);

	let (succeeded, failed): (i64, i64) =
		sqlx::query_as("SELECT succeeded, failed FROM sources WHERE id = $1")
			.bind(&source)
			.fetch_one(&service.db.pool)
			.await
			.expect("source counters");

	assert_eq!(succeeded, 2);
	assert_eq!(failed, 0);
}

#[tokio::test]
async fn thread_resolution_adopts_the_first_known_ancestor() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;
	let root = sample_email("1", "root", "first", "alice@acme.com", &[]);

	service
		.materialize_emails("t1", &source, vec![root], NOW)
		.await
		.expect("Root ingest must succeed.");

	let mut reply = sample_email("2", "re: root", "second", "bob@acme.com", &[]);

	reply.in_reply_to = Some("1".to_string());

	let mut nephew = sample_email("3", "re: re: root", "third", "carol@acme.com", &[]);

	nephew.references = vec!["0".to_string(), "1".to_string()];

	service
		.materialize_emails("t1", &source, vec![reply], NOW)
		.await
		.expect("Reply ingest must succeed.");
	service
		.materialize_emails("t1", &source, vec![nephew], NOW)
		.await
		.expect("Nephew ingest must succeed.");

	let (root_row_id, root_thread): (String, Option<String>) =
		sqlx::query_as("SELECT id, thread_id FROM messages WHERE message_id = '1'")
			.fetch_one(&service.db.pool)
			.await
			.expect("root row");

	// The root stays unthreaded; descendants adopt its id.
	assert!(root_thread.is_none());

	let (reply_thread,): (Option<String>,) =
		sqlx::query_as("SELECT thread_id FROM messages WHERE message_id = '2'")
			.fetch_one(&service.db.pool)
			.await
			.expect("reply row");
	let (nephew_thread,): (Option<String>,) =
		sqlx::query_as("SELECT thread_id FROM messages WHERE message_id = '3'")
			.fetch_one(&service.db.pool)
			.await
			.expect("nephew row");

	assert_eq!(reply_thread.as_deref(), Some(root_row_id.as_str()));
	assert_eq!(nephew_thread.as_deref(), Some(root_row_id.as_str()));
}

#[tokio::test]
async fn unresolved_sender_counts_as_failed_not_as_queue_error() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;
	// An empty from_email never resolves to a contact.
	let mut broken = sample_email("bad@example.com", "broken", "body", "", &[]);

	broken.from_email = String::new();

	let good = sample_email("good@example.com", "fine", "body", "alice@acme.com", &[]);
	let outcome = service
		.materialize_emails("t1", &source, vec![broken, good], NOW)
		.await
		.expect("Group must settle even with per-message failures.");

	assert_eq!(outcome.processed, 1);
	assert_eq!(outcome.failed, 1);
	assert_eq!(outcome.errors.len(), 1);

	let (succeeded, failed): (i64, i64) =
		sqlx::query_as("SELECT succeeded, failed FROM sources WHERE id = $1")
			.bind(&source)
			.fetch_one(&service.db.pool)
			.await
			.expect("source counters");

	assert_eq!(succeeded, 1);
	assert_eq!(failed, 1);
}

#[tokio::test]
async fn bcc_recipients_are_persisted_when_present() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;
	let mut email = sample_email("bcc@example.com", "secret", "body", "alice@acme.com", &[]);

	email.bcc = vec![Address { email: "hidden@acme.com".to_string(), name: None }];

	service
		.materialize_emails("t1", &source, vec![email], NOW)
		.await
		.expect("Ingest must succeed.");

	let (role,): (String,) = sqlx::query_as(
		"\
SELECT r.role
FROM recipients r
JOIN contacts c ON c.id = r.contact_id
WHERE c.email = 'hidden@acme.com'",
	)
	.fetch_one(&service.db.pool)
	.await
	.expect("bcc recipient row");

	assert_eq!(role, "bcc");
}
