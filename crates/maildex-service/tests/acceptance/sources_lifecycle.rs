use maildex_service::{CreateSourceRequest, SearchFilters, SearchRequest};

use super::{NOW, create_source, harness, sample_email};

#[tokio::test]
async fn unknown_source_kind_is_rejected() {
	let harness = harness().await;
	let err = harness
		.service
		.create_source(
			CreateSourceRequest {
				tenant_id: "t1".to_string(),
				name: "weird".to_string(),
				kind: "carrier-pigeon".to_string(),
				file_name: None,
				email_address: None,
			},
			NOW,
		)
		.await
		.expect_err("Unknown kinds must be rejected.");

	assert!(err.to_string().contains("Unknown source kind"));
}

#[tokio::test]
async fn tenant_mismatch_reads_as_not_found() {
	let harness = harness().await;
	let source = create_source(&harness.service, "t1").await;

	let cross = harness.service.get_source("t2", &source).await.expect("Query must succeed.");

	assert!(cross.is_none());

	let err = harness
		.service
		.delete_source("t2", &source)
		.await
		.expect_err("Cross-tenant delete must fail.");

	assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn excluded_sources_drop_out_of_lexical_search() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;

	service
		.materialize_emails(
			"t1",
			&source,
			vec![sample_email(
				"m1@acme.com",
				"migration plan",
				"the migration plan draft",
				"alice@acme.com",
				&[],
			)],
			NOW,
		)
		.await
		.expect("Ingest must succeed.");

	service
		.set_included_in_search("t1", &source, false)
		.await
		.expect("Exclusion toggle must succeed.");

	let response = service
		.search(SearchRequest {
			tenant_id: "t1".to_string(),
			query: "migration plan".to_string(),
			filters: SearchFilters::default(),
			limit: 10,
			offset: 0,
		})
		.await
		.expect("Search must succeed.");
	let lexical: Vec<_> =
		response.results.iter().filter(|item| item.breakdown.lex > 0.0).collect();

	assert!(lexical.is_empty(), "Excluded source must not serve lexical hits.");
}

#[tokio::test]
async fn delete_source_cascades_to_rows_blobs_and_vectors() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;

	service
		.store_chunk("t1", &source, 0, b"From a@b Mon\nFrom: a@b.com\n\nhi\n")
		.await
		.expect("Chunk upload must succeed.");
	service
		.materialize_emails(
			"t1",
			&source,
			vec![sample_email(
				"gone@acme.com",
				"to be deleted",
				"bye",
				"alice@acme.com",
				&["bob@acme.com"],
			)],
			NOW,
		)
		.await
		.expect("Ingest must succeed.");

	assert_eq!(harness.vectors.len(), 1);

	service.delete_source("t1", &source).await.expect("Delete must succeed.");

	let (messages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
		.fetch_one(&service.db.pool)
		.await
		.expect("count messages");
	let (recipients,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipients")
		.fetch_one(&service.db.pool)
		.await
		.expect("count recipients");

	assert_eq!(messages, 0);
	assert_eq!(recipients, 0);
	assert_eq!(harness.vectors.len(), 0);
	assert!(
		service
			.blobs
			.list(&format!("uploads/{source}/"))
			.await
			.expect("list blobs")
			.is_empty()
	);
	assert!(service.get_source("t1", &source).await.expect("get source").is_none());
}
