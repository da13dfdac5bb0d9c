use std::sync::Arc;

use maildex_service::{SearchFilters, SearchRequest};
use maildex_storage::vector::{VectorMetadata, VectorRecord};

use super::{NOW, StubChat, VECTOR_DIM, create_source, harness, harness_with_chat, sample_email};

fn request(tenant_id: &str, query: &str) -> SearchRequest {
	SearchRequest {
		tenant_id: tenant_id.to_string(),
		query: query.to_string(),
		filters: SearchFilters::default(),
		limit: 10,
		offset: 0,
	}
}

#[tokio::test]
async fn empty_query_is_rejected_before_the_pipeline() {
	let harness = harness().await;

	let err = harness.service.search(request("t1", "   ")).await.expect_err("Must reject.");

	assert!(err.to_string().contains("non-empty"));
}

#[tokio::test]
async fn no_match_returns_an_empty_result_not_an_error() {
	let harness = harness().await;
	let response = harness
		.service
		.search(request("t1", "completely unmatched terms"))
		.await
		.expect("Empty result is valid.");

	assert!(response.results.is_empty());
	assert_eq!(response.total, 0);
	assert_eq!(response.expanded_queries, vec!["completely unmatched terms"]);
}

#[tokio::test]
async fn lexical_match_carries_snippet_highlights() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;

	service
		.materialize_emails(
			"t1",
			&source,
			vec![
				sample_email(
					"m1@acme.com",
					"Quarterly pricing report",
					"The quarterly pricing numbers are attached.",
					"alice@acme.com",
					&["bob@acme.com"],
				),
				sample_email(
					"m2@acme.com",
					"Lunch plans",
					"Thai or sushi tomorrow?",
					"bob@acme.com",
					&["alice@acme.com"],
				),
			],
			NOW,
		)
		.await
		.expect("Ingest must succeed.");

	let response =
		service.search(request("t1", "pricing report")).await.expect("Search must succeed.");

	// The dense branch may surface weak neighbors; the lexical hit leads.
	assert!(response.total >= 1);
	assert_eq!(response.results[0].message_id, "m1@acme.com");
	assert!(response.results[0].snippet.contains("<mark>"));
	assert!(response.results[0].breakdown.lex > 0.0);
	assert_eq!(response.results[0].from_email, "alice@acme.com");
}

#[tokio::test]
async fn dense_only_match_scores_per_the_blending_rule() {
	// Query "pricing" against a body that only says "cost": no lexical hit,
	// one dense hit at rank 0; the stubbed model rates it 8/10.
	let chat = Arc::new(StubChat::scripted(&["", "8"]));
	let harness = harness_with_chat(chat).await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;

	service
		.materialize_emails(
			"t1",
			&source,
			vec![sample_email(
				"cost@acme.com",
				"(No Subject)",
				"what does it cost",
				"alice@acme.com",
				&[],
			)],
			NOW,
		)
		.await
		.expect("Ingest must succeed.");

	let response = service.search(request("t1", "pricing")).await.expect("Search must succeed.");

	assert_eq!(response.total, 1);

	let item = &response.results[0];

	assert_eq!(item.message_id, "cost@acme.com");
	assert_eq!(item.breakdown.lex, 0.0);
	assert_eq!(item.breakdown.vec, 1.0);
	assert!((item.breakdown.rerank - 0.8).abs() < 1e-6);

	// final = 0.75 * (1/61 + top bonus) + 0.25 * 0.8
	let expected = 0.75 * (1.0 / 61.0 + 0.05) + 0.25 * 0.8;

	assert!((item.score - expected).abs() < 1e-5, "score {} != {expected}", item.score);
}

#[tokio::test]
async fn expansion_variant_widens_lexical_recall() {
	// The model proposes "cost" as the alternative phrasing for "pricing".
	let chat = Arc::new(StubChat::scripted(&["cost", "7"]));
	let harness = harness_with_chat(chat).await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;

	service
		.materialize_emails(
			"t1",
			&source,
			vec![sample_email(
				"cost@acme.com",
				"Total cost summary",
				"cost breakdown enclosed",
				"alice@acme.com",
				&[],
			)],
			NOW,
		)
		.await
		.expect("Ingest must succeed.");

	let response = service.search(request("t1", "pricing")).await.expect("Search must succeed.");

	assert_eq!(response.expanded_queries, vec!["pricing", "cost"]);
	assert_eq!(response.total, 1);
	assert!(response.results[0].breakdown.lex > 0.0);
}

#[tokio::test]
async fn tenant_isolation_holds_even_with_forged_vector_metadata() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;

	service
		.materialize_emails(
			"t1",
			&source,
			vec![sample_email(
				"secret@acme.com",
				"t1 secret roadmap",
				"the secret roadmap",
				"alice@acme.com",
				&[],
			)],
			NOW,
		)
		.await
		.expect("Ingest must succeed.");

	// Forge a vector entry claiming t2 ownership of t1's message. The
	// relational verification must refuse it.
	harness.vectors.plant(VectorRecord {
		message_id: "secret@acme.com".to_string(),
		values: maildex_providers::embedding::local_embedding("secret roadmap", VECTOR_DIM),
		metadata: VectorMetadata {
			tenant_id: "t2".to_string(),
			message_id: "secret@acme.com".to_string(),
			subject: "t1 secret roadmap".to_string(),
			sent_at: "2026-02-01T12:00:00Z".to_string(),
			from_email: "alice@acme.com".to_string(),
		},
	});

	let response =
		service.search(request("t2", "secret roadmap")).await.expect("Search must succeed.");

	assert!(response.results.is_empty(), "t2 must never see t1's message");

	let own = service.search(request("t1", "secret roadmap")).await.expect("Search must succeed.");

	assert_eq!(own.total, 1);
}

#[tokio::test]
async fn results_are_deterministic_with_fixed_model_responses() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;
	let emails: Vec<_> = (0..8)
		.map(|i| {
			sample_email(
				&format!("m{i}@acme.com"),
				&format!("status update {i}"),
				"weekly status update for the project",
				"alice@acme.com",
				&[],
			)
		})
		.collect();

	service.materialize_emails("t1", &source, emails, NOW).await.expect("Ingest must succeed.");

	let first = service.search(request("t1", "status update")).await.expect("first search");
	let second = service.search(request("t1", "status update")).await.expect("second search");
	let ids = |response: &maildex_service::SearchResponse| {
		response.results.iter().map(|item| item.message_id.clone()).collect::<Vec<_>>()
	};

	assert_eq!(ids(&first), ids(&second));
	assert_eq!(first.total, 8);
}

#[tokio::test]
async fn offset_and_limit_window_the_ranked_list() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;
	let emails: Vec<_> = (0..5)
		.map(|i| {
			sample_email(
				&format!("w{i}@acme.com"),
				"weekly digest",
				"the weekly digest body",
				"alice@acme.com",
				&[],
			)
		})
		.collect();

	service.materialize_emails("t1", &source, emails, NOW).await.expect("Ingest must succeed.");

	let full = service.search(request("t1", "weekly digest")).await.expect("full search");
	let mut windowed = request("t1", "weekly digest");

	windowed.offset = 2;
	windowed.limit = 2;

	let page = service.search(windowed).await.expect("windowed search");

	assert_eq!(page.total, 5);
	assert_eq!(page.results.len(), 2);
	assert_eq!(page.results[0].message_id, full.results[2].message_id);
	assert_eq!(page.results[1].message_id, full.results[3].message_id);
}

#[tokio::test]
async fn sender_filter_restricts_the_lexical_branch() {
	let harness = harness().await;
	let service = &harness.service;
	let source = create_source(service, "t1").await;

	service
		.materialize_emails(
			"t1",
			&source,
			vec![
				sample_email(
					"a@acme.com",
					"invoice january",
					"invoice attached",
					"alice@acme.com",
					&[],
				),
				sample_email(
					"b@acme.com",
					"invoice february",
					"invoice attached",
					"bob@acme.com",
					&[],
				),
			],
			NOW,
		)
		.await
		.expect("Ingest must succeed.");

	let mut filtered = request("t1", "invoice attached");

	filtered.filters.sender = Some("Alice@acme.com".to_string());

	let response = service.search(filtered).await.expect("Search must succeed.");
	let lexical: Vec<_> =
		response.results.iter().filter(|item| item.breakdown.lex > 0.0).collect();

	assert_eq!(lexical.len(), 1);
	assert_eq!(lexical[0].message_id, "a@acme.com");
}
