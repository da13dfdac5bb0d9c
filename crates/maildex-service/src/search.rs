//! The five-stage retrieval pipeline: query expansion, parallel lexical and
//! dense retrieval, reciprocal rank fusion, LLM re-ranking, and
//! position-weighted blending.
//!
//! Scoring is deterministic for fixed model responses: every sort has a total
//! tie-break order and NaN scores sink.

use std::{cmp::Ordering, collections::HashMap, time::Instant};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::QueryBuilder;
use tracing::warn;

use maildex_providers::llm::first_integer;

use crate::{Error, MaildexService, Result};

const RRF_TOP_BONUS: f32 = 0.05;
const RRF_RUNNER_UP_BONUS: f32 = 0.02;
const RERANK_SNIPPET_CHARS: usize = 200;
const NEUTRAL_RERANK_SCORE: f32 = 0.5;
const VERIFY_CHUNK: usize = 100;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SearchRequest {
	pub tenant_id: String,
	pub query: String,
	#[serde(default)]
	pub filters: SearchFilters,
	pub limit: u32,
	pub offset: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SearchFilters {
	pub sender: Option<String>,
	pub company_id: Option<String>,
	pub date_from: Option<String>,
	pub date_to: Option<String>,
	pub has_attachments: Option<bool>,
	pub source_ids: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ScoreBreakdown {
	pub lex: f32,
	pub vec: f32,
	pub rerank: f32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SearchResultItem {
	pub message_id: String,
	pub subject: String,
	pub snippet: String,
	pub from_email: String,
	pub from_name: Option<String>,
	pub sent_at: String,
	pub score: f32,
	pub breakdown: ScoreBreakdown,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SearchResponse {
	pub results: Vec<SearchResultItem>,
	pub total: u64,
	pub expanded_queries: Vec<String>,
	pub took_ms: u64,
}

#[derive(Clone, Debug)]
struct LexicalHit {
	message_id: String,
	subject: String,
	snippet: String,
	from_email: String,
	from_name: Option<String>,
	sent_at: String,
	raw: f32,
}

#[derive(Clone, Debug)]
struct DenseHit {
	message_id: String,
	subject: String,
	preview: String,
	from_email: String,
	from_name: Option<String>,
	sent_at: String,
	raw: f32,
}

#[derive(Clone, Debug)]
struct Candidate {
	message_id: String,
	subject: String,
	snippet: String,
	from_email: String,
	from_name: Option<String>,
	sent_at: String,
	lex_rank: Option<usize>,
	lex_norm: f32,
	vec_rank: Option<usize>,
	vec_norm: f32,
	rrf: f32,
	rerank: f32,
	final_score: f32,
}

impl MaildexService {
	pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
		let started = Instant::now();
		let query = request.query.trim().to_string();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "Query must be non-empty.".to_string() });
		}

		let variants = self.expand_query(&query).await;
		let (lexical, dense) = futures::join!(
			self.lexical_retrieve(&request, &variants),
			self.dense_retrieve(&request.tenant_id, &variants),
		);
		let lexical = lexical?;
		let mut candidates = fuse(lexical, dense, self.cfg.search.rrf_k);
		let total = candidates.len() as u64;

		self.rerank_candidates(&query, &mut candidates).await;
		blend(&mut candidates);

		let results = candidates
			.into_iter()
			.skip(request.offset as usize)
			.take(request.limit as usize)
			.map(|candidate| SearchResultItem {
				message_id: candidate.message_id,
				subject: candidate.subject,
				snippet: candidate.snippet,
				from_email: candidate.from_email,
				from_name: candidate.from_name,
				sent_at: candidate.sent_at,
				score: candidate.final_score,
				breakdown: ScoreBreakdown {
					lex: candidate.lex_norm,
					vec: candidate.vec_norm,
					rerank: candidate.rerank,
				},
			})
			.collect();

		Ok(SearchResponse {
			results,
			total,
			expanded_queries: variants,
			took_ms: started.elapsed().as_millis() as u64,
		})
	}

	/// Asks the instruction model for one alternative phrasing. Any failure
	/// falls back to the original query alone.
	async fn expand_query(&self, query: &str) -> Vec<String> {
		let messages = expansion_messages(query);

		match self.providers.chat.complete(&self.cfg.providers.llm, &messages).await {
			Ok(raw) => {
				let alt: String = raw
					.lines()
					.next()
					.unwrap_or("")
					.trim()
					.chars()
					.take(self.cfg.search.expansion_max_chars)
					.collect();

				if alt.is_empty() || alt.eq_ignore_ascii_case(query) {
					vec![query.to_string()]
				} else {
					vec![query.to_string(), alt]
				}
			},
			Err(err) => {
				warn!(error = %err, "Query expansion failed; searching with the original only.");

				vec![query.to_string()]
			},
		}
	}

	/// BM25 retrieval over the full-text index. Terms of a variant are
	/// AND-joined, variants are OR-joined, and the backend's
	/// more-negative-is-better scores come back as absolute values.
	async fn lexical_retrieve(
		&self,
		request: &SearchRequest,
		variants: &[String],
	) -> Result<Vec<LexicalHit>> {
		let Some(match_expr) = build_match_expression(variants) else {
			return Ok(Vec::new());
		};
		let filters = &request.filters;
		let mut builder = QueryBuilder::new(
			"\
SELECT
	m.message_id,
	m.subject,
	snippet(messages_fts, 1, '<mark>', '</mark>', '…', 32) AS snip,
	c.email AS from_email,
	c.name AS from_name,
	m.sent_at,
	bm25(messages_fts) AS rank
FROM messages_fts
JOIN messages m ON m.rowid = messages_fts.rowid
JOIN contacts c ON c.id = m.from_contact_id
WHERE messages_fts MATCH ",
		);

		builder.push_bind(match_expr);
		builder.push(" AND m.tenant_id = ");
		builder.push_bind(&request.tenant_id);

		if let Some(sender) = &filters.sender {
			builder.push(" AND c.email = ");
			builder.push_bind(sender.to_lowercase());
		}
		if let Some(company_id) = &filters.company_id {
			builder.push(" AND c.company_id = ");
			builder.push_bind(company_id);
		}
		if let Some(date_from) = &filters.date_from {
			builder.push(" AND m.sent_at >= ");
			builder.push_bind(date_from);
		}
		if let Some(date_to) = &filters.date_to {
			builder.push(" AND m.sent_at <= ");
			builder.push_bind(date_to);
		}
		if let Some(has_attachments) = filters.has_attachments {
			builder.push(" AND m.has_attachments = ");
			builder.push_bind(has_attachments);
		}

		match filters.source_ids.as_deref() {
			Some(source_ids) if !source_ids.is_empty() => {
				builder.push(" AND m.source_id IN (");

				let mut separated = builder.separated(", ");

				for source_id in source_ids {
					separated.push_bind(source_id);
				}

				builder.push(")");
			},
			_ => {
				builder.push(
					"\
 AND (m.source_id IS NULL OR m.source_id IN (
	SELECT id FROM sources WHERE tenant_id = ",
				);
				builder.push_bind(&request.tenant_id);
				builder.push(" AND included_in_search = 1))");
			},
		}

		builder.push(" ORDER BY bm25(messages_fts) ASC LIMIT ");
		builder.push_bind(self.cfg.search.lexical_k as i64);

		type LexicalRow = (String, String, String, String, Option<String>, String, f64);

		let rows: Vec<LexicalRow> = builder.build_query_as().fetch_all(&self.db.pool).await?;

		Ok(rows
			.into_iter()
			.map(|(message_id, subject, snippet, from_email, from_name, sent_at, rank)| {
				LexicalHit {
					message_id,
					subject,
					snippet,
					from_email,
					from_name,
					sent_at,
					raw: rank.abs() as f32,
				}
			})
			.collect())
	}

	/// Dense retrieval: one embedding call for all variants, a top-K cosine
	/// query per variant, max-score dedup, then tenant verification against
	/// both the vector metadata and the relational store (stale metadata
	/// must not leak another tenant's messages). Failures degrade to an
	/// empty dense branch.
	async fn dense_retrieve(&self, tenant_id: &str, variants: &[String]) -> Vec<DenseHit> {
		let embeddings =
			match self.providers.embedding.embed(&self.cfg.providers.embedding, variants).await {
				Ok(embeddings) => embeddings,
				Err(err) => {
					warn!(error = %err, "Query embedding failed; skipping dense retrieval.");

					return Vec::new();
				},
			};
		let mut best: HashMap<String, f32> = HashMap::new();

		for embedding in &embeddings {
			let matches = match self.vectors.query(embedding, self.cfg.search.dense_k).await {
				Ok(matches) => matches,
				Err(err) => {
					warn!(error = %err, "Vector query failed; skipping this variant.");

					continue;
				},
			};

			for hit in matches {
				let metadata_tenant =
					hit.metadata.as_ref().map(|metadata| metadata.tenant_id.as_str());

				if metadata_tenant != Some(tenant_id) {
					continue;
				}

				let entry = best.entry(hit.message_id).or_insert(f32::MIN);

				*entry = entry.max(hit.score);
			}
		}

		if best.is_empty() {
			return Vec::new();
		}

		let ids: Vec<String> = best.keys().cloned().collect();
		let mut hits = match self.verify_dense_hits(tenant_id, &ids, &best).await {
			Ok(hits) => hits,
			Err(err) => {
				warn!(error = %err, "Dense verification failed; skipping dense retrieval.");

				return Vec::new();
			},
		};

		hits.sort_by(|a, b| {
			cmp_f32_desc(a.raw, b.raw).then_with(|| a.message_id.cmp(&b.message_id))
		});

		hits
	}

	async fn verify_dense_hits(
		&self,
		tenant_id: &str,
		ids: &[String],
		best: &HashMap<String, f32>,
	) -> Result<Vec<DenseHit>> {
		let mut hits = Vec::new();

		for chunk in ids.chunks(VERIFY_CHUNK) {
			let mut builder = QueryBuilder::new(
				"\
SELECT
	m.message_id,
	m.subject,
	substr(m.body_text, 1, 200) AS preview,
	c.email AS from_email,
	c.name AS from_name,
	m.sent_at
FROM messages m
JOIN contacts c ON c.id = m.from_contact_id
WHERE m.tenant_id = ",
			);

			builder.push_bind(tenant_id);
			builder.push(" AND m.message_id IN (");

			let mut separated = builder.separated(", ");

			for id in chunk {
				separated.push_bind(id);
			}

			builder.push(")");

			type DenseRow = (String, String, String, String, Option<String>, String);

			let rows: Vec<DenseRow> = builder.build_query_as().fetch_all(&self.db.pool).await?;

			for (message_id, subject, preview, from_email, from_name, sent_at) in rows {
				let Some(raw) = best.get(&message_id).copied() else {
					continue;
				};

				hits.push(DenseHit {
					message_id,
					subject,
					preview,
					from_email,
					from_name,
					sent_at,
					raw,
				});
			}
		}

		Ok(hits)
	}

	/// Scores the top candidates with the instruction model, ten invocations
	/// in flight at a time. Anything unparseable scores neutral.
	async fn rerank_candidates(&self, query: &str, candidates: &mut [Candidate]) {
		let depth = (self.cfg.search.rerank_depth as usize).min(candidates.len());

		if depth == 0 {
			return;
		}

		let scores: Vec<f32> = futures::stream::iter(candidates[..depth].iter().map(|candidate| {
			let messages = rerank_messages(query, &candidate.subject, &candidate.snippet);

			async move {
				match self.providers.chat.complete(&self.cfg.providers.llm, &messages).await {
					Ok(text) => parse_rerank_score(&text),
					Err(err) => {
						warn!(error = %err, "Rerank call failed; using the neutral score.");

						NEUTRAL_RERANK_SCORE
					},
				}
			}
		}))
		.buffered(self.cfg.search.rerank_batch)
		.collect()
		.await;

		for (candidate, score) in candidates.iter_mut().zip(scores) {
			candidate.rerank = score;
		}
	}
}

fn expansion_messages(query: &str) -> Vec<Value> {
	let system = "You rewrite search queries over a personal email archive. \
Reply with exactly one alternative phrasing of the query, on a single line, \
at most 200 characters, with no explanation.";

	vec![
		serde_json::json!({ "role": "system", "content": system }),
		serde_json::json!({ "role": "user", "content": query }),
	]
}

fn rerank_messages(query: &str, subject: &str, snippet: &str) -> Vec<Value> {
	let cleaned = snippet.replace("<mark>", "").replace("</mark>", "");
	let excerpt: String = cleaned.chars().take(RERANK_SNIPPET_CHARS).collect();
	let prompt = format!(
		"Rate how relevant this email is to the search query on a scale of 0-10. \
Reply with a single integer.\n\nQuery: {query}\nSubject: {subject}\nSnippet: {excerpt}"
	);

	vec![serde_json::json!({ "role": "user", "content": prompt })]
}

fn parse_rerank_score(text: &str) -> f32 {
	match first_integer(text) {
		Some(value) => (value.clamp(0, 10) as f32) / 10.0,
		None => NEUTRAL_RERANK_SCORE,
	}
}

/// AND-joined terms per variant, OR-joined across variants. Tokens of length
/// two or shorter are dropped; no stopword filtering beyond that.
fn build_match_expression(variants: &[String]) -> Option<String> {
	let mut groups = Vec::new();

	for variant in variants {
		let terms: Vec<String> = variant
			.split(|ch: char| !ch.is_alphanumeric())
			.filter(|token| token.len() > 2)
			.map(|token| format!("\"{token}\""))
			.collect();

		if terms.is_empty() {
			continue;
		}

		groups.push(format!("({})", terms.join(" AND ")));
	}

	if groups.is_empty() { None } else { Some(groups.join(" OR ")) }
}

/// Reciprocal rank fusion with per-branch min-max normalization, branch
/// tie-breaks (lexical before dense), and the post-hoc top-rank bonuses.
fn fuse(lexical: Vec<LexicalHit>, dense: Vec<DenseHit>, rrf_k: u32) -> Vec<Candidate> {
	let lex_norms = min_max(lexical.iter().map(|hit| hit.raw));
	let vec_norms = min_max(dense.iter().map(|hit| hit.raw));
	let mut by_id: HashMap<String, Candidate> = HashMap::new();

	for (rank, hit) in lexical.into_iter().enumerate() {
		by_id.insert(hit.message_id.clone(), Candidate {
			message_id: hit.message_id,
			subject: hit.subject,
			snippet: hit.snippet,
			from_email: hit.from_email,
			from_name: hit.from_name,
			sent_at: hit.sent_at,
			lex_rank: Some(rank),
			lex_norm: lex_norms[rank],
			vec_rank: None,
			vec_norm: 0.0,
			rrf: 0.0,
			rerank: NEUTRAL_RERANK_SCORE,
			final_score: 0.0,
		});
	}

	for (rank, hit) in dense.into_iter().enumerate() {
		match by_id.get_mut(&hit.message_id) {
			Some(existing) => {
				existing.vec_rank = Some(rank);
				existing.vec_norm = vec_norms[rank];
			},
			None => {
				by_id.insert(hit.message_id.clone(), Candidate {
					message_id: hit.message_id,
					subject: hit.subject,
					snippet: hit.preview,
					from_email: hit.from_email,
					from_name: hit.from_name,
					sent_at: hit.sent_at,
					lex_rank: None,
					lex_norm: 0.0,
					vec_rank: Some(rank),
					vec_norm: vec_norms[rank],
					rrf: 0.0,
					rerank: NEUTRAL_RERANK_SCORE,
					final_score: 0.0,
				});
			},
		}
	}

	let mut candidates: Vec<Candidate> = by_id.into_values().collect();

	for candidate in &mut candidates {
		candidate.rrf = rrf_contribution(rrf_k, candidate.lex_rank)
			+ rrf_contribution(rrf_k, candidate.vec_rank);
	}

	candidates.sort_by(|a, b| {
		cmp_f32_desc(a.rrf, b.rrf)
			.then_with(|| rank_asc(a.lex_rank, b.lex_rank))
			.then_with(|| rank_asc(a.vec_rank, b.vec_rank))
			.then_with(|| a.message_id.cmp(&b.message_id))
	});

	// Post-hoc bonuses on the fused score; ranks are already settled, so the
	// bonuses only shift what enters the blend.
	for (index, candidate) in candidates.iter_mut().enumerate() {
		match index {
			0 => candidate.rrf += RRF_TOP_BONUS,
			1 | 2 => candidate.rrf += RRF_RUNNER_UP_BONUS,
			_ => break,
		}
	}

	candidates
}

pub(crate) fn rrf_contribution(rrf_k: u32, rank: Option<usize>) -> f32 {
	match rank {
		Some(rank) => 1.0 / (rrf_k as f32 + rank as f32 + 1.0),
		None => 0.0,
	}
}

/// Position-dependent blending of fused and rerank scores.
fn blend(candidates: &mut [Candidate]) {
	for (index, candidate) in candidates.iter_mut().enumerate() {
		let (rrf_weight, rerank_weight) = blend_weights(index);

		candidate.final_score = rrf_weight * candidate.rrf + rerank_weight * candidate.rerank;
	}

	// The sort is stable: equal final scores keep their pre-blend order.
	candidates.sort_by(|a, b| cmp_f32_desc(a.final_score, b.final_score));
}

pub(crate) fn blend_weights(position: usize) -> (f32, f32) {
	if position < 3 {
		(0.75, 0.25)
	} else if position < 10 {
		(0.60, 0.40)
	} else {
		(0.40, 0.60)
	}
}

fn min_max(values: impl Iterator<Item = f32>) -> Vec<f32> {
	let raw: Vec<f32> = values.collect();

	if raw.is_empty() {
		return raw;
	}

	let min = raw.iter().copied().fold(f32::INFINITY, f32::min);
	let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);

	if (max - min).abs() <= f32::EPSILON {
		return vec![1.0; raw.len()];
	}

	raw.into_iter().map(|value| (value - min) / (max - min)).collect()
}

fn rank_asc(left: Option<usize>, right: Option<usize>) -> Ordering {
	left.unwrap_or(usize::MAX).cmp(&right.unwrap_or(usize::MAX))
}

fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}
