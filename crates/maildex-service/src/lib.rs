pub mod ingest;
pub mod jobs;
pub mod materialize;
pub mod progress;
pub mod search;
pub mod sources;

mod error;

pub use self::{
	error::{Error, Result},
	ingest::ChunkOutcome,
	jobs::Job,
	materialize::MaterializeOutcome,
	search::{
		ScoreBreakdown, SearchFilters, SearchRequest, SearchResponse, SearchResultItem,
	},
	sources::CreateSourceRequest,
};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use maildex_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use maildex_providers::{embedding, llm};
use maildex_storage::{blob::BlobStore, db::Db, vector::VectorIndex};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait ChatProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub chat: Arc<dyn ChatProvider>,
}
impl Providers {
	pub fn new(embedding: Arc<dyn EmbeddingProvider>, chat: Arc<dyn ChatProvider>) -> Self {
		Self { embedding, chat }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), chat: provider }
	}
}

/// The per-tenant mail search engine: ingestion state machine on one side,
/// retrieval pipeline on the other, sharing the same stores.
pub struct MaildexService {
	pub cfg: Config,
	pub db: Db,
	pub blobs: BlobStore,
	pub vectors: Arc<dyn VectorIndex>,
	pub providers: Providers,
}
impl MaildexService {
	pub fn new(cfg: Config, db: Db, blobs: BlobStore, vectors: Arc<dyn VectorIndex>) -> Self {
		Self { cfg, db, blobs, vectors, providers: Providers::default() }
	}

	pub fn with_providers(
		cfg: Config,
		db: Db,
		blobs: BlobStore,
		vectors: Arc<dyn VectorIndex>,
		providers: Providers,
	) -> Self {
		Self { cfg, db, blobs, vectors, providers }
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move {
			embedding::embed(cfg, texts)
				.await
				.map_err(|err| Error::Provider { message: err.to_string() })
		})
	}
}

impl ChatProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move {
			llm::complete(cfg, messages)
				.await
				.map_err(|err| Error::Provider { message: err.to_string() })
		})
	}
}

/// Embedding input for a message: subject and the first kilobyte of body.
pub(crate) fn embedding_input(subject: &str, body_text: &str) -> String {
	let head: String = body_text.chars().take(1_000).collect();

	format!("{subject}\n\n{head}")
}

pub(crate) fn chunk_blob_key(source_id: &str, index: u32) -> String {
	format!("uploads/{source_id}/chunk-{index:06}")
}

pub(crate) fn carryover_key(source_id: &str) -> String {
	format!("carryover:{source_id}")
}
