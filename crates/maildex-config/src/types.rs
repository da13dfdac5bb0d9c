use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub ingest: Ingest,
	#[serde(default)]
	pub search: Search,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub sqlite: Sqlite,
	pub qdrant: Qdrant,
	pub blobs: Blobs,
}

#[derive(Debug, Deserialize)]
pub struct Sqlite {
	pub path: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Blobs {
	pub root: String,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub llm: LlmProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Ingest {
	pub queue_batch_size: u32,
	pub max_attempts: u32,
	pub lease_seconds: i64,
	pub carryover_ttl_seconds: i64,
	pub inline_payload_cap_bytes: usize,
	pub body_max_chars: usize,
}
impl Default for Ingest {
	fn default() -> Self {
		Self {
			queue_batch_size: 50,
			max_attempts: 3,
			lease_seconds: 30,
			carryover_ttl_seconds: 3_600,
			inline_payload_cap_bytes: 200 * 1_024,
			body_max_chars: 50_000,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Search {
	pub lexical_k: u32,
	pub dense_k: u32,
	pub rrf_k: u32,
	pub rerank_depth: u32,
	pub rerank_batch: usize,
	pub expansion_max_chars: usize,
}
impl Default for Search {
	fn default() -> Self {
		Self {
			lexical_k: 50,
			dense_k: 100,
			rrf_k: 60,
			rerank_depth: 30,
			rerank_batch: 10,
			expansion_max_chars: 200,
		}
	}
}
