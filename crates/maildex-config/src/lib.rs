mod types;

use std::{fs, path::Path};

use color_eyre::eyre;

pub use types::{
	Blobs, Config, EmbeddingProviderConfig, Ingest, LlmProviderConfig, Providers, Qdrant, Search,
	Service, Sqlite, Storage,
};

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;
	let cfg: Config = toml::from_str(&raw)?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(eyre::eyre!("service.log_level must be non-empty."));
	}
	if cfg.storage.sqlite.path.trim().is_empty() {
		return Err(eyre::eyre!("storage.sqlite.path must be non-empty."));
	}
	if cfg.storage.sqlite.pool_max_conns == 0 {
		return Err(eyre::eyre!("storage.sqlite.pool_max_conns must be greater than zero."));
	}
	if cfg.storage.blobs.root.trim().is_empty() {
		return Err(eyre::eyre!("storage.blobs.root must be non-empty."));
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(eyre::eyre!("providers.embedding.dimensions must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(eyre::eyre!(
			"providers.embedding.dimensions must match storage.qdrant.vector_dim."
		));
	}
	if cfg.ingest.queue_batch_size == 0 {
		return Err(eyre::eyre!("ingest.queue_batch_size must be greater than zero."));
	}
	if cfg.ingest.max_attempts == 0 {
		return Err(eyre::eyre!("ingest.max_attempts must be greater than zero."));
	}
	if cfg.ingest.lease_seconds <= 0 {
		return Err(eyre::eyre!("ingest.lease_seconds must be greater than zero."));
	}
	if cfg.ingest.carryover_ttl_seconds <= 0 {
		return Err(eyre::eyre!("ingest.carryover_ttl_seconds must be greater than zero."));
	}
	if cfg.ingest.inline_payload_cap_bytes == 0 {
		return Err(eyre::eyre!("ingest.inline_payload_cap_bytes must be greater than zero."));
	}
	if cfg.ingest.body_max_chars == 0 {
		return Err(eyre::eyre!("ingest.body_max_chars must be greater than zero."));
	}
	if cfg.search.lexical_k == 0 {
		return Err(eyre::eyre!("search.lexical_k must be greater than zero."));
	}
	if cfg.search.dense_k == 0 {
		return Err(eyre::eyre!("search.dense_k must be greater than zero."));
	}
	if cfg.search.rrf_k == 0 {
		return Err(eyre::eyre!("search.rrf_k must be greater than zero."));
	}
	if cfg.search.rerank_batch == 0 {
		return Err(eyre::eyre!("search.rerank_batch must be greater than zero."));
	}

	for (label, key) in
		[("embedding", &cfg.providers.embedding.api_key), ("llm", &cfg.providers.llm.api_key)]
	{
		if key.trim().is_empty() {
			return Err(eyre::eyre!("Provider {label} api_key must be non-empty."));
		}
	}

	Ok(())
}
