use std::{
	env, fs,
	path::PathBuf,
	time::{SystemTime, UNIX_EPOCH},
};

fn sample_toml(vector_dim: u32, embedding_dims: u32) -> String {
	format!(
		r#"[service]
log_level = "info"

[storage.sqlite]
path = "data/maildex.db"
pool_max_conns = 4

[storage.qdrant]
url = "http://127.0.0.1:6334"
collection = "maildex_messages_v1"
vector_dim = {vector_dim}

[storage.blobs]
root = "data/blobs"

[providers.embedding]
provider_id = "embed"
api_base = "http://localhost"
api_key = "key"
path = "/v1/embeddings"
model = "model"
dimensions = {embedding_dims}
timeout_ms = 1000
default_headers = {{}}

[providers.llm]
provider_id = "llm"
api_base = "http://localhost"
api_key = "key"
path = "/v1/chat/completions"
model = "model"
temperature = 0.2
timeout_ms = 1000
default_headers = {{}}
"#,
		vector_dim = vector_dim,
		embedding_dims = embedding_dims
	)
}

fn write_temp_config(payload: String) -> PathBuf {
	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let mut path = env::temp_dir();
	path.push(format!("maildex_config_test_{nanos}.toml"));
	fs::write(&path, payload).expect("Failed to write test config.");
	path
}

#[test]
fn loads_config_with_defaulted_sections() {
	let path = write_temp_config(sample_toml(768, 768));

	let cfg = maildex_config::load(&path).expect("Config must load.");
	fs::remove_file(&path).expect("Failed to remove test config.");

	assert_eq!(cfg.ingest.queue_batch_size, 50);
	assert_eq!(cfg.ingest.max_attempts, 3);
	assert_eq!(cfg.ingest.inline_payload_cap_bytes, 200 * 1_024);
	assert_eq!(cfg.ingest.body_max_chars, 50_000);
	assert_eq!(cfg.search.rrf_k, 60);
	assert_eq!(cfg.search.rerank_depth, 30);
	assert_eq!(cfg.search.rerank_batch, 10);
}

#[test]
fn embedding_dimensions_must_match_vector_dim() {
	let path = write_temp_config(sample_toml(768, 1536));

	let result = maildex_config::load(&path);
	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected dimension mismatch validation error.");
	assert!(
		err.to_string()
			.contains("providers.embedding.dimensions must match storage.qdrant.vector_dim."),
		"Unexpected error: {err}"
	);
}

#[test]
fn zero_vector_dim_is_rejected() {
	let path = write_temp_config(sample_toml(0, 0));

	let result = maildex_config::load(&path);
	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected dimensions validation error.");
	assert!(
		err.to_string().contains("providers.embedding.dimensions must be greater than zero."),
		"Unexpected error: {err}"
	);
}
