//! Test harness: throwaway SQLite databases, an in-memory vector index, and
//! config fixtures wired to the deterministic local providers.

use std::{
	collections::HashMap,
	path::PathBuf,
	sync::Mutex,
};

use uuid::Uuid;

use maildex_config::Config;
use maildex_storage::{
	Result,
	db::Db,
	vector::{BoxFuture, VectorIndex, VectorMatch, VectorRecord, point_id},
};

pub struct TestDb {
	pub db: Db,
	path: PathBuf,
}
impl TestDb {
	pub async fn new() -> Result<Self> {
		let mut path = std::env::temp_dir();

		path.push(format!("maildex-test-{}.db", Uuid::new_v4().simple()));

		let db = Db::open(&path, 4).await?;

		db.ensure_schema().await?;

		Ok(Self { db, path })
	}
}
impl Drop for TestDb {
	fn drop(&mut self) {
		for suffix in ["", "-wal", "-shm"] {
			let mut target = self.path.clone().into_os_string();

			target.push(suffix);

			let _ = std::fs::remove_file(PathBuf::from(target));
		}
	}
}

/// A fresh directory under the system temp dir for blob-store tests.
pub fn temp_blob_root() -> PathBuf {
	let mut root = std::env::temp_dir();

	root.push(format!("maildex-blobs-{}", Uuid::new_v4().simple()));

	root
}

/// A config fixture pointing at the local (offline, deterministic) providers.
/// Vector dimension is kept small so in-memory cosine math stays cheap.
pub fn test_config(blob_root: &std::path::Path, vector_dim: u32) -> Config {
	let raw = format!(
		r#"[service]
log_level = "warn"

[storage.sqlite]
path = "unused-by-tests.db"
pool_max_conns = 4

[storage.qdrant]
url = "http://127.0.0.1:6334"
collection = "maildex_test"
vector_dim = {vector_dim}

[storage.blobs]
root = {blob_root:?}

[providers.embedding]
provider_id = "local"
api_base = "http://localhost"
api_key = "test"
path = "/v1/embeddings"
model = "local-token-hash"
dimensions = {vector_dim}
timeout_ms = 1000
default_headers = {{}}

[providers.llm]
provider_id = "local"
api_base = "http://localhost"
api_key = "test"
path = "/v1/chat/completions"
model = "local-null"
temperature = 0.0
timeout_ms = 1000
default_headers = {{}}
"#,
		vector_dim = vector_dim,
		blob_root = blob_root.display().to_string(),
	);

	toml::from_str(&raw).expect("Test config fixture must parse.")
}

/// In-memory stand-in for the dense store, cosine scored. Point keys follow
/// the production derivation, so tenant collisions behave identically.
#[derive(Default)]
pub struct MemoryVectorIndex {
	points: Mutex<HashMap<Uuid, VectorRecord>>,
}
impl MemoryVectorIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.points.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Plants a record verbatim, letting tests simulate stale or forged
	/// payload metadata.
	pub fn plant(&self, record: VectorRecord) {
		let key = point_id(&record.metadata.tenant_id, &record.message_id);

		self.points.lock().unwrap_or_else(|err| err.into_inner()).insert(key, record);
	}
}
impl VectorIndex for MemoryVectorIndex {
	fn upsert<'a>(&'a self, records: &'a [VectorRecord]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut points = self.points.lock().unwrap_or_else(|err| err.into_inner());

			for record in records {
				let key = point_id(&record.metadata.tenant_id, &record.message_id);

				points.insert(key, record.clone());
			}

			Ok(())
		})
	}

	fn query<'a>(
		&'a self,
		vector: &'a [f32],
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<VectorMatch>>> {
		Box::pin(async move {
			let points = self.points.lock().unwrap_or_else(|err| err.into_inner());
			let mut scored: Vec<VectorMatch> = points
				.values()
				.map(|record| VectorMatch {
					message_id: record.message_id.clone(),
					score: cosine(vector, &record.values),
					metadata: Some(record.metadata.clone()),
				})
				.collect();

			scored.sort_by(|a, b| {
				b.score
					.partial_cmp(&a.score)
					.unwrap_or(std::cmp::Ordering::Equal)
					.then_with(|| a.message_id.cmp(&b.message_id))
			});
			scored.truncate(top_k as usize);

			Ok(scored)
		})
	}

	fn delete<'a>(
		&'a self,
		tenant_id: &'a str,
		message_ids: &'a [String],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut points = self.points.lock().unwrap_or_else(|err| err.into_inner());

			for message_id in message_ids {
				points.remove(&point_id(tenant_id, message_id));
			}

			Ok(())
		})
	}
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
	let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
	let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

	if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}
