//! Dense vector index contract and the Qdrant-backed implementation.
//!
//! Entries are keyed by the external message id; Qdrant point ids are derived
//! deterministically from `(tenant, message_id)` so re-upserting the same
//! message is a no-op overwrite and tenants never collide.

use std::{collections::HashMap, future::Future, pin::Pin};

use qdrant_client::{
	Payload, Qdrant,
	qdrant::{
		CreateCollectionBuilder, DeletePointsBuilder, Distance, PointStruct, Query,
		QueryPointsBuilder, ScoredPoint, Value, VectorParamsBuilder, value::Kind,
	},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VectorMetadata {
	pub tenant_id: String,
	pub message_id: String,
	pub subject: String,
	pub sent_at: String,
	pub from_email: String,
}

#[derive(Clone, Debug)]
pub struct VectorRecord {
	pub message_id: String,
	pub values: Vec<f32>,
	pub metadata: VectorMetadata,
}

#[derive(Clone, Debug)]
pub struct VectorMatch {
	pub message_id: String,
	pub score: f32,
	pub metadata: Option<VectorMetadata>,
}

/// Contract of the dense store: upsert, top-K cosine query (higher is
/// better), delete-by-id. Implementations must be tenant-collision free.
pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn upsert<'a>(&'a self, records: &'a [VectorRecord]) -> BoxFuture<'a, Result<()>>;

	fn query<'a>(&'a self, vector: &'a [f32], top_k: u32)
	-> BoxFuture<'a, Result<Vec<VectorMatch>>>;

	fn delete<'a>(
		&'a self,
		tenant_id: &'a str,
		message_ids: &'a [String],
	) -> BoxFuture<'a, Result<()>>;
}

pub struct QdrantIndex {
	pub client: Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantIndex {
	pub fn new(cfg: &maildex_config::Qdrant) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(&self.collection).await? {
			return Ok(());
		}

		self.client
			.create_collection(
				CreateCollectionBuilder::new(&self.collection).vectors_config(
					VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine),
				),
			)
			.await?;

		Ok(())
	}
}

impl VectorIndex for QdrantIndex {
	fn upsert<'a>(&'a self, records: &'a [VectorRecord]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if records.is_empty() {
				return Ok(());
			}

			let points: Vec<PointStruct> = records
				.iter()
				.map(|record| {
					let id = point_id(&record.metadata.tenant_id, &record.message_id);
					let payload = metadata_payload(&record.metadata);

					PointStruct::new(id.to_string(), record.values.clone(), payload)
				})
				.collect();

			self.client
				.upsert_points(
					qdrant_client::qdrant::UpsertPointsBuilder::new(&self.collection, points)
						.wait(true),
				)
				.await?;

			Ok(())
		})
	}

	fn query<'a>(
		&'a self,
		vector: &'a [f32],
		top_k: u32,
	) -> BoxFuture<'a, Result<Vec<VectorMatch>>> {
		Box::pin(async move {
			let response = self
				.client
				.query(
					QueryPointsBuilder::new(&self.collection)
						.query(Query::new_nearest(vector.to_vec()))
						.limit(top_k as u64)
						.with_payload(true),
				)
				.await?;

			Ok(response.result.iter().filter_map(match_from_point).collect())
		})
	}

	fn delete<'a>(
		&'a self,
		tenant_id: &'a str,
		message_ids: &'a [String],
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if message_ids.is_empty() {
				return Ok(());
			}

			let ids: Vec<String> =
				message_ids.iter().map(|id| point_id(tenant_id, id).to_string()).collect();

			self.client
				.delete_points(
					DeletePointsBuilder::new(&self.collection).points(ids).wait(true),
				)
				.await?;

			Ok(())
		})
	}
}

pub fn point_id(tenant_id: &str, message_id: &str) -> Uuid {
	Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{tenant_id}:{message_id}").as_bytes())
}

fn metadata_payload(metadata: &VectorMetadata) -> Payload {
	let mut map = HashMap::new();

	map.insert("tenant_id".to_string(), Value::from(metadata.tenant_id.clone()));
	map.insert("message_id".to_string(), Value::from(metadata.message_id.clone()));
	map.insert("subject".to_string(), Value::from(metadata.subject.clone()));
	map.insert("sent_at".to_string(), Value::from(metadata.sent_at.clone()));
	map.insert("from_email".to_string(), Value::from(metadata.from_email.clone()));

	Payload::from(map)
}

fn match_from_point(point: &ScoredPoint) -> Option<VectorMatch> {
	let message_id = payload_string(&point.payload, "message_id")?;
	let metadata = Some(VectorMetadata {
		tenant_id: payload_string(&point.payload, "tenant_id").unwrap_or_default(),
		message_id: message_id.clone(),
		subject: payload_string(&point.payload, "subject").unwrap_or_default(),
		sent_at: payload_string(&point.payload, "sent_at").unwrap_or_default(),
		from_email: payload_string(&point.payload, "from_email").unwrap_or_default(),
	});

	Some(VectorMatch { message_id, score: point.score, metadata })
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::StringValue(text)) => Some(text.to_string()),
		_ => None,
	}
}
