use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Embeds a batch of texts, preserving input order.
///
/// The `local` provider id computes deterministic token-hash vectors without
/// any network call; everything else goes to an OpenAI-compatible
/// `/embeddings` endpoint.
pub async fn embed(
	cfg: &maildex_config::EmbeddingProviderConfig,
	texts: &[String],
) -> Result<Vec<Vec<f32>>> {
	if cfg.provider_id == "local" {
		return Ok(texts.iter().map(|text| local_embedding(text, cfg.dimensions)).collect());
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": texts,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_embedding_response(json)
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let data = json.get("data").and_then(|v| v.as_array()).ok_or_else(|| {
		Error::InvalidResponse { message: "Embedding response is missing data array.".to_string() }
	})?;

	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").and_then(|v| v.as_array()).ok_or_else(|| {
			Error::InvalidResponse { message: "Embedding item missing embedding array.".to_string() }
		})?;
		let mut vec = Vec::with_capacity(embedding.len());

		for value in embedding {
			let number = value.as_f64().ok_or_else(|| Error::InvalidResponse {
				message: "Embedding value must be numeric.".to_string(),
			})?;

			vec.push(number as f32);
		}

		indexed.push((index, vec));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

/// Deterministic bag-of-token-hashes embedding: each token adds weight to a
/// blake3-chosen bucket, then the vector is L2-normalized. Overlapping texts
/// land near each other under cosine similarity, which is all the offline
/// provider needs.
pub fn local_embedding(text: &str, dimensions: u32) -> Vec<f32> {
	let mut vec = vec![0.0_f32; dimensions.max(1) as usize];

	for token in tokenize_ascii_alnum(text) {
		let hash = blake3::hash(token.as_bytes());
		let mut bytes = [0_u8; 8];

		bytes.copy_from_slice(&hash.as_bytes()[..8]);

		let bucket = (u64::from_le_bytes(bytes) % vec.len() as u64) as usize;

		vec[bucket] += 1.0;
	}

	let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();

	if norm > 0.0 {
		for value in &mut vec {
			*value /= norm;
		}
	}

	vec
}

fn tokenize_ascii_alnum(text: &str) -> Vec<String> {
	let mut normalized = String::with_capacity(text.len());

	for ch in text.chars() {
		if ch.is_ascii_alphanumeric() {
			normalized.push(ch.to_ascii_lowercase());
		} else {
			normalized.push(' ');
		}
	}

	normalized.split_whitespace().map(|token| token.to_string()).collect()
}
