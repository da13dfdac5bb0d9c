use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Sends a chat completion and returns the first choice's content.
///
/// The `local` provider id returns an empty completion, which callers treat
/// as a failed model call and degrade to their neutral defaults.
pub async fn complete(cfg: &maildex_config::LlmProviderConfig, messages: &[Value]) -> Result<String> {
	if cfg.provider_id == "local" {
		return Ok(String::new());
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_completion(json)
}

fn parse_completion(json: Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(|content| content.to_string())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Completion response is missing message content.".to_string(),
		})
}

/// First integer appearing in a model response, for score-style prompts.
pub fn first_integer(text: &str) -> Option<i64> {
	let mut digits = String::new();

	for ch in text.chars() {
		if ch.is_ascii_digit() {
			digits.push(ch);
		} else if !digits.is_empty() {
			break;
		}
	}

	if digits.is_empty() { None } else { digits.parse().ok() }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_choice_content() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "a cheaper phrasing" } }
			]
		});

		assert_eq!(parse_completion(json).expect("parse failed"), "a cheaper phrasing");
	}

	#[test]
	fn missing_content_is_an_error() {
		assert!(parse_completion(serde_json::json!({ "choices": [] })).is_err());
	}

	#[test]
	fn extracts_first_integer() {
		assert_eq!(first_integer("I would rate this 8 out of 10."), Some(8));
		assert_eq!(first_integer("10/10"), Some(10));
		assert_eq!(first_integer("no score here"), None);
	}
}
