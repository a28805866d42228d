use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};

/// Sends a chat completion request and returns the reply text.
pub async fn complete(cfg: &cmr_config::LlmProviderConfig, messages: &[Value]) -> Result<String> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let res = client
		.post(&url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_completion(&json)
}

/// Parses the model's reply as JSON, tolerating a surrounding Markdown code fence.
pub fn parse_json_reply(text: &str) -> Result<Value> {
	Ok(serde_json::from_str(strip_code_fence(text))?)
}

pub fn strip_code_fence(text: &str) -> &str {
	let trimmed = text.trim();
	let Some(rest) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);

	rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_completion(json: &Value) -> Result<String> {
	let openai = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str());
	let anthropic = || {
		json.get("content")
			.and_then(|v| v.as_array())
			.and_then(|arr| arr.first())
			.and_then(|block| block.get("text"))
			.and_then(|t| t.as_str())
	};

	openai
		.or_else(anthropic)
		.map(str::to_string)
		.ok_or_else(|| Error::InvalidResponse {
			message: "Completion response is missing message content.".to_string(),
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_chat_choice_content() {
		let json = serde_json::json!({
			"choices": [{ "message": { "content": "{\"intent\": \"specific\"}" } }]
		});

		assert_eq!(parse_completion(&json).expect("parse failed"), "{\"intent\": \"specific\"}");
	}

	#[test]
	fn parses_content_blocks() {
		let json = serde_json::json!({ "content": [{ "type": "text", "text": "hello" }] });

		assert_eq!(parse_completion(&json).expect("parse failed"), "hello");
		assert!(parse_completion(&serde_json::json!({})).is_err());
	}

	#[test]
	fn strips_fences_before_parsing() {
		let parsed = parse_json_reply("```json\n[\"precipitation\", \"gpm\"]\n```")
			.expect("fenced JSON must parse");

		assert_eq!(parsed, serde_json::json!(["precipitation", "gpm"]));
		assert_eq!(strip_code_fence("  {\"a\": 1} "), "{\"a\": 1}");
	}
}
