use std::time::Duration;

use reqwest::{Client, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

const SNIPPET_CHARS: usize = 200;

/// One nearest-neighbour match from the similarity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarDoc {
	pub doc_title: Option<String>,
	pub similarity: Option<f64>,
	pub snippet: String,
}

pub async fn search(cfg: &cmr_config::Similarity, query: &str) -> Result<Vec<SimilarDoc>> {
	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let headers = match cfg.api_key.as_deref() {
		Some(key) => crate::auth_headers(key, &cfg.default_headers)?,
		None => HeaderMap::new(),
	};
	let body = serde_json::json!({ "query": query, "k": cfg.top_k });
	let res = client.post(&url).headers(headers).json(&body).send().await?;
	let json: Value = res.error_for_status()?.json().await?;
	let mut docs = parse_matches(&json);

	docs.truncate(cfg.top_k as usize);

	Ok(docs)
}

/// Accepts a bare array or an object with `results`/`matches`. Entries carry their title and
/// score either at the top level or under `metadata`.
fn parse_matches(json: &Value) -> Vec<SimilarDoc> {
	let entries = json
		.as_array()
		.or_else(|| json.get("results").and_then(|v| v.as_array()))
		.or_else(|| json.get("matches").and_then(|v| v.as_array()));
	let Some(entries) = entries else {
		return Vec::new();
	};

	entries
		.iter()
		.filter(|entry| entry.is_object())
		.map(|entry| {
			let text = field(entry, "snippet")
				.or_else(|| field(entry, "text"))
				.or_else(|| field(entry, "page_content"))
				.and_then(|v| v.as_str())
				.unwrap_or_default();

			SimilarDoc {
				doc_title: field(entry, "title").and_then(|v| v.as_str()).map(str::to_string),
				similarity: field(entry, "score").and_then(|v| v.as_f64()),
				snippet: text.chars().take(SNIPPET_CHARS).collect(),
			}
		})
		.collect()
}

fn field<'a>(entry: &'a Value, key: &str) -> Option<&'a Value> {
	entry
		.get(key)
		.filter(|v| !v.is_null())
		.or_else(|| entry.get("metadata").and_then(|m| m.get(key)))
}
