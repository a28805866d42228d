//! Resilient client for the metadata search API.

use std::{sync::Arc, time::Duration};

use reqwest::Client;
use serde_json::{Map, Value};

use cmr_domain::ItemSet;

use crate::{Error, Result, circuit::CircuitBreaker};

const SECRET_KEYS: [&str; 4] = ["password", "token", "api_key", "client_secret"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
	Collections,
	Granules,
	Variables,
}
impl Endpoint {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Collections => "collections",
			Self::Granules => "granules",
			Self::Variables => "variables",
		}
	}

	fn path(self) -> &'static str {
		match self {
			Self::Collections => "/search/collections.umm_json",
			Self::Granules => "/search/granules.umm_json",
			Self::Variables => "/search/variables.umm_json",
		}
	}
}

/// Ordered query parameters. Keys may repeat, as in a `concept_id` batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams(Vec<(String, String)>);
impl SearchParams {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: &str, value: impl ToString) -> Self {
		self.set(key, value);

		self
	}

	/// Replaces every existing value for `key`.
	pub fn set(&mut self, key: &str, value: impl ToString) {
		self.remove(key);
		self.0.push((key.to_string(), value.to_string()));
	}

	/// Adds another value for `key`, keeping earlier ones.
	pub fn push(&mut self, key: &str, value: impl ToString) {
		self.0.push((key.to_string(), value.to_string()));
	}

	pub fn remove(&mut self, key: &str) {
		self.0.retain(|(existing, _)| existing != key);
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.iter().find(|(existing, _)| existing == key).map(|(_, value)| value.as_str())
	}

	pub fn pairs(&self) -> &[(String, String)] {
		&self.0
	}

	/// JSON view for logs with secret-like keys dropped. Repeated keys become arrays.
	pub fn redacted(&self) -> Map<String, Value> {
		let mut out = Map::new();

		for (key, value) in &self.0 {
			if SECRET_KEYS.contains(&key.to_lowercase().as_str()) {
				continue;
			}

			match out.get_mut(key) {
				Some(Value::Array(values)) => values.push(Value::String(value.clone())),
				Some(existing) => {
					let first = existing.take();

					*existing = Value::Array(vec![first, Value::String(value.clone())]);
				},
				None => {
					out.insert(key.clone(), Value::String(value.clone()));
				},
			}
		}

		out
	}
}

/// Backoff before retry number `attempt + 1`, given `attempt` failures so far.
pub fn backoff_delay(cfg: &cmr_config::Retry, attempt: u32) -> Duration {
	let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
	let delay_ms = (cfg.initial_backoff_ms as f64 * cfg.multiplier.powi(exponent))
		.min(cfg.max_backoff_ms as f64);

	Duration::from_millis(delay_ms as u64)
}

/// Retrying, breaker-guarded metadata search client. Cheap to clone; clones share the breaker.
#[derive(Debug, Clone)]
pub struct CmrClient {
	http: Client,
	base_url: String,
	circuit: Arc<CircuitBreaker>,
	retry: cmr_config::Retry,
}
impl CmrClient {
	pub fn new(cfg: &cmr_config::Config) -> Result<Self> {
		let http = Client::builder().timeout(Duration::from_millis(cfg.cmr.timeout_ms)).build()?;

		Ok(Self {
			http,
			base_url: cfg.cmr.base_url.clone(),
			circuit: Arc::new(CircuitBreaker::new(&cfg.circuit)),
			retry: cfg.retry.clone(),
		})
	}

	pub fn circuit(&self) -> &CircuitBreaker {
		&self.circuit
	}

	pub async fn search_collections(&self, params: &SearchParams) -> Result<ItemSet> {
		self.search(Endpoint::Collections, params).await
	}

	pub async fn search_granules(&self, params: &SearchParams) -> Result<ItemSet> {
		self.search(Endpoint::Granules, params).await
	}

	pub async fn search_variables(&self, params: &SearchParams) -> Result<ItemSet> {
		self.search(Endpoint::Variables, params).await
	}

	/// Runs one search with bounded retry. A rejected call while the circuit is open still
	/// consumes an attempt.
	pub async fn search(&self, endpoint: Endpoint, params: &SearchParams) -> Result<ItemSet> {
		let mut attempt = 0;

		loop {
			attempt += 1;

			match self.attempt(endpoint, params).await {
				Ok(items) => {
					tracing::debug!(
						endpoint = endpoint.as_str(),
						params = %serde_json::Value::Object(params.redacted()),
						items = items.len(),
						"Metadata search completed."
					);

					return Ok(items);
				},
				Err(err) => {
					tracing::warn!(
						endpoint = endpoint.as_str(),
						attempt,
						error = %err,
						"Metadata search attempt failed."
					);

					if attempt >= self.retry.max_attempts {
						return Err(Error::RetryExhausted { attempts: attempt, last: Box::new(err) });
					}

					tokio::time::sleep(backoff_delay(&self.retry, attempt)).await;
				},
			}
		}
	}

	async fn attempt(&self, endpoint: Endpoint, params: &SearchParams) -> Result<ItemSet> {
		if !self.circuit.allow() {
			return Err(Error::CircuitOpen);
		}

		match self.fetch(endpoint, params).await {
			Ok(body) => {
				self.circuit.record_success();

				Ok(ItemSet::from_response(&body))
			},
			Err(err) => {
				self.circuit.record_failure();

				Err(err)
			},
		}
	}

	async fn fetch(&self, endpoint: Endpoint, params: &SearchParams) -> Result<Value> {
		let url = format!("{}{}", self.base_url, endpoint.path());
		let res = self.http.get(url).query(params.pairs()).send().await?;
		let status = res.status();

		if !status.is_success() {
			return Err(Error::Status { endpoint: endpoint.as_str(), status: status.as_u16() });
		}

		let body: Value = res.json().await?;

		if !body.is_object() {
			return Err(Error::InvalidResponse {
				message: format!("Metadata search {} returned a non-object body.", endpoint.as_str()),
			});
		}

		Ok(body)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_grows_and_caps() {
		let cfg = cmr_config::Retry::default();

		assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(500));
		assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(1_000));
		assert_eq!(backoff_delay(&cfg, 3), Duration::from_millis(2_000));
		assert_eq!(backoff_delay(&cfg, 4), Duration::from_millis(3_000));
	}

	#[test]
	fn params_keep_repeated_keys_and_drop_secrets() {
		let mut params = SearchParams::new().with("keyword", "rain").with("password", "hunter2");

		params.push("concept_id", "C1");
		params.push("concept_id", "C2");
		params.set("keyword", "rainfall");

		assert_eq!(params.get("keyword"), Some("rainfall"));
		assert_eq!(
			Value::Object(params.redacted()),
			serde_json::json!({ "keyword": "rainfall", "concept_id": ["C1", "C2"] })
		);
	}

	#[test]
	fn circuit_open_is_seen_through_retry_exhaustion() {
		let err = Error::RetryExhausted { attempts: 3, last: Box::new(Error::CircuitOpen) };

		assert!(err.is_circuit_open());
		assert!(!Error::Status { endpoint: "collections", status: 500 }.is_circuit_open());
	}
}
