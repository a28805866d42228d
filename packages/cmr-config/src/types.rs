use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
	pub service: Service,
	pub cmr: Cmr,
	pub circuit: Circuit,
	pub retry: Retry,
	pub cache: Cache,
	pub providers: Providers,
	pub similarity: Option<Similarity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}
impl Default for Service {
	fn default() -> Self {
		Self { http_bind: "127.0.0.1:8080".to_string(), log_level: "info".to_string() }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cmr {
	pub base_url: String,
	/// Provider filter applied to every search. `ALL` disables filtering.
	pub provider: String,
	pub timeout_ms: u64,
	pub page_size: u32,
	pub granule_page_size: u32,
	pub search_mode: SearchMode,
}
impl Cmr {
	/// The provider filter to send upstream, if any.
	pub fn provider_filter(&self) -> Option<&str> {
		match self.provider.as_str() {
			"" | "ALL" => None,
			provider => Some(provider),
		}
	}
}
impl Default for Cmr {
	fn default() -> Self {
		Self {
			base_url: "https://cmr.earthdata.nasa.gov".to_string(),
			provider: "ALL".to_string(),
			timeout_ms: 30_000,
			page_size: 25,
			granule_page_size: 50,
			search_mode: SearchMode::Staged,
		}
	}
}

/// How the search stage executes a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
	/// Follow the planner's stages: variables, then related collections, then granules.
	#[default]
	Staged,
	/// One keyword search per subquery.
	Plain,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Circuit {
	pub failure_threshold: u32,
	pub recovery_time_seconds: u64,
}
impl Default for Circuit {
	fn default() -> Self {
		Self { failure_threshold: 5, recovery_time_seconds: 30 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retry {
	pub max_attempts: u32,
	pub initial_backoff_ms: u64,
	pub max_backoff_ms: u64,
	pub multiplier: f64,
}
impl Default for Retry {
	fn default() -> Self {
		Self { max_attempts: 3, initial_backoff_ms: 500, max_backoff_ms: 3_000, multiplier: 2.0 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub max_collections: usize,
}
impl Default for Cache {
	fn default() -> Self {
		Self { max_collections: 4_096 }
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Providers {
	/// Language-model providers in priority order.
	pub llm: Vec<LlmProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	#[serde(default = "default_llm_path")]
	pub path: String,
	pub model: String,
	#[serde(default = "default_temperature")]
	pub temperature: f32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Similarity {
	pub api_base: String,
	#[serde(default = "default_similarity_path")]
	pub path: String,
	pub api_key: Option<String>,
	#[serde(default = "default_top_k")]
	pub top_k: u32,
	#[serde(default = "default_similarity_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

fn default_llm_path() -> String {
	"/v1/chat/completions".to_string()
}

fn default_temperature() -> f32 {
	0.2
}

fn default_timeout_ms() -> u64 {
	30_000
}

fn default_similarity_path() -> String {
	"/search".to_string()
}

fn default_top_k() -> u32 {
	5
}

fn default_similarity_timeout_ms() -> u64 {
	5_000
}
