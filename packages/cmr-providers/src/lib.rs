pub mod circuit;
pub mod cmr;
pub mod llm;
pub mod similarity;

mod error;

pub use circuit::{CircuitBreaker, CircuitState};
pub use cmr::{CmrClient, Endpoint, SearchParams};
pub use error::{Error, Result};
pub use similarity::SimilarDoc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use serde_json::{Map, Value};

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: format!("Default header {key} must be a string."),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}
