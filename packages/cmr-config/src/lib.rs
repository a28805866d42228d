mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, Circuit, Cmr, Config, LlmProviderConfig, Providers, Retry, SearchMode, Service, Similarity,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	parse(&raw).map_err(|err| match err {
		Error::ParseConfig { source, .. } =>
			Error::ParseConfig { path: path.to_path_buf(), source },
		other => other,
	})
}

/// Parses, normalizes, and validates a TOML document.
pub fn parse(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw)
		.map_err(|err| Error::ParseConfig { path: Default::default(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.cmr.base_url.trim().is_empty() {
		return Err(Error::Validation { message: "cmr.base_url must be non-empty.".to_string() });
	}

	for (label, value) in [
		("cmr.page_size", u64::from(cfg.cmr.page_size)),
		("cmr.granule_page_size", u64::from(cfg.cmr.granule_page_size)),
		("cmr.timeout_ms", cfg.cmr.timeout_ms),
		("circuit.failure_threshold", u64::from(cfg.circuit.failure_threshold)),
		("retry.max_attempts", u64::from(cfg.retry.max_attempts)),
		("cache.max_collections", cfg.cache.max_collections as u64),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	if cfg.retry.initial_backoff_ms > cfg.retry.max_backoff_ms {
		return Err(Error::Validation {
			message: "retry.initial_backoff_ms must not exceed retry.max_backoff_ms.".to_string(),
		});
	}
	if !cfg.retry.multiplier.is_finite() || cfg.retry.multiplier < 1.0 {
		return Err(Error::Validation {
			message: "retry.multiplier must be a finite number of at least 1.0.".to_string(),
		});
	}

	for provider in &cfg.providers.llm {
		for (label, value) in [
			("provider_id", &provider.provider_id),
			("api_base", &provider.api_base),
			("api_key", &provider.api_key),
			("model", &provider.model),
		] {
			if value.trim().is_empty() {
				return Err(Error::Validation {
					message: format!("providers.llm.{label} must be non-empty."),
				});
			}
		}

		if !provider.temperature.is_finite() {
			return Err(Error::Validation {
				message: format!(
					"providers.llm.temperature must be a finite number for {}.",
					provider.provider_id
				),
			});
		}
	}

	if let Some(similarity) = cfg.similarity.as_ref() {
		if similarity.api_base.trim().is_empty() {
			return Err(Error::Validation {
				message: "similarity.api_base must be non-empty.".to_string(),
			});
		}
		if similarity.top_k == 0 {
			return Err(Error::Validation {
				message: "similarity.top_k must be greater than zero.".to_string(),
			});
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	let provider = cfg.cmr.provider.trim().to_uppercase();

	cfg.cmr.provider = match provider.as_str() {
		"" | "CMR" | "CMR_ALL" => "ALL".to_string(),
		_ => provider,
	};
	cfg.cmr.base_url = cfg.cmr.base_url.trim().trim_end_matches('/').to_string();

	if let Some(similarity) = cfg.similarity.as_mut()
		&& similarity.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false)
	{
		similarity.api_key = None;
	}
}
