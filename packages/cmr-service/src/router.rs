//! Language-model provider selection with failover.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use serde_json::Value;

use cmr_config::LlmProviderConfig;

use crate::{Error, LlmProvider, Result};

struct Slot {
	cfg: LlmProviderConfig,
	failed: AtomicBool,
}

/// Providers in priority order, each with a sticky failure flag.
pub struct ProviderRouter {
	slots: Vec<Slot>,
}
impl ProviderRouter {
	pub fn new(providers: &[LlmProviderConfig]) -> Self {
		Self {
			slots: providers
				.iter()
				.map(|cfg| Slot { cfg: cfg.clone(), failed: AtomicBool::new(false) })
				.collect(),
		}
	}

	/// The highest-priority provider that has not failed.
	pub fn current(&self) -> Result<&LlmProviderConfig> {
		self.slots
			.iter()
			.find(|slot| !slot.failed.load(Ordering::Acquire))
			.map(|slot| &slot.cfg)
			.ok_or(Error::ProviderUnavailable)
	}

	pub fn record_failure(&self, provider_id: &str) {
		if let Some(slot) = self.slots.iter().find(|slot| slot.cfg.provider_id == provider_id) {
			slot.failed.store(true, Ordering::Release);

			tracing::warn!(provider_id, "Language-model provider marked as failed.");
		}
	}

	/// The next live provider after `provider_id` in priority order.
	pub fn next(&self, provider_id: &str) -> Option<&LlmProviderConfig> {
		let position = self.slots.iter().position(|slot| slot.cfg.provider_id == provider_id)?;

		self.slots[position + 1..]
			.iter()
			.find(|slot| !slot.failed.load(Ordering::Acquire))
			.map(|slot| &slot.cfg)
	}
}

/// One agent's access to the language model. After a failed failover the handle stays
/// downgraded for its lifetime and callers use their deterministic path.
pub struct ModelHandle {
	agent: &'static str,
	router: ProviderRouter,
	llm: Arc<dyn LlmProvider>,
	downgraded: AtomicBool,
}
impl ModelHandle {
	pub fn new(agent: &'static str, providers: &[LlmProviderConfig], llm: Arc<dyn LlmProvider>) -> Self {
		Self { agent, router: ProviderRouter::new(providers), llm, downgraded: AtomicBool::new(false) }
	}

	pub fn is_available(&self) -> bool {
		!self.downgraded.load(Ordering::Acquire) && self.router.current().is_ok()
	}

	pub async fn ask(&self, messages: &[Value]) -> Result<String> {
		if self.downgraded.load(Ordering::Acquire) {
			return Err(Error::ProviderUnavailable);
		}

		let provider = match self.router.current() {
			Ok(provider) => provider,
			Err(err) => {
				self.downgrade();

				return Err(err);
			},
		};
		let err = match self.llm.complete(provider, messages).await {
			Ok(text) => return Ok(text),
			Err(err) => err,
		};

		tracing::warn!(
			agent = self.agent,
			provider_id = %provider.provider_id,
			error = %err,
			"Language-model call failed; trying the next provider."
		);

		self.router.record_failure(&provider.provider_id);

		let Some(fallback) = self.router.next(&provider.provider_id) else {
			self.downgrade();

			return Err(Error::ProviderUnavailable);
		};

		match self.llm.complete(fallback, messages).await {
			Ok(text) => Ok(text),
			Err(err) => {
				self.router.record_failure(&fallback.provider_id);
				self.downgrade();

				Err(Error::Provider { message: err.to_string() })
			},
		}
	}

	fn downgrade(&self) {
		if !self.downgraded.swap(true, Ordering::AcqRel) {
			tracing::warn!(agent = self.agent, "Language model unavailable; using deterministic fallback.");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;
	use crate::BoxFuture;

	fn provider(id: &str) -> LlmProviderConfig {
		LlmProviderConfig {
			provider_id: id.to_string(),
			api_base: "http://127.0.0.1:9".to_string(),
			api_key: "key".to_string(),
			path: "/v1/chat/completions".to_string(),
			model: "m".to_string(),
			temperature: 0.2,
			timeout_ms: 1_000,
			default_headers: Default::default(),
		}
	}

	struct Scripted {
		failing: Vec<&'static str>,
		calls: Mutex<Vec<String>>,
	}

	impl LlmProvider for Scripted {
		fn complete<'a>(
			&'a self,
			cfg: &'a LlmProviderConfig,
			_messages: &'a [Value],
		) -> BoxFuture<'a, cmr_providers::Result<String>> {
			self.calls.lock().unwrap_or_else(|err| err.into_inner()).push(cfg.provider_id.clone());

			let fails = self.failing.contains(&cfg.provider_id.as_str());

			Box::pin(async move {
				if fails {
					Err(cmr_providers::Error::InvalidResponse { message: "down".to_string() })
				} else {
					Ok(format!("from {}", cfg.provider_id))
				}
			})
		}
	}

	fn handle(failing: Vec<&'static str>) -> (ModelHandle, Arc<Scripted>) {
		let llm = Arc::new(Scripted { failing, calls: Mutex::new(Vec::new()) });
		let handle =
			ModelHandle::new("test", &[provider("primary"), provider("secondary")], llm.clone());

		(handle, llm)
	}

	#[test]
	fn router_skips_failed_providers() {
		let router = ProviderRouter::new(&[provider("a"), provider("b")]);

		assert_eq!(router.current().map(|p| p.provider_id.as_str()).ok(), Some("a"));

		router.record_failure("a");

		assert_eq!(router.current().map(|p| p.provider_id.as_str()).ok(), Some("b"));
		assert!(router.next("b").is_none());

		router.record_failure("b");

		assert!(matches!(router.current(), Err(Error::ProviderUnavailable)));
	}

	#[tokio::test]
	async fn fails_over_once_to_secondary() {
		let (handle, llm) = handle(vec!["primary"]);

		assert_eq!(handle.ask(&[]).await.expect("Expected failover."), "from secondary");
		assert_eq!(handle.ask(&[]).await.expect("Expected secondary."), "from secondary");
		assert_eq!(
			*llm.calls.lock().unwrap_or_else(|err| err.into_inner()),
			vec!["primary", "secondary", "secondary"]
		);
	}

	#[tokio::test]
	async fn downgrades_permanently_when_all_fail() {
		let (handle, llm) = handle(vec!["primary", "secondary"]);

		assert!(handle.ask(&[]).await.is_err());
		assert!(!handle.is_available());
		assert!(matches!(handle.ask(&[]).await, Err(Error::ProviderUnavailable)));
		assert_eq!(llm.calls.lock().unwrap_or_else(|err| err.into_inner()).len(), 2);
	}

	#[tokio::test]
	async fn empty_router_is_unavailable() {
		let llm = Arc::new(Scripted { failing: Vec::new(), calls: Mutex::new(Vec::new()) });
		let handle = ModelHandle::new("test", &[], llm);

		assert!(!handle.is_available());
		assert!(matches!(handle.ask(&[]).await, Err(Error::ProviderUnavailable)));
	}
}
