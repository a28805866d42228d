pub mod analysis;
pub mod events;
pub mod intent;
pub mod join;
pub mod pipeline;
pub mod planning;
pub mod recommend;
pub mod router;
pub mod search;
pub mod session;
pub mod synthesis;

mod error;

pub use analysis::AnalysisSummary;
pub use error::{Error, Result};
pub use events::{Event, EventKind, EventSink};
pub use pipeline::{CmrService, FinalResponse, QueryState, Step};
pub use planning::SearchPlan;
pub use search::{SearchInput, SearchOrchestrator, SearchOutcome, SearchResult};
pub use session::{InMemorySessions, SessionStore};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use cmr_config::{Config, LlmProviderConfig, Similarity};
use cmr_domain::ItemSet;
use cmr_providers::{CmrClient, Endpoint, SearchParams, SimilarDoc, llm, similarity};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait LlmProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, cmr_providers::Result<String>>;
}

pub trait MetadataSearch
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		endpoint: Endpoint,
		params: &'a SearchParams,
	) -> BoxFuture<'a, cmr_providers::Result<ItemSet>>;

	/// Whether the upstream circuit is rejecting calls right now.
	fn circuit_open(&self) -> bool;
}

/// Nearest-neighbour lookup over previously indexed documents. Failures surface as no matches.
pub trait SimilarityStore
where
	Self: Send + Sync,
{
	fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Vec<SimilarDoc>>;
}

#[derive(Clone)]
pub struct Providers {
	pub llm: Arc<dyn LlmProvider>,
	pub search: Arc<dyn MetadataSearch>,
	pub similarity: Arc<dyn SimilarityStore>,
}
impl Providers {
	pub fn new(
		llm: Arc<dyn LlmProvider>,
		search: Arc<dyn MetadataSearch>,
		similarity: Arc<dyn SimilarityStore>,
	) -> Self {
		Self { llm, search, similarity }
	}

	/// HTTP-backed providers built from configuration.
	pub fn from_config(cfg: &Config) -> Result<Self> {
		let client = CmrClient::new(cfg).map_err(|err| Error::Search {
			message: format!("Failed to build metadata search client: {err}"),
		})?;
		let similarity: Arc<dyn SimilarityStore> = match cfg.similarity.as_ref() {
			Some(similarity_cfg) => Arc::new(HttpSimilarity { cfg: similarity_cfg.clone() }),
			None => Arc::new(NoSimilarity),
		};

		Ok(Self { llm: Arc::new(DefaultProviders), search: Arc::new(client), similarity })
	}
}

struct DefaultProviders;

impl LlmProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, cmr_providers::Result<String>> {
		Box::pin(llm::complete(cfg, messages))
	}
}

impl MetadataSearch for CmrClient {
	fn search<'a>(
		&'a self,
		endpoint: Endpoint,
		params: &'a SearchParams,
	) -> BoxFuture<'a, cmr_providers::Result<ItemSet>> {
		Box::pin(CmrClient::search(self, endpoint, params))
	}

	fn circuit_open(&self) -> bool {
		!self.circuit().allow()
	}
}

struct HttpSimilarity {
	cfg: Similarity,
}

impl SimilarityStore for HttpSimilarity {
	fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Vec<SimilarDoc>> {
		Box::pin(async move {
			match similarity::search(&self.cfg, query).await {
				Ok(docs) => docs,
				Err(err) => {
					tracing::warn!(error = %err, "Similarity lookup failed; continuing without context.");

					Vec::new()
				},
			}
		})
	}
}

/// Similarity store used when none is configured.
pub struct NoSimilarity;

impl SimilarityStore for NoSimilarity {
	fn search<'a>(&'a self, _query: &'a str) -> BoxFuture<'a, Vec<SimilarDoc>> {
		Box::pin(async { Vec::new() })
	}
}
