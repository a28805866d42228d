//! Federated metadata search: plain per-subquery searches and staged plan execution.

use std::{
	num::NonZeroUsize,
	sync::{
		Arc, Mutex, MutexGuard, PoisonError,
		atomic::{AtomicBool, Ordering},
	},
};

use lru::LruCache;
use serde::Serialize;
use serde_json::{Map, Value};

use cmr_domain::{Item, ItemSet, infer_bbox, infer_temporal, merge_unique};
use cmr_providers::{Endpoint, SearchParams};

use crate::{
	MetadataSearch,
	events::{self, Event, EventSink},
	join::settle,
	planning::{SearchPlan, Stage},
};

const BATCH_LOOKUP_LIMIT: usize = 50;
const EXTRA_TERM_LIMIT: usize = 3;
const GRANULE_COLLECTION_LIMIT: usize = 3;

/// One successful upstream call, as reported in the final response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLogEntry {
	pub endpoint: String,
	pub params: Map<String, Value>,
	pub page_size: Option<u32>,
	pub total_hits: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
	pub query: String,
	pub collections: ItemSet,
	pub granules: ItemSet,
	pub variables: ItemSet,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub related_collection_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchOutcome {
	pub searches: Vec<SearchResult>,
	pub query_log: Vec<QueryLogEntry>,
	pub circuit_breaker_tripped: bool,
}

pub enum SearchInput<'a> {
	Plan(&'a SearchPlan),
	Subqueries(&'a [String]),
}

/// Per-run bookkeeping shared by every concurrent branch of one `run`.
struct RunContext<'a> {
	log: Mutex<Vec<QueryLogEntry>>,
	tripped: AtomicBool,
	events: Option<&'a EventSink>,
}
impl RunContext<'_> {
	/// Turns a call outcome into an item set, logging successes and flagging breaker trips.
	fn capture(
		&self,
		endpoint: Endpoint,
		params: &SearchParams,
		outcome: cmr_providers::Result<ItemSet>,
	) -> ItemSet {
		match outcome {
			Ok(items) => {
				self.log.lock().unwrap_or_else(PoisonError::into_inner).push(QueryLogEntry {
					endpoint: endpoint.as_str().to_string(),
					params: params.redacted(),
					page_size: params.get("page_size").and_then(|size| size.parse().ok()),
					total_hits: items.len(),
				});

				items
			},
			Err(err) => {
				if err.is_circuit_open() {
					self.tripped.store(true, Ordering::Release);
				}

				ItemSet::failed(err.to_string())
			},
		}
	}
}

/// Owns the collection cache, so one instance should serve a whole process.
pub struct SearchOrchestrator {
	search: Arc<dyn MetadataSearch>,
	provider: Option<String>,
	page_size: u32,
	granule_page_size: u32,
	cache: Mutex<LruCache<String, Item>>,
	miss_gate: tokio::sync::Mutex<()>,
}
impl SearchOrchestrator {
	pub fn new(cfg: &cmr_config::Config, search: Arc<dyn MetadataSearch>) -> Self {
		let capacity = NonZeroUsize::new(cfg.cache.max_collections).unwrap_or(NonZeroUsize::MIN);

		Self {
			search,
			provider: cfg.cmr.provider_filter().map(str::to_string),
			page_size: cfg.cmr.page_size,
			granule_page_size: cfg.cmr.granule_page_size,
			cache: Mutex::new(LruCache::new(capacity)),
			miss_gate: tokio::sync::Mutex::new(()),
		}
	}

	pub fn cached_collections(&self) -> usize {
		self.cache().len()
	}

	pub fn circuit_open(&self) -> bool {
		self.search.circuit_open()
	}

	pub async fn run(
		&self,
		query: &str,
		input: SearchInput<'_>,
		events: Option<&EventSink>,
	) -> SearchOutcome {
		let ctx = RunContext { log: Mutex::new(Vec::new()), tripped: AtomicBool::new(false), events };
		let fallback = [query.to_string()];
		let searches = match input {
			SearchInput::Plan(plan) if !plan.stages.is_empty() =>
				settle(plan.stages.iter().map(|stage| self.run_stage(query, stage, &ctx)).collect::<Vec<_>>()).await,
			SearchInput::Subqueries(subqueries) if !subqueries.is_empty() =>
				settle(subqueries.iter().map(|subquery| self.run_subquery(subquery, &ctx)).collect::<Vec<_>>()).await,
			_ => settle(fallback.iter().map(|subquery| self.run_subquery(subquery, &ctx)).collect::<Vec<_>>()).await,
		};
		let circuit_breaker_tripped =
			ctx.tripped.load(Ordering::Acquire) || self.search.circuit_open();

		SearchOutcome {
			searches,
			query_log: ctx.log.into_inner().unwrap_or_else(PoisonError::into_inner),
			circuit_breaker_tripped,
		}
	}

	/// Keyword, paging, provider, and inferred temporal/spatial filters for `query`.
	pub fn base_params(&self, query: &str) -> SearchParams {
		let mut params =
			SearchParams::new().with("page_size", self.page_size).with("keyword", query);

		if let Some(provider) = self.provider.as_deref() {
			params.set("provider", provider);
		}
		if let Some(range) = infer_temporal(query) {
			params.set("temporal", range.to_param());
		}
		if let Some(bbox) = infer_bbox(query) {
			params.set("bounding_box", bbox.to_param());
		}

		params
	}

	fn granule_params(&self, base: &SearchParams, collection_id: &str) -> SearchParams {
		let mut params = base.clone();

		params.remove("page_size");
		params.set("collection_concept_id", collection_id);
		params.set("page_size", self.granule_page_size);

		params
	}

	async fn run_subquery(&self, query: &str, ctx: &RunContext<'_>) -> SearchResult {
		let params = self.base_params(query);
		let variable_params =
			SearchParams::new().with("keyword", query).with("page_size", self.page_size);
		let collections_then_granules = async {
			let collections = ctx.capture(
				Endpoint::Collections,
				&params,
				self.search.search(Endpoint::Collections, &params).await,
			);
			// Only the first returned collection is inspected in this mode.
			let granules = match collections.items.first().and_then(Item::concept_id) {
				Some(collection_id) => {
					let granule_params = self.granule_params(&params, collection_id);
					let outcome = self.search.search(Endpoint::Granules, &granule_params).await;

					ctx.capture(Endpoint::Granules, &granule_params, outcome)
				},
				None => ItemSet::default(),
			};

			(collections, granules)
		};
		let variables = async {
			let outcome = self.search.search(Endpoint::Variables, &variable_params).await;

			ctx.capture(Endpoint::Variables, &variable_params, outcome)
		};
		let ((collections, granules), variables) = tokio::join!(collections_then_granules, variables);

		tracing::debug!(
			query,
			collections = collections.len(),
			granules = granules.len(),
			variables = variables.len(),
			"Subquery search finished."
		);

		let result = SearchResult {
			query: query.to_string(),
			collections,
			granules,
			variables,
			related_collection_ids: None,
		};

		emit_search(ctx, &result);

		result
	}

	async fn run_stage(&self, query: &str, stage: &Stage, ctx: &RunContext<'_>) -> SearchResult {
		let stage_query =
			if stage.criteria.query.trim().is_empty() { query } else { stage.criteria.query.as_str() };
		let base = self.base_params(stage_query);
		let terms: Vec<&str> = if stage.criteria.variable_terms.is_empty() {
			vec![stage_query]
		} else {
			stage.criteria.variable_terms.iter().map(String::as_str).collect()
		};
		let variable_params: Vec<SearchParams> = terms
			.iter()
			.map(|term| SearchParams::new().with("keyword", term).with("page_size", self.page_size))
			.collect();
		let variable_outcomes = settle(
			variable_params.iter().map(|params| self.search.search(Endpoint::Variables, params)).collect::<Vec<_>>(),
		)
		.await;
		let variable_sets: Vec<ItemSet> = variable_params
			.iter()
			.zip(variable_outcomes)
			.map(|(params, outcome)| ctx.capture(Endpoint::Variables, params, outcome))
			.collect();
		let variables = merge_unique(variable_sets.iter().map(|set| set.items.as_slice()));
		let related_ids = related_collection_ids(&variables);
		let (cached, missing) = self.partition_cached(&related_ids);
		let mut extra_params = Vec::new();

		for key in ["short_name", "science_keywords_h"] {
			for term in terms.iter().take(EXTRA_TERM_LIMIT) {
				let mut params = base.clone();

				params.remove("keyword");
				params.set(key, term);
				extra_params.push(params);
			}
		}

		let (keyword, extras, looked_up) = tokio::join!(
			async {
				let outcome = self.search.search(Endpoint::Collections, &base).await;

				ctx.capture(Endpoint::Collections, &base, outcome)
			},
			settle(extra_params.iter().map(|params| async move {
				let outcome = self.search.search(Endpoint::Collections, params).await;

				ctx.capture(Endpoint::Collections, params, outcome)
			}).collect::<Vec<_>>()),
			self.lookup_missing(&base, missing, ctx),
		);
		let mut lists: Vec<&[Item]> = vec![keyword.items.as_slice()];

		lists.extend(extras.iter().map(|set| set.items.as_slice()));
		lists.push(looked_up.as_slice());
		lists.push(cached.as_slice());

		let collections = merge_unique(lists);
		let granule_params: Vec<SearchParams> = collections
			.iter()
			.take(GRANULE_COLLECTION_LIMIT)
			.filter_map(Item::concept_id)
			.map(|collection_id| self.granule_params(&base, collection_id))
			.collect();
		let granule_outcomes = settle(
			granule_params.iter().map(|params| self.search.search(Endpoint::Granules, params)).collect::<Vec<_>>(),
		)
		.await;
		let granules: Vec<Item> = granule_params
			.iter()
			.zip(granule_outcomes)
			.flat_map(|(params, outcome)| {
				let set = ctx.capture(Endpoint::Granules, params, outcome);

				if let Some(error) = set.error.as_deref() {
					tracing::warn!(error, "Granule fetch failed; continuing without it.");
				}

				set.items
			})
			.collect();

		tracing::debug!(
			stage = %stage.name,
			variables = variables.len(),
			collections = collections.len(),
			granules = granules.len(),
			related = related_ids.len(),
			"Search stage finished."
		);

		let result = SearchResult {
			query: stage_query.to_string(),
			collections: ItemSet::new(collections),
			granules: ItemSet::new(granules),
			variables: ItemSet::new(variables),
			related_collection_ids: Some(related_ids),
		};

		emit_search(ctx, &result);

		result
	}

	/// Splits ids into cached collections and ids still to fetch, preserving order.
	fn partition_cached(&self, ids: &[String]) -> (Vec<Item>, Vec<String>) {
		let mut cache = self.cache();
		let mut hits = Vec::new();
		let mut missing = Vec::new();

		for id in ids {
			match cache.get(id) {
				Some(item) => hits.push(item.clone()),
				None => missing.push(id.clone()),
			}
		}

		(hits, missing)
	}

	/// One concept-id batch lookup for ids not in the cache. Concurrent callers queue on the
	/// gate and re-check the cache, so an id set is fetched at most once.
	async fn lookup_missing(
		&self,
		base: &SearchParams,
		missing: Vec<String>,
		ctx: &RunContext<'_>,
	) -> Vec<Item> {
		if missing.is_empty() {
			return Vec::new();
		}

		let _gate = self.miss_gate.lock().await;
		let (mut found, still_missing) = self.partition_cached(&missing);

		if still_missing.is_empty() {
			return found;
		}

		let batch: Vec<&String> = still_missing.iter().take(BATCH_LOOKUP_LIMIT).collect();
		let mut params = base.clone();

		params.remove("keyword");
		params.set("page_size", batch.len());

		for id in &batch {
			params.push("concept_id", id);
		}

		let outcome = self.search.search(Endpoint::Collections, &params).await;
		let fetched = ctx.capture(Endpoint::Collections, &params, outcome);

		{
			let mut cache = self.cache();

			for item in &fetched.items {
				if let Some(id) = item.concept_id() {
					cache.put(id.to_string(), item.clone());
				}
			}
		}

		let mut items = fetched.items;

		items.append(&mut found);

		items
	}

	fn cache(&self) -> MutexGuard<'_, LruCache<String, Item>> {
		self.cache.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Collection ids referenced by variable associations, first-seen order.
fn related_collection_ids(variables: &[Item]) -> Vec<String> {
	let mut ids: Vec<String> = Vec::new();

	for id in variables.iter().flat_map(Item::associated_collection_ids) {
		if !ids.contains(&id) {
			ids.push(id);
		}
	}

	ids
}

fn emit_search(ctx: &RunContext<'_>, result: &SearchResult) {
	let errors: Vec<&str> = [&result.collections, &result.granules, &result.variables]
		.into_iter()
		.filter_map(|set| set.error.as_deref())
		.collect();

	events::emit(
		ctx.events,
		Event::update(serde_json::json!({
			"phase": "cmr",
			"type": "search",
			"query": result.query,
			"collections": result.collections.len(),
			"granules": result.granules.len(),
			"variables": result.variables.len(),
			"errors": errors,
		})),
	);
}
