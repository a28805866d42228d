use std::sync::Arc;

use serde_json::Value;

use cmr_config::{Config, LlmProviderConfig, SearchMode};
use cmr_providers::CmrClient;
use cmr_service::{
	BoxFuture, LlmProvider, SearchInput, SearchOrchestrator, planning::QueryPlanner,
	router::ModelHandle,
};
use cmr_testkit::{Hit, MockServer, collection, granule, items, variable};

struct NoModel;
impl LlmProvider for NoModel {
	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [Value],
	) -> BoxFuture<'a, cmr_providers::Result<String>> {
		Box::pin(async {
			Err(cmr_providers::Error::InvalidResponse { message: "no model".to_string() })
		})
	}
}

fn test_config(base_url: String) -> Config {
	let mut cfg = Config::default();

	cfg.cmr.base_url = base_url;
	cfg.cmr.timeout_ms = 2_000;
	cfg.retry.initial_backoff_ms = 1;
	cfg.retry.max_backoff_ms = 2;

	cfg
}

fn orchestrator(cfg: &Config) -> SearchOrchestrator {
	let client = CmrClient::new(cfg).expect("Failed to build client.");

	SearchOrchestrator::new(cfg, Arc::new(client))
}

fn is_batch_lookup(hit: &Hit) -> bool {
	!hit.params("concept_id").is_empty()
}

/// Variables point at C9-P, keyword searches find C1-P, batch lookups resolve C9-P.
fn catalog(hit: &Hit) -> (u16, Value) {
	if hit.path.contains("variables") {
		return (200, items(vec![variable("V1-P", "precipitationCal", &["C9-P"])]));
	}
	if hit.path.contains("granules") {
		let collection_id = hit.param("collection_concept_id").unwrap_or("none");

		return (
			200,
			items(vec![granule(
				&format!("G-{collection_id}"),
				"2015-01-01T00:00:00Z",
				"2015-01-31T23:59:59Z",
				[-20.0, -35.0, 52.0, 20.0],
			)]),
		);
	}
	if is_batch_lookup(hit) {
		return (200, items(vec![collection("C9-P", "GPM_3IMERGDF", "GES_DISC")]));
	}

	(200, items(vec![collection("C1-P", "TRMM_3B42", "GES_DISC")]))
}

#[tokio::test]
async fn repeated_staged_plan_reuses_cached_collections() {
	let server = MockServer::start(catalog).await.expect("Failed to start mock server.");
	let cfg = test_config(server.base_url());
	let search = orchestrator(&cfg);
	let query = "rainfall over sub-saharan africa 2010-2012";
	let planner = QueryPlanner::new(ModelHandle::new("planning", &[], Arc::new(NoModel)));
	let planned = planner.plan(query, &[query.to_string()]).await.expect("Expected a plan.");
	let first = search.run(query, SearchInput::Plan(&planned.plan), None).await;
	let second = search.run(query, SearchInput::Plan(&planned.plan), None).await;
	let batch_lookups = server.hits().iter().filter(|hit| is_batch_lookup(hit)).count();

	assert_eq!(batch_lookups, 1);
	assert_eq!(search.cached_collections(), 1);
	assert_eq!(first.searches.len(), 3);
	assert!(!first.circuit_breaker_tripped);

	for stage in first.searches.iter().chain(&second.searches) {
		let ids: Vec<&str> = stage.collections.concept_ids().collect();

		assert_eq!(ids, vec!["C1-P", "C9-P"]);
		assert_eq!(stage.related_collection_ids.as_deref(), Some(&["C9-P".to_string()][..]));
		assert_eq!(stage.granules.len(), 2);
		assert_eq!(stage.variables.concept_ids().collect::<Vec<_>>(), vec!["V1-P"]);
	}
}

#[tokio::test]
async fn staged_searches_send_filters_and_log_requests() {
	let server = MockServer::start(catalog).await.expect("Failed to start mock server.");
	let mut cfg = test_config(server.base_url());

	cfg.cmr.provider = "GES_DISC".to_string();

	let search = orchestrator(&cfg);
	let query = "rainfall over sub-saharan africa 2010-2012";
	let planner = QueryPlanner::new(ModelHandle::new("planning", &[], Arc::new(NoModel)));
	let planned = planner.plan(query, &[query.to_string()]).await.expect("Expected a plan.");
	let outcome = search.run(query, SearchInput::Plan(&planned.plan), None).await;
	let hits = server.hits();
	let keyword = hits
		.iter()
		.find(|hit| hit.path.contains("collections") && hit.param("keyword").is_some())
		.expect("Expected a keyword collection search.");
	let granule_hit = hits
		.iter()
		.find(|hit| hit.path.contains("granules"))
		.expect("Expected a granule search.");

	assert_eq!(keyword.param("provider"), Some("GES_DISC"));
	assert_eq!(keyword.param("temporal"), Some("2010-01-01T00:00:00Z,2012-12-31T23:59:59Z"));
	assert_eq!(keyword.param("bounding_box"), Some("-20,-35,52,20"));
	assert_eq!(granule_hit.param("page_size"), Some("50"));
	assert!(hits.iter().any(|hit| hit.param("short_name") == Some("rainfall")));
	assert!(hits.iter().any(|hit| hit.param("science_keywords_h") == Some("rainfall")));
	assert_eq!(outcome.query_log.len(), hits.len());
	assert!(outcome.query_log.iter().all(|entry| entry.total_hits == 1));
}

#[tokio::test]
async fn plain_mode_fetches_granules_for_first_collection() {
	let server = MockServer::start(catalog).await.expect("Failed to start mock server.");
	let mut cfg = test_config(server.base_url());

	cfg.cmr.search_mode = SearchMode::Plain;

	let search = orchestrator(&cfg);
	let subqueries = ["rain".to_string(), "snow".to_string()];
	let outcome = search.run("rain and snow", SearchInput::Subqueries(&subqueries), None).await;
	let hits = server.hits();
	let granule_hits: Vec<&Hit> = hits.iter().filter(|hit| hit.path.contains("granules")).collect();

	assert_eq!(outcome.searches.len(), 2);
	assert_eq!(outcome.searches[0].query, "rain");
	assert_eq!(outcome.searches[1].query, "snow");
	assert_eq!(granule_hits.len(), 2);
	assert!(granule_hits.iter().all(|hit| hit.param("collection_concept_id") == Some("C1-P")));
	assert!(!hits.iter().any(is_batch_lookup));
	assert!(outcome.searches.iter().all(|result| result.related_collection_ids.is_none()));
	assert_eq!(outcome.searches[0].granules.len(), 1);
}

#[tokio::test]
async fn open_circuit_is_reported_and_captured_per_result() {
	let server = MockServer::start(|_| (503, serde_json::json!({})))
		.await
		.expect("Failed to start mock server.");
	let mut cfg = test_config(server.base_url());

	cfg.circuit.failure_threshold = 1;

	let search = orchestrator(&cfg);
	let subqueries = ["rain".to_string()];
	let outcome = search.run("rain", SearchInput::Subqueries(&subqueries), None).await;
	let result = &outcome.searches[0];

	assert!(outcome.circuit_breaker_tripped);
	assert!(result.collections.is_empty());
	assert!(result.collections.error.is_some());
	assert!(result.variables.error.is_some());
	assert!(outcome.query_log.is_empty());
	assert!(search.circuit_open());
}
