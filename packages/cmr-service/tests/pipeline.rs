use serde_json::Value;
use tokio::sync::mpsc;

use cmr_config::{Config, LlmProviderConfig};
use cmr_domain::Intent;
use cmr_service::{CmrService, Event, EventKind};
use cmr_testkit::{Hit, MockServer, chat_reply, collection, granule, items, variable};

const QUERY: &str = "Compare rainfall over sub-saharan africa 2010-2012";

fn test_config(base_url: &str) -> Config {
	let mut cfg = Config::default();

	cfg.cmr.base_url = base_url.to_string();
	cfg.cmr.timeout_ms = 2_000;
	cfg.retry.initial_backoff_ms = 1;
	cfg.retry.max_backoff_ms = 2;

	cfg
}

fn llm(base_url: &str, provider_id: &str) -> LlmProviderConfig {
	LlmProviderConfig {
		provider_id: provider_id.to_string(),
		api_base: base_url.to_string(),
		api_key: "test-key".to_string(),
		path: "/v1/chat/completions".to_string(),
		model: provider_id.to_string(),
		temperature: 0.2,
		timeout_ms: 2_000,
		default_headers: Default::default(),
	}
}

fn catalog(hit: &Hit) -> (u16, Value) {
	if hit.path.contains("variables") {
		return (200, items(vec![variable("V1-P", "precipitationCal", &["C9-P", "C1-P"])]));
	}
	if hit.path.contains("granules") {
		return (
			200,
			items(vec![
				granule("G1", "2010-01-01T00:00:00Z", "2010-06-30T00:00:00Z", [-20.0, -35.0, 10.0, 0.0]),
				granule("G2", "2010-07-10T00:00:00Z", "2012-12-31T00:00:00Z", [0.0, -10.0, 52.0, 20.0]),
			]),
		);
	}
	if !hit.params("concept_id").is_empty() {
		return (200, items(vec![collection("C9-P", "GPM_3IMERGDF", "GES_DISC")]));
	}

	(200, items(vec![collection("C1-P", "TRMM_3B42", "GES_DISC")]))
}

/// Scripted chat replies keyed on each agent's prompt.
fn model(hit: &Hit) -> (u16, Value) {
	let body = hit.body.as_str();

	if body.contains("\"model\":\"down\"") {
		return (500, serde_json::json!({ "error": "unavailable" }));
	}
	if body.contains("classify") {
		return (
			200,
			chat_reply(&format!(r#"{{"intent": "analytical", "subqueries": ["{QUERY}"]}}"#)),
		);
	}
	if body.contains("expand") {
		return (200, chat_reply("```json\n[\"rain rate\"]\n```"));
	}

	(200, chat_reply("Model summary"))
}

fn respond(hit: &Hit) -> (u16, Value) {
	if hit.path.contains("chat") { model(hit) } else { catalog(hit) }
}

#[tokio::test]
async fn validated_query_runs_every_stage_with_fallbacks() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let service = CmrService::new(test_config(&server.base_url())).expect("Failed to build service.");
	let response = service.query(QUERY, None).await.expect("Expected a response.");
	let json = serde_json::to_value(&response).expect("Expected serializable response.");

	assert!(response.validated);
	assert_eq!(response.intent, Intent::Analytical);
	assert_eq!(
		response.failover.fallbacks_applied,
		vec!["intent:heuristic", "planning:baseline", "synthesis:template"]
	);
	assert_eq!(response.results.queries.len(), 3);
	assert!(response.results.total_collections >= 6);
	assert!(!response.cmr_queries.is_empty());
	assert!(response.synthesis.starts_with(&format!("Query: {QUERY}")));
	assert_eq!(response.recommendations.text, response.synthesis);
	assert_eq!(response.history, vec![QUERY.to_string()]);
	assert_eq!(
		response.results.cross_collection_map.get("C1-P"),
		Some(&vec![0, 1, 2]),
	);
	assert_eq!(response.results.dataset_relationships.len(), 1);

	let entry = &response.results.queries[0];

	assert_eq!(entry.temporal_coverage.start.as_deref(), Some("2010-01-01"));
	assert_eq!(entry.temporal_coverage.end.as_deref(), Some("2012-12-31"));
	assert_eq!(entry.temporal_gaps.len(), 1);
	assert!(entry.score > 0.0);
	assert_eq!(json["conversation_state"]["last_region_bbox"], serde_json::json!([-20.0, -35.0, 52.0, 20.0]));
	assert_eq!(json["comparison"]["ranked_recommendations"][0]["collection"], "TRMM_3B42");
	assert_eq!(json["inferred_constraints"]["region"]["name"], "sub-saharan africa 2010-2012");
	assert!(json["run_metadata"]["run_id"].is_string());
	assert_eq!(json["failover"]["circuit_breaker_tripped"], false);
}

#[tokio::test]
async fn configured_model_drives_intent_planning_and_synthesis() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let base_url = server.base_url();
	let mut cfg = test_config(&base_url);

	cfg.providers.llm = vec![llm(&base_url, "primary")];

	let service = CmrService::new(cfg).expect("Failed to build service.");
	let response = service.query(QUERY, None).await.expect("Expected a response.");

	assert_eq!(response.intent, Intent::Analytical);
	assert!(response.failover.fallbacks_applied.is_empty());
	assert_eq!(response.synthesis, "Model summary");
	assert!(response.plan.is_some_and(|plan| plan.expanded_terms.contains(&"rain rate".to_string())));
	assert_eq!(server.count("/v1/chat/completions"), 3);
}

#[tokio::test]
async fn failing_models_downgrade_to_deterministic_paths() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let base_url = server.base_url();
	let mut cfg = test_config(&base_url);

	cfg.providers.llm = vec![llm(&base_url, "down")];

	let service = CmrService::new(cfg).expect("Failed to build service.");
	let first = service.query(QUERY, None).await.expect("Expected a response.");
	let calls_after_first = server.count("/v1/chat/completions");
	let second = service.query(QUERY, None).await.expect("Expected a response.");

	assert_eq!(
		first.failover.fallbacks_applied,
		vec!["intent:heuristic", "planning:baseline", "synthesis:template"]
	);
	assert_eq!(second.failover.fallbacks_applied, first.failover.fallbacks_applied);
	assert_eq!(calls_after_first, 3);
	assert_eq!(server.count("/v1/chat/completions"), calls_after_first);
}

#[tokio::test]
async fn failover_reaches_the_secondary_provider() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let base_url = server.base_url();
	let mut cfg = test_config(&base_url);

	cfg.providers.llm = vec![llm(&base_url, "down"), llm(&base_url, "secondary")];

	let service = CmrService::new(cfg).expect("Failed to build service.");
	let response = service.query(QUERY, None).await.expect("Expected a response.");

	assert!(response.failover.fallbacks_applied.is_empty());
	assert_eq!(response.synthesis, "Model summary");
}

#[tokio::test]
async fn rejected_query_skips_search_but_still_answers() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let service = CmrService::new(test_config(&server.base_url())).expect("Failed to build service.");
	let response = service.query("rainfall totals", None).await.expect("Expected a response.");
	let validation = response.validation.as_ref().expect("Expected a validation verdict.");
	let names: Vec<&str> = response
		.comparison
		.ranked_recommendations
		.iter()
		.map(|rec| rec.collection.as_str())
		.collect();

	assert!(!response.validated);
	assert!(validation.reasons.contains(&"Region not recognized".to_string()));
	assert!(!validation.suggested_alternatives.is_empty());
	assert!(response.plan.is_some());
	assert_eq!(server.count("/search/"), 0);
	assert_eq!(response.results.total_collections, 0);
	assert!(response.results.queries.is_empty());
	assert_eq!(names, vec!["GPM IMERG", "TRMM 3B42", "CHIRPS", "GPCC", "ERA5"]);
}

#[tokio::test]
async fn session_history_accumulates_per_session() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let service = CmrService::new(test_config(&server.base_url())).expect("Failed to build service.");

	service.query("first", Some("s1")).await.expect("Expected a response.");

	let second = service.query("second", Some("s1")).await.expect("Expected a response.");
	let other = service.query("third", Some("s2")).await.expect("Expected a response.");

	assert_eq!(second.history, vec!["first".to_string(), "second".to_string()]);
	assert_eq!(other.history, vec!["third".to_string()]);
	assert!(second.synthesis.contains("Session memory: 1 previous queries"));
}

#[tokio::test]
async fn concurrent_runs_in_one_session_keep_every_query() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let service = CmrService::new(test_config(&server.base_url())).expect("Failed to build service.");
	let (first, second) =
		tokio::join!(service.query("first", Some("s1")), service.query("second", Some("s1")));

	first.expect("Expected a response.");
	second.expect("Expected a response.");

	let third = service.query("third", Some("s1")).await.expect("Expected a response.");

	assert_eq!(third.history.len(), 3);
	assert!(third.history.contains(&"first".to_string()));
	assert!(third.history.contains(&"second".to_string()));
	assert_eq!(third.history.last().map(String::as_str), Some("third"));
}

#[tokio::test]
async fn stream_emits_stage_updates_then_end() {
	let server = MockServer::start(respond).await.expect("Failed to start mock server.");
	let service = CmrService::new(test_config(&server.base_url())).expect("Failed to build service.");
	let (tx, mut rx) = mpsc::unbounded_channel();

	service.stream(QUERY, None, tx).await;

	let mut received: Vec<Event> = Vec::new();

	while let Some(event) = rx.recv().await {
		received.push(event);
	}

	let phases: Vec<&str> =
		received.iter().filter_map(|event| event.data["phase"].as_str()).collect();
	let last = received.last().expect("Expected at least one event.");

	assert_eq!(received[0].kind, EventKind::Update);
	assert_eq!(phases.first(), Some(&"intent"));
	assert_eq!(phases.last(), Some(&"comparison"));

	for phase in ["validation", "planning", "cmr", "analysis", "synthesis"] {
		assert!(phases.contains(&phase), "Missing phase {phase}.");
	}

	assert_eq!(received.iter().filter(|event| event.data["type"] == "search").count(), 3);
	assert_eq!(last.kind, EventKind::End);
	assert_eq!(last.to_record(), "event: end\ndata: {}\n\n");
	assert!(received.iter().all(|event| event.kind != EventKind::Error));
}
