//! The fixed stage graph and the final response document.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex, PoisonError},
	time::Instant,
};

use serde::Serialize;
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use cmr_config::{Config, SearchMode};
use cmr_domain::{Assumption, BoundingBox, InferredConstraints, Intent, Validation};
use cmr_providers::SimilarDoc;

use crate::{
	Providers, Result,
	analysis::{self, AnalysisSummary, GraphEdge, RelatedCollection, ResultsPaging},
	events::{self, Event, EventSink},
	intent::IntentClassifier,
	planning::{QueryPlanner, SearchPlan},
	recommend::{self, Comparison},
	router::ModelHandle,
	search::{QueryLogEntry, SearchInput, SearchOrchestrator, SearchOutcome},
	session::{InMemorySessions, SessionStore},
	synthesis::Synthesizer,
};

const HEADER: &str = "NASA CMR Agent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
	Start,
	Intent,
	Validation,
	Planning,
	Cmr,
	Analysis,
	Synthesis,
}
impl Step {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Start => "start",
			Self::Intent => "intent",
			Self::Validation => "validation",
			Self::Planning => "planning",
			Self::Cmr => "cmr",
			Self::Analysis => "analysis",
			Self::Synthesis => "synthesis",
		}
	}

	/// The step after `self`, or `None` once synthesis has run. Search is skipped for
	/// queries that failed validation.
	pub fn next(self, state: &QueryState) -> Option<Self> {
		match self {
			Self::Start => Some(Self::Intent),
			Self::Intent => Some(Self::Validation),
			Self::Validation => Some(Self::Planning),
			Self::Planning if state.validated => Some(Self::Cmr),
			Self::Planning | Self::Cmr => Some(Self::Analysis),
			Self::Analysis => Some(Self::Synthesis),
			Self::Synthesis => None,
		}
	}
}

/// Working record for one request, filled in step by step.
#[derive(Debug, Clone)]
pub struct QueryState {
	pub run_id: Uuid,
	pub started_at: OffsetDateTime,
	pub user_query: String,
	pub history: Vec<String>,
	pub intent: Intent,
	pub subqueries: Vec<String>,
	pub inferred_constraints: Option<InferredConstraints>,
	pub semantic_context: Vec<SimilarDoc>,
	pub validation: Option<Validation>,
	pub validated: bool,
	pub plan: Option<SearchPlan>,
	pub cmr_results: SearchOutcome,
	pub analysis: AnalysisSummary,
	pub synthesis: String,
	pub fallbacks_applied: Vec<String>,
}
impl QueryState {
	pub fn new(user_query: &str, history: Vec<String>) -> Self {
		Self {
			run_id: Uuid::new_v4(),
			started_at: OffsetDateTime::now_utc(),
			user_query: user_query.to_string(),
			history,
			intent: Intent::default(),
			subqueries: Vec::new(),
			inferred_constraints: None,
			semantic_context: Vec::new(),
			validation: None,
			validated: false,
			plan: None,
			cmr_results: SearchOutcome::default(),
			analysis: AnalysisSummary::default(),
			synthesis: String::new(),
			fallbacks_applied: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalResponse {
	pub header: String,
	pub validated: bool,
	pub intent: Intent,
	pub subqueries: Vec<String>,
	pub inferred_constraints: Option<InferredConstraints>,
	pub assumptions: Vec<Assumption>,
	pub plan: Option<SearchPlan>,
	pub validation: Option<Validation>,
	pub results: AnalysisSummary,
	pub comparison: Comparison,
	pub recommendations: Recommendations,
	pub related_collections: Vec<RelatedCollection>,
	pub cmr_queries: Vec<QueryLogEntry>,
	pub run_metadata: RunMetadata,
	pub failover: Failover,
	pub results_paging: ResultsPaging,
	pub visuals: Visuals,
	pub conversation_state: ConversationState,
	pub semantic_context: Vec<SimilarDoc>,
	pub kg_edges: Vec<GraphEdge>,
	pub history: Vec<String>,
	pub synthesis: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendations {
	pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
	pub run_id: Uuid,
	pub started_at: String,
	pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failover {
	pub circuit_breaker_tripped: bool,
	pub fallbacks_applied: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Visuals {
	pub data_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
	pub last_region_bbox: Option<BoundingBox>,
}

/// Long-lived pipeline. Agents keep their model downgrade state and the orchestrator keeps its
/// collection cache across requests, so one instance should serve the whole process.
pub struct CmrService {
	pub cfg: Config,
	providers: Providers,
	sessions: Arc<dyn SessionStore>,
	intent: IntentClassifier,
	planner: QueryPlanner,
	synthesizer: Synthesizer,
	search: SearchOrchestrator,
	session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}
impl CmrService {
	/// HTTP-backed providers and in-memory sessions.
	pub fn new(cfg: Config) -> Result<Self> {
		let providers = Providers::from_config(&cfg)?;

		Ok(Self::with_providers(cfg, providers, Arc::new(InMemorySessions::default())))
	}

	pub fn with_providers(cfg: Config, providers: Providers, sessions: Arc<dyn SessionStore>) -> Self {
		let model = |agent: &'static str| {
			ModelHandle::new(agent, &cfg.providers.llm, Arc::clone(&providers.llm))
		};
		let intent = IntentClassifier::new(model("intent"));
		let planner = QueryPlanner::new(model("planning"));
		let synthesizer = Synthesizer::new(model("synthesis"));
		let search = SearchOrchestrator::new(&cfg, Arc::clone(&providers.search));

		Self {
			cfg,
			providers,
			sessions,
			intent,
			planner,
			synthesizer,
			search,
			session_locks: Mutex::new(HashMap::new()),
		}
	}

	pub fn search(&self) -> &SearchOrchestrator {
		&self.search
	}

	/// Runs one query, reading and writing the session's history when `session_id` is given.
	pub async fn query(&self, query: &str, session_id: Option<&str>) -> Result<FinalResponse> {
		self.query_with_events(query, session_id, None).await
	}

	/// Runs one query while sending progress events to `sink`. Always finishes with `end`; a
	/// failed run sends `error` first.
	pub async fn stream(&self, query: &str, session_id: Option<&str>, sink: EventSink) {
		if let Err(err) = self.query_with_events(query, session_id, Some(&sink)).await {
			tracing::warn!(error = %err, "Streaming run failed.");

			events::emit(Some(&sink), Event::error(err.to_string()));
		}

		events::emit(Some(&sink), Event::end());
	}

	async fn query_with_events(
		&self,
		query: &str,
		session_id: Option<&str>,
		events: Option<&EventSink>,
	) -> Result<FinalResponse> {
		let session_lock = session_id.map(|id| self.session_lock(id));
		let _session_guard = match &session_lock {
			Some(lock) => Some(lock.lock().await),
			None => None,
		};
		let history = match session_id {
			Some(id) => self.sessions.get(id).await,
			None => Vec::new(),
		};
		let outcome = self.run(query, history.clone(), events).await;

		if let Some(id) = session_id {
			let updated = match &outcome {
				Ok(response) => response.history.clone(),
				Err(_) => {
					let mut updated = history;

					updated.push(query.to_string());

					updated
				},
			};

			self.sessions.put(id, updated).await;
		}

		outcome
	}

	/// Runs for one session id are serialised so each sees the previous run's history.
	fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.session_locks.lock().unwrap_or_else(PoisonError::into_inner);

		Arc::clone(locks.entry(session_id.to_string()).or_default())
	}

	/// Walks the stage graph for `query` on top of the prior `history`.
	pub async fn run(
		&self,
		query: &str,
		history: Vec<String>,
		events: Option<&EventSink>,
	) -> Result<FinalResponse> {
		let clock = Instant::now();
		let mut state = QueryState::new(query, history);
		let mut step = Some(Step::Start);

		while let Some(current) = step {
			self.execute(current, &mut state, events).await?;

			tracing::info!(run_id = %state.run_id, step = current.as_str(), "Pipeline step finished.");

			step = current.next(&state);
		}

		let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
		let comparison =
			recommend::compare(&state.user_query, &state.analysis, &state.semantic_context);

		events::emit(events, Event::update(json!({ "phase": "comparison", "comparison": comparison })));

		tracing::info!(
			run_id = %state.run_id,
			duration_ms,
			validated = state.validated,
			circuit_breaker_tripped = state.cmr_results.circuit_breaker_tripped,
			"Pipeline run finished."
		);

		Ok(assemble(state, comparison, duration_ms))
	}

	async fn execute(
		&self,
		step: Step,
		state: &mut QueryState,
		events: Option<&EventSink>,
	) -> Result<()> {
		match step {
			Step::Start => {
				state.history.push(state.user_query.clone());
			},
			Step::Intent => {
				let (classification, semantic_context) = tokio::join!(
					self.intent.classify(&state.user_query),
					self.providers.similarity.search(&state.user_query),
				);

				if !classification.used_model {
					state.fallbacks_applied.push("intent:heuristic".to_string());
				}

				state.intent = classification.intent;
				state.subqueries = classification.subqueries;
				state.inferred_constraints = Some(cmr_domain::infer_constraints(&state.user_query));
				state.semantic_context = semantic_context;

				events::emit(
					events,
					Event::update(json!({
						"phase": "intent",
						"user_query": state.user_query,
						"intent": state.intent,
						"subqueries": state.subqueries,
						"history": state.history,
					})),
				);
			},
			Step::Validation => {
				let validation = cmr_domain::validate(&state.user_query, &state.subqueries);

				state.validated = validation.feasible;

				events::emit(
					events,
					Event::update(json!({
						"phase": "validation",
						"validation": validation,
						"validated": state.validated,
					})),
				);

				state.validation = Some(validation);
			},
			Step::Planning => {
				let planned = self.planner.plan(&state.user_query, &state.subqueries).await?;

				if !planned.expanded_by_model {
					state.fallbacks_applied.push("planning:baseline".to_string());
				}

				events::emit(events, Event::update(json!({ "phase": "planning", "plan": planned.plan })));

				state.plan = Some(planned.plan);
			},
			Step::Cmr => {
				let input = match (self.cfg.cmr.search_mode, state.plan.as_ref()) {
					(SearchMode::Staged, Some(plan)) => SearchInput::Plan(plan),
					_ => SearchInput::Subqueries(&state.subqueries),
				};
				let outcome = self.search.run(&state.user_query, input, events).await;

				events::emit(
					events,
					Event::update(json!({
						"phase": "cmr",
						"type": "done",
						"results": { "searches": outcome.searches },
						"circuit_breaker_tripped": outcome.circuit_breaker_tripped,
					})),
				);

				state.cmr_results = outcome;
			},
			Step::Analysis => {
				let constraints = state.inferred_constraints.as_ref();

				state.analysis = analysis::analyze(
					&state.cmr_results.searches,
					constraints.and_then(|constraints| constraints.temporal),
					constraints.and_then(|constraints| constraints.region.bbox),
					OffsetDateTime::now_utc(),
				);

				events::emit(
					events,
					Event::update(json!({ "phase": "analysis", "analysis": state.analysis })),
				);
			},
			Step::Synthesis => {
				let outcome =
					self.synthesizer.synthesize(&state.user_query, &state.analysis, &state.history).await;

				if !outcome.used_model {
					state.fallbacks_applied.push("synthesis:template".to_string());
				}

				state.synthesis = outcome.text;

				events::emit(
					events,
					Event::update(json!({ "phase": "synthesis", "synthesis": state.synthesis })),
				);
			},
		}

		Ok(())
	}
}

fn assemble(state: QueryState, comparison: Comparison, duration_ms: u64) -> FinalResponse {
	let QueryState {
		run_id,
		started_at,
		history,
		intent,
		subqueries,
		inferred_constraints,
		semantic_context,
		validation,
		validated,
		plan,
		cmr_results,
		analysis,
		synthesis,
		fallbacks_applied,
		..
	} = state;
	let assumptions = inferred_constraints
		.as_ref()
		.map(|constraints| constraints.assumptions.clone())
		.unwrap_or_default();
	let last_region_bbox = inferred_constraints.as_ref().and_then(|constraints| constraints.region.bbox);

	FinalResponse {
		header: HEADER.to_string(),
		validated,
		intent,
		subqueries,
		inferred_constraints,
		assumptions,
		plan,
		validation,
		comparison,
		recommendations: Recommendations { text: synthesis.clone() },
		related_collections: analysis.related_collections.clone(),
		cmr_queries: cmr_results.query_log,
		run_metadata: RunMetadata {
			run_id,
			started_at: started_at.format(&Rfc3339).unwrap_or_default(),
			duration_ms,
		},
		failover: Failover {
			circuit_breaker_tripped: cmr_results.circuit_breaker_tripped,
			fallbacks_applied,
		},
		results_paging: analysis.results_paging.clone(),
		visuals: Visuals { data_refs: analysis.data_refs.clone() },
		conversation_state: ConversationState { last_region_bbox },
		semantic_context,
		kg_edges: analysis.knowledge_graph.edges.clone(),
		history,
		synthesis,
		results: analysis,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejected_queries_skip_search() {
		let mut state = QueryState::new("q", Vec::new());

		assert_eq!(Step::Planning.next(&state), Some(Step::Analysis));

		state.validated = true;

		assert_eq!(Step::Planning.next(&state), Some(Step::Cmr));
		assert_eq!(Step::Cmr.next(&state), Some(Step::Analysis));
		assert_eq!(Step::Synthesis.next(&state), None);
	}

	#[test]
	fn steps_follow_the_fixed_order() {
		let state = QueryState::new("q", Vec::new());
		let mut order = vec![Step::Start];

		while let Some(next) = order.last().and_then(|step| step.next(&state)) {
			order.push(next);
		}

		let names: Vec<&str> = order.iter().map(|step| step.as_str()).collect();

		assert_eq!(names, vec!["start", "intent", "validation", "planning", "analysis", "synthesis"]);
	}
}
