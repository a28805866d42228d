use serde_json::Value;

use cmr_domain::{Intent, intent as heuristics};
use cmr_providers::llm;

use crate::router::ModelHandle;

const SYSTEM_PROMPT: &str = "You classify NASA CMR user queries into intents: exploratory, specific, \
	or analytical. Return a JSON object with intent and decomposed subqueries.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
	pub intent: Intent,
	pub subqueries: Vec<String>,
	/// False when the keyword heuristic produced the answer.
	pub used_model: bool,
}

pub struct IntentClassifier {
	model: ModelHandle,
}
impl IntentClassifier {
	pub fn new(model: ModelHandle) -> Self {
		Self { model }
	}

	pub async fn classify(&self, query: &str) -> Classification {
		if !self.model.is_available() {
			return heuristic(query);
		}

		let messages = [
			serde_json::json!({ "role": "system", "content": SYSTEM_PROMPT }),
			serde_json::json!({
				"role": "user",
				"content": format!("Query: {query}\nRespond as JSON with keys: intent, subqueries."),
			}),
		];

		match self.model.ask(&messages).await {
			Ok(text) => {
				let reply = llm::parse_json_reply(&text).unwrap_or(Value::Null);
				let (intent, subqueries) = heuristics::parse_model_reply(query, &reply);

				Classification { intent, subqueries, used_model: true }
			},
			Err(err) => {
				tracing::warn!(error = %err, "Intent classification fell back to keywords.");

				heuristic(query)
			},
		}
	}
}

fn heuristic(query: &str) -> Classification {
	Classification {
		intent: heuristics::classify(query),
		subqueries: heuristics::split_subqueries(query),
		used_model: false,
	}
}
