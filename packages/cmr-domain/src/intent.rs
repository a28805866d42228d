use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SUBQUERY_SPLIT: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"[,;]|\band\b").expect("Subquery split pattern must compile."));

const ANALYTICAL_KEYWORDS: [&str; 10] = [
	"compare",
	"relationship",
	"impact",
	"effect",
	"correlate",
	"trend",
	"how does",
	"influence",
	"link",
	"association",
];
const SPECIFIC_KEYWORDS: [&str; 10] = [
	"find", "search", "dataset", "datasets", "granules", "variables", "download", "show me", "list",
	"give me",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
	#[default]
	Exploratory,
	Specific,
	Analytical,
}
impl Intent {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_lowercase().as_str() {
			"exploratory" => Some(Self::Exploratory),
			"specific" => Some(Self::Specific),
			"analytical" => Some(Self::Analytical),
			_ => None,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Exploratory => "exploratory",
			Self::Specific => "specific",
			Self::Analytical => "analytical",
		}
	}
}

/// Keyword classification used when no language model answers.
pub fn classify(query: &str) -> Intent {
	let lowered = query.to_lowercase();

	if ANALYTICAL_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
		Intent::Analytical
	} else if SPECIFIC_KEYWORDS.iter().any(|keyword| lowered.contains(keyword)) {
		Intent::Specific
	} else {
		Intent::Exploratory
	}
}

/// Splits on commas, semicolons, and the word "and". Never returns an empty list.
pub fn split_subqueries(query: &str) -> Vec<String> {
	let parts: Vec<String> = SUBQUERY_SPLIT
		.split(query)
		.map(str::trim)
		.filter(|part| !part.is_empty())
		.map(str::to_string)
		.collect();

	if parts.is_empty() { vec![query.to_string()] } else { parts }
}

/// Reads `{ "intent": ..., "subqueries": [...] }` from a model reply, defaulting each missing or
/// malformed key independently. An empty subquery list falls back to the whole query.
pub fn parse_model_reply(query: &str, value: &serde_json::Value) -> (Intent, Vec<String>) {
	let intent = value
		.get("intent")
		.and_then(|intent| intent.as_str())
		.and_then(Intent::parse)
		.unwrap_or_default();
	let subqueries: Vec<String> = value
		.get("subqueries")
		.and_then(|subqueries| subqueries.as_array())
		.map(|items| {
			items
				.iter()
				.filter_map(|item| item.as_str())
				.map(str::trim)
				.filter(|item| !item.is_empty())
				.map(str::to_string)
				.collect()
		})
		.unwrap_or_default();
	let subqueries = if subqueries.is_empty() { vec![query.to_string()] } else { subqueries };

	(intent, subqueries)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn analytical_keywords_win() {
		assert_eq!(classify("Find the trend in rainfall"), Intent::Analytical);
		assert_eq!(classify("How does ENSO influence drought"), Intent::Analytical);
	}

	#[test]
	fn specific_and_exploratory() {
		assert_eq!(classify("Show me MODIS granules"), Intent::Specific);
		assert_eq!(classify("ocean color"), Intent::Exploratory);
	}

	#[test]
	fn splits_on_separators() {
		assert_eq!(
			split_subqueries("rainfall over kenya, soil moisture and vegetation; "),
			vec!["rainfall over kenya", "soil moisture", "vegetation"]
		);
		assert_eq!(split_subqueries(" , ; "), vec![" , ; "]);
		assert_eq!(split_subqueries("sandstorms"), vec!["sandstorms"]);
	}

	#[test]
	fn model_reply_defaults_missing_keys() {
		let (intent, subqueries) =
			parse_model_reply("q", &serde_json::json!({ "intent": "Specific" }));

		assert_eq!(intent, Intent::Specific);
		assert_eq!(subqueries, vec!["q"]);

		let (intent, subqueries) =
			parse_model_reply("q", &serde_json::json!({ "intent": "bogus", "subqueries": ["a", 1] }));

		assert_eq!(intent, Intent::Exploratory);
		assert_eq!(subqueries, vec!["a"]);
	}

	#[test]
	fn empty_model_subqueries_fall_back_to_query() {
		let (intent, subqueries) = parse_model_reply(
			"rain over kenya",
			&serde_json::json!({ "intent": "analytical", "subqueries": [] }),
		);

		assert_eq!(intent, Intent::Analytical);
		assert_eq!(subqueries, vec!["rain over kenya"]);
	}
}
