use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constraints;

static BOUNDED_YEAR: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"\b(?:19|20)\d{2}\b").expect("Bounded year pattern must compile.")
});

const BANNED_PHRASES: [&str; 3] = ["medical records", "social security", "bank account"];
const MIN_QUERY_CHARS: usize = 8;
const MAX_SUBQUERIES: usize = 5;

/// Feasibility verdict. Warnings appear in `reasons` without clearing `feasible`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
	pub feasible: bool,
	pub reasons: Vec<String>,
	pub suggested_alternatives: Vec<String>,
}

pub fn validate(query: &str, subqueries: &[String]) -> Validation {
	let mut feasible = true;
	let mut reasons = Vec::new();
	let mut suggested_alternatives = Vec::new();

	if query.trim().is_empty() {
		feasible = false;

		reasons.push("Empty query".to_string());
	}
	if query.chars().count() < MIN_QUERY_CHARS {
		reasons.push("Very short query; may be ambiguous".to_string());
	}

	let lowered = query.to_lowercase();

	if BANNED_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
		feasible = false;

		reasons.push("Out-of-scope content detected".to_string());
	}

	let years: Vec<i32> =
		BOUNDED_YEAR.find_iter(query).filter_map(|found| found.as_str().parse().ok()).collect();

	match years.as_slice() {
		[] => reasons.push("No temporal bounds detected".to_string()),
		[first, .., last] if first > last => {
			feasible = false;

			reasons.push("Start year after end year".to_string());
		},
		_ => {},
	}

	if !constraints::mentions_region(query) {
		feasible = false;

		reasons.push("Region not recognized".to_string());
		suggested_alternatives = constraints::region_names();
	}
	if subqueries.len() > MAX_SUBQUERIES {
		reasons.push("High complexity; will decompose into steps".to_string());
	}

	Validation { feasible, reasons, suggested_alternatives }
}
