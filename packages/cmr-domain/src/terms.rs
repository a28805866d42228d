//! Search-term normalisation for the query planner.

pub const STOPWORDS: [&str; 12] =
	["over", "in", "the", "a", "an", "and", "or", "to", "of", "for", "on", "with"];

const RAIN_TRIGGERS: [&str; 2] = ["rain", "rainfall"];
const RAIN_SYNONYMS: [&str; 3] = ["precipitation", "imerg", "trmm"];
const VARIABLE_FALLBACKS: [(&str, &str); 3] =
	[("rainfall", "precipitation"), ("imerg", "precipitation"), ("trmm", "precipitation")];

/// Subqueries followed by the lowercase words of the query with commas removed.
pub fn seed_terms(query: &str, subqueries: &[String]) -> Vec<String> {
	let mut seeds = subqueries.to_vec();

	seeds.extend(query.replace(',', " ").to_lowercase().split_whitespace().map(str::to_string));

	seeds
}

/// Appends expansion terms not already present.
pub fn merge_expansion(terms: &mut Vec<String>, expansion: impl IntoIterator<Item = String>) {
	for term in expansion {
		let term = term.trim().to_lowercase();

		if !term.is_empty() && !terms.contains(&term) {
			terms.push(term);
		}
	}
}

pub fn with_baseline_synonyms(terms: &mut Vec<String>) {
	if terms.iter().any(|term| RAIN_TRIGGERS.contains(&term.as_str())) {
		for synonym in RAIN_SYNONYMS {
			if !terms.iter().any(|term| term == synonym) {
				terms.push(synonym.to_string());
			}
		}
	}
}

pub fn dedup_preserving_order(terms: Vec<String>) -> Vec<String> {
	let mut out: Vec<String> = Vec::with_capacity(terms.len());

	for term in terms {
		if !out.contains(&term) {
			out.push(term);
		}
	}

	out
}

/// Terms worth a variable search: no stopwords, no year spans, no blanks.
pub fn variable_terms(expanded: &[String]) -> Vec<String> {
	let mut out: Vec<String> = Vec::new();

	for term in expanded {
		let trimmed = term.trim();

		if trimmed.is_empty() || is_numeric_token(trimmed) || STOPWORDS.contains(&trimmed) {
			continue;
		}
		if !out.iter().any(|existing| existing == trimmed) {
			out.push(trimmed.to_string());
		}
	}

	for (present, implied) in VARIABLE_FALLBACKS {
		if out.iter().any(|term| term == present) && !out.iter().any(|term| term == implied) {
			out.push(implied.to_string());
		}
	}

	out
}

fn is_numeric_token(term: &str) -> bool {
	let digits = term.replace('-', "");

	!digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit())
}
