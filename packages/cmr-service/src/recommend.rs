//! Ranked collection recommendations drawn from the analysis through a fixed fallback chain.

use serde::Serialize;

use cmr_providers::SimilarDoc;

use crate::analysis::AnalysisSummary;

pub const COMPARISON_CRITERIA: [&str; 4] =
	["resolution", "latency", "record_length", "validation_status"];

const LIMIT: usize = 5;
const QUERY_SCAN_LIMIT: usize = 5;
const EXAMPLES_PER_QUERY: usize = 3;
const RELATED_SCAN_LIMIT: usize = 10;
const PER_QUERY_RELATED_LIMIT: usize = 5;
const RELATIONSHIP_SCAN_LIMIT: usize = 5;
const SEMANTIC_MINIMUM: usize = 3;
const PRECIPITATION_SUGGESTIONS: [&str; 5] = ["GPM IMERG", "TRMM 3B42", "CHIRPS", "GPCC", "ERA5"];
const AEROSOL_SUGGESTIONS: [&str; 2] = ["MODIS Aerosol", "MERRA-2 Aerosol"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
	pub collection: String,
	pub rank: usize,
	pub why: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
	pub criteria: Vec<String>,
	pub ranked_recommendations: Vec<Recommendation>,
}

#[derive(Default)]
struct Ranked(Vec<Recommendation>);
impl Ranked {
	fn is_full(&self) -> bool {
		self.0.len() >= LIMIT
	}

	/// Appends unless full or a case-insensitive duplicate.
	fn offer(&mut self, collection: &str, why: &str) {
		let normalized = collection.trim().to_lowercase();

		if normalized.is_empty() || self.is_full() {
			return;
		}
		if self.0.iter().any(|existing| existing.collection.trim().to_lowercase() == normalized) {
			return;
		}

		self.0.push(Recommendation {
			collection: collection.to_string(),
			rank: self.0.len() + 1,
			why: why.to_string(),
		});
	}

	fn offer_all<'a>(&mut self, collections: impl IntoIterator<Item = &'a str>, why: &str) {
		for collection in collections {
			if self.is_full() {
				break;
			}

			self.offer(collection, why);
		}
	}
}

pub fn compare(query: &str, analysis: &AnalysisSummary, semantic: &[SimilarDoc]) -> Comparison {
	Comparison {
		criteria: COMPARISON_CRITERIA.iter().map(|criterion| criterion.to_string()).collect(),
		ranked_recommendations: rank(query, analysis, semantic),
	}
}

/// Up to five unique collections, each tagged with the rule that admitted it.
pub fn rank(query: &str, analysis: &AnalysisSummary, semantic: &[SimilarDoc]) -> Vec<Recommendation> {
	let queries = || analysis.queries.iter().take(QUERY_SCAN_LIMIT);
	let mut ranked = Ranked::default();

	ranked.offer_all(
		queries().flat_map(|entry| {
			entry.example_collections.iter().take(EXAMPLES_PER_QUERY).map(String::as_str)
		}),
		"coverage + relevance (example)",
	);
	ranked.offer_all(
		analysis
			.related_collections
			.iter()
			.take(RELATED_SCAN_LIMIT)
			.map(|related| related.concept_id.as_str()),
		"related collection (variables)",
	);
	ranked.offer_all(
		queries().flat_map(|entry| {
			entry.related_collections.iter().take(PER_QUERY_RELATED_LIMIT).map(String::as_str)
		}),
		"related collection (per-query)",
	);
	ranked.offer_all(
		analysis.dataset_relationships.iter().take(RELATIONSHIP_SCAN_LIMIT).flat_map(|relationship| {
			relationship.collections.iter().take(RELATIONSHIP_SCAN_LIMIT).map(String::as_str)
		}),
		"related via shared variable",
	);

	if ranked.0.len() < SEMANTIC_MINIMUM {
		ranked.offer_all(
			semantic.iter().take(SEMANTIC_MINIMUM).filter_map(|doc| doc.doc_title.as_deref()),
			"semantic context match",
		);
	}
	if ranked.0.is_empty() {
		ranked.offer_all(keyword_suggestions(query), "keyword-based suggestion");
	}
	if ranked.0.is_empty() {
		ranked.offer_all(
			queries().flat_map(|entry| entry.example_collections.iter().map(String::as_str)),
			"example collection (fallback)",
		);
	}

	ranked.0
}

fn keyword_suggestions(query: &str) -> Vec<&'static str> {
	let lowered = query.to_lowercase();
	let mut suggestions = Vec::new();

	if ["precipitation", "rain", "rainfall"].iter().any(|word| lowered.contains(word)) {
		suggestions.extend(PRECIPITATION_SUGGESTIONS);
	}
	if lowered.contains("aerosol") {
		suggestions.extend(AEROSOL_SUGGESTIONS);
	}

	suggestions
}
