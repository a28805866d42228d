use crate::{analysis::AnalysisSummary, router::ModelHandle};

const SYSTEM_PROMPT: &str = "You are an Earth science data expert. Given a user's query and analysis \
	metadata (counts, examples), write a concise, structured recommendation: 1) Summary \
	2) Datasets to consider 3) Gaps & trade-offs 4) Next steps.";
const SUMMARY_QUERY_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOutcome {
	pub text: String,
	/// False when the fixed-format report was used.
	pub used_model: bool,
}

pub struct Synthesizer {
	model: ModelHandle,
}
impl Synthesizer {
	pub fn new(model: ModelHandle) -> Self {
		Self { model }
	}

	pub async fn synthesize(
		&self,
		query: &str,
		analysis: &AnalysisSummary,
		history: &[String],
	) -> SynthesisOutcome {
		if !self.model.is_available() {
			return SynthesisOutcome { text: template(query, analysis, history), used_model: false };
		}

		let analysis_json = serde_json::to_string(analysis).unwrap_or_else(|_| "{}".to_string());
		let messages = [serde_json::json!({
			"role": "user",
			"content": format!("{SYSTEM_PROMPT}\nUser query: {query}\nAnalysis JSON: {analysis_json}"),
		})];

		match self.model.ask(&messages).await {
			Ok(text) => SynthesisOutcome { text, used_model: true },
			Err(err) => {
				tracing::warn!(error = %err, "Synthesis fell back to the fixed report.");

				SynthesisOutcome { text: template(query, analysis, history), used_model: false }
			},
		}
	}
}

/// Fixed-format report used whenever no language model answers.
pub fn template(query: &str, analysis: &AnalysisSummary, history: &[String]) -> String {
	let mut lines = vec![
		format!("Query: {query}"),
		format!("Total collections: {}", analysis.total_collections),
		format!("Total granules: {}", analysis.total_granules),
		format!("Total variables: {}", analysis.total_variables),
	];

	for entry in analysis.queries.iter().take(SUMMARY_QUERY_LIMIT) {
		let mut line = format!(
			"- '{}' -> collections={}, granules={}, providers={}",
			entry.query,
			entry.collections_found,
			entry.granules_found,
			entry.providers.join(","),
		);

		if let (Some(start), Some(end)) =
			(entry.temporal_coverage.start.as_deref(), entry.temporal_coverage.end.as_deref())
		{
			line.push_str(&format!(", coverage={start} to {end}"));
		}

		lines.push(line);
	}

	lines.push(format!("Session memory: {} previous queries", history.len().saturating_sub(1)));
	lines.push(
		"Recommendations: refine temporal/spatial filters and select collections with consistent \
		 coverage."
			.to_string(),
	);

	lines.join("\n")
}
