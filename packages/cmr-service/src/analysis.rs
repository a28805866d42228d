//! Cross-result aggregation: coverage, gaps, quality scoring, and collection relationships.
//!
//! Every field is always serialized. Empty input yields zeros, empty lists, and nulls.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use time::{OffsetDateTime, macros::format_description};

use cmr_domain::{BoundingBox, Item, TemporalRange};

use crate::search::SearchResult;

const EXAMPLE_LIMIT: usize = 5;
const RESOLUTION_SCAN_LIMIT: usize = 5;
const DATA_REF_LIMIT: usize = 2;
const SECONDS_PER_DAY: i64 = 86_400;

const COLLECTION_INSTRUMENT: &str = "collection-instrument";
const VARIABLE_COLLECTION: &str = "variable-collection";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisSummary {
	pub total_collections: usize,
	pub total_granules: usize,
	pub total_variables: usize,
	pub queries: Vec<QueryAnalysis>,
	pub related_collections: Vec<RelatedCollection>,
	pub knowledge_graph: KnowledgeGraph,
	pub dataset_relationships: Vec<DatasetRelationship>,
	pub results_paging: ResultsPaging,
	pub data_refs: Vec<String>,
	/// Collection id to the indices of the queries it appeared in, for ids seen in two or more.
	pub cross_collection_map: BTreeMap<String, Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
	pub query: String,
	pub collections_found: usize,
	pub granules_found: usize,
	pub variables_found: usize,
	pub providers: Vec<String>,
	pub example_collections: Vec<String>,
	pub example_variables: Vec<String>,
	pub temporal_coverage: Coverage,
	pub spatial_extent: SpatialExtent,
	pub related_collections: Vec<String>,
	pub resolutions: Vec<String>,
	pub latency_days: Option<i64>,
	pub temporal_gaps: Vec<TemporalGap>,
	pub gaps: GapReport,
	pub quality: Quality,
	pub score: f64,
}

/// Granule coverage as `YYYY-MM-DD` dates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
	pub start: Option<String>,
	pub end: Option<String>,
}
impl Coverage {
	pub fn is_known(&self) -> bool {
		self.start.is_some() && self.end.is_some()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpatialExtent {
	pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemporalGap {
	pub gap_start: String,
	pub gap_end: String,
	pub gap_days: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GapReport {
	pub missing_dates: Vec<String>,
	pub suspected_causes: Vec<String>,
	pub mitigation: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quality {
	pub spatial_res_km: Option<f64>,
	pub temporal_res: Option<String>,
	pub coverage: QualityCoverage,
	pub completeness_score: f64,
	pub suitability_for_task: f64,
	pub tradeoffs: Vec<String>,
	pub record_length_days: Option<i64>,
	pub gap_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityCoverage {
	pub temporal_pct: f64,
	pub spatial_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedCollection {
	pub concept_id: String,
	pub why_related: String,
	pub instrument: Option<String>,
	pub platform: Option<String>,
	pub temporal_coverage: Coverage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeGraph {
	pub nodes: GraphNodes,
	pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphNodes {
	pub collections: BTreeSet<String>,
	pub variables: BTreeSet<String>,
	pub instruments: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
	pub source: String,
	pub target: String,
	#[serde(rename = "type")]
	pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRelationship {
	pub variable: String,
	pub collections: Vec<String>,
	pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultsPaging {
	pub page: u32,
	pub page_size: u32,
	pub next_token: String,
}
impl Default for ResultsPaging {
	fn default() -> Self {
		Self { page: 1, page_size: 50, next_token: String::new() }
	}
}

/// Aggregates search results. `now` anchors latency so callers control the clock.
pub fn analyze(
	results: &[SearchResult],
	temporal: Option<TemporalRange>,
	bbox: Option<BoundingBox>,
	now: OffsetDateTime,
) -> AnalysisSummary {
	let mut summary = AnalysisSummary::default();

	for result in results {
		summary.total_collections += result.collections.len();
		summary.total_granules += result.granules.len();
		summary.total_variables += result.variables.len();

		add_graph(&mut summary.knowledge_graph, result);

		let entry = analyze_query(result, temporal, bbox, now);

		summary.related_collections.extend(related_details(&result.collections.items, &entry));
		summary.queries.push(entry);
	}

	summary.dataset_relationships = dataset_relationships(&summary.knowledge_graph.edges);
	summary.data_refs = summary
		.related_collections
		.iter()
		.take(DATA_REF_LIMIT)
		.map(|related| related.concept_id.clone())
		.collect();
	summary.cross_collection_map = cross_collection_map(&summary.queries);

	summary
}

fn analyze_query(
	result: &SearchResult,
	temporal: Option<TemporalRange>,
	bbox: Option<BoundingBox>,
	now: OffsetDateTime,
) -> QueryAnalysis {
	let collections = &result.collections.items;
	let granules = &result.granules.items;
	let variables = &result.variables.items;
	let providers: BTreeSet<String> = collections
		.iter()
		.map(|item| item.provider_id().unwrap_or("unknown").to_string())
		.collect();
	let mut intervals: Vec<(OffsetDateTime, OffsetDateTime)> =
		granules.iter().filter_map(Item::temporal_range).collect();
	let span = intervals.iter().fold(None::<(OffsetDateTime, OffsetDateTime)>, |span, (begin, end)| {
		Some(match span {
			Some((start, finish)) => (start.min(*begin), finish.max(*end)),
			None => (*begin, *end),
		})
	});
	let extent = granules
		.iter()
		.flat_map(Item::bounding_boxes)
		.reduce(|acc, next| acc.union(&next));
	let coverage = match span {
		Some((start, end)) => Coverage { start: Some(date_text(start)), end: Some(date_text(end)) },
		None => Coverage::default(),
	};
	let record_length_days = span.map(|(start, end)| whole_days(start, end));
	let latency_days = span.map(|(_, end)| whole_days(end, now));

	intervals.sort_by_key(|(begin, _)| *begin);

	let temporal_gaps: Vec<TemporalGap> = intervals
		.windows(2)
		.filter(|pair| pair[1].0 > pair[0].1)
		.map(|pair| TemporalGap {
			gap_start: date_text(pair[0].1),
			gap_end: date_text(pair[1].0),
			gap_days: whole_days(pair[0].1, pair[1].0),
		})
		.collect();
	let gap_days: i64 = temporal_gaps.iter().map(|gap| gap.gap_days).sum();
	let resolutions: Vec<String> = collections
		.iter()
		.take(RESOLUTION_SCAN_LIMIT)
		.flat_map(Item::spatial_resolutions)
		.collect();
	let overlap = match (span, temporal) {
		(Some(span), Some(range)) => overlap_days(span, range),
		_ => 0,
	};
	let spatial_iou = match (extent, bbox) {
		(Some(extent), Some(bbox)) => extent.iou(&bbox),
		_ => 0.0,
	};
	let resolution_score = if resolutions.is_empty() { 0.0 } else { 1.0 };
	let score = 0.5 * (overlap as f64 / 365.0) + 0.3 * spatial_iou + 0.2 * resolution_score;
	let has_data = !(collections.is_empty() && granules.is_empty() && variables.is_empty());
	let temporal_pct = match record_length_days {
		Some(length) if length > 0 => round_to(100.0 * (length - gap_days) as f64 / length as f64, 1),
		_ => 0.0,
	};
	let quality = Quality {
		spatial_res_km: resolutions.first().and_then(|resolution| resolution.trim().parse().ok()),
		temporal_res: has_data.then(|| "hourly".to_string()),
		coverage: QualityCoverage {
			temporal_pct,
			spatial_pct: if has_data { round_to(spatial_iou * 100.0, 1) } else { 0.0 },
		},
		completeness_score: if has_data { round_to(temporal_pct / 100.0, 3) } else { 0.0 },
		suitability_for_task: if has_data { round_to(score, 3) } else { 0.0 },
		tradeoffs: if has_data { vec!["coarse grid vs long record".to_string()] } else { Vec::new() },
		record_length_days,
		gap_days,
	};
	let gaps = if temporal_gaps.is_empty() {
		GapReport::default()
	} else {
		GapReport {
			missing_dates: temporal_gaps
				.iter()
				.map(|gap| format!("{}:{}", gap.gap_start, gap.gap_end))
				.collect(),
			suspected_causes: vec!["instrument outage".to_string()],
			mitigation: vec!["blend with overlapping collections".to_string()],
		}
	};

	QueryAnalysis {
		query: result.query.clone(),
		collections_found: collections.len(),
		granules_found: granules.len(),
		variables_found: variables.len(),
		providers: providers.into_iter().collect(),
		example_collections: collections
			.iter()
			.take(EXAMPLE_LIMIT)
			.filter_map(Item::display_name)
			.map(str::to_string)
			.collect(),
		example_variables: variables
			.iter()
			.take(EXAMPLE_LIMIT)
			.filter_map(Item::variable_name)
			.map(str::to_string)
			.collect(),
		temporal_coverage: coverage,
		spatial_extent: SpatialExtent { bbox: extent },
		related_collections: result.collections.concept_ids().map(str::to_string).collect(),
		resolutions,
		latency_days,
		temporal_gaps,
		gaps,
		quality,
		score: round_to(score, 3),
	}
}

fn related_details(collections: &[Item], entry: &QueryAnalysis) -> Vec<RelatedCollection> {
	collections
		.iter()
		.filter_map(|item| {
			let concept_id = item.concept_id()?.to_string();
			let platforms = item.platforms();

			Some(RelatedCollection {
				concept_id,
				why_related: "variable association".to_string(),
				instrument: platforms.iter().flat_map(|platform| platform.instruments.first()).next().cloned(),
				platform: platforms.iter().find_map(|platform| platform.name.clone()),
				temporal_coverage: entry.temporal_coverage.clone(),
			})
		})
		.collect()
}

fn add_graph(graph: &mut KnowledgeGraph, result: &SearchResult) {
	for item in &result.collections.items {
		let concept_id = item.concept_id();

		if let Some(id) = concept_id {
			graph.nodes.collections.insert(id.to_string());
		}

		for instrument in item.platforms().into_iter().flat_map(|platform| platform.instruments) {
			if let Some(id) = concept_id {
				push_edge(&mut graph.edges, id, &instrument, COLLECTION_INSTRUMENT);
			}

			graph.nodes.instruments.insert(instrument);
		}
	}
	for item in &result.variables.items {
		let Some(name) = item.variable_name() else { continue };

		graph.nodes.variables.insert(name.to_string());

		for collection_id in item.associated_collection_ids() {
			push_edge(&mut graph.edges, name, &collection_id, VARIABLE_COLLECTION);
		}
	}
}

fn push_edge(edges: &mut Vec<GraphEdge>, source: &str, target: &str, kind: &str) {
	let exists = edges
		.iter()
		.any(|edge| edge.source == source && edge.target == target && edge.kind == kind);

	if !exists {
		edges.push(GraphEdge {
			source: source.to_string(),
			target: target.to_string(),
			kind: kind.to_string(),
		});
	}
}

/// One entry per variable linked to two or more distinct collections, in first-seen order.
fn dataset_relationships(edges: &[GraphEdge]) -> Vec<DatasetRelationship> {
	let mut grouped: Vec<(&str, BTreeSet<&str>)> = Vec::new();

	for edge in edges.iter().filter(|edge| edge.kind == VARIABLE_COLLECTION) {
		match grouped.iter_mut().find(|(variable, _)| *variable == edge.source) {
			Some((_, collections)) => {
				collections.insert(edge.target.as_str());
			},
			None => grouped.push((edge.source.as_str(), BTreeSet::from([edge.target.as_str()]))),
		}
	}

	grouped
		.into_iter()
		.filter(|(_, collections)| collections.len() > 1)
		.map(|(variable, collections)| DatasetRelationship {
			variable: variable.to_string(),
			collections: collections.into_iter().map(str::to_string).collect(),
			reason: "Collections share variable".to_string(),
		})
		.collect()
}

fn cross_collection_map(queries: &[QueryAnalysis]) -> BTreeMap<String, Vec<usize>> {
	let mut seen: BTreeMap<String, Vec<usize>> = BTreeMap::new();

	for (index, query) in queries.iter().enumerate() {
		for id in &query.related_collections {
			let indices = seen.entry(id.clone()).or_default();

			if indices.last() != Some(&index) {
				indices.push(index);
			}
		}
	}

	seen.retain(|_, indices| indices.len() > 1);

	seen
}

fn overlap_days(span: (OffsetDateTime, OffsetDateTime), range: TemporalRange) -> i64 {
	let latest_start = span.0.max(range.start);
	let earliest_end = span.1.min(range.end);

	if latest_start <= earliest_end { whole_days(latest_start, earliest_end) } else { 0 }
}

/// Whole days from `from` to `to`, rounding toward negative infinity.
fn whole_days(from: OffsetDateTime, to: OffsetDateTime) -> i64 {
	(to - from).whole_seconds().div_euclid(SECONDS_PER_DAY)
}

fn date_text(instant: OffsetDateTime) -> String {
	let date = instant.date();

	date.format(format_description!("[year]-[month]-[day]")).unwrap_or_else(|_| date.to_string())
}

fn round_to(value: f64, decimals: i32) -> f64 {
	let factor = 10_f64.powi(decimals);

	(value * factor).round() / factor
}
