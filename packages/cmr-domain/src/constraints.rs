//! Temporal and spatial constraints inferred from free text.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

static YEAR: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?:19|20)\d{2}").expect("Year pattern must compile."));
static REGION_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)\b(?:over|in) ([^,;]+)").expect("Region phrase pattern must compile.")
});

const SUB_SAHARAN_AFRICA: BoundingBox = BoundingBox::new(-20.0, -35.0, 52.0, 20.0);
const GLOBAL: BoundingBox = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);

/// Named regions recognized in queries, matched as lowercase substrings in this order.
pub const REGIONS: [(&str, BoundingBox); 5] = [
	("sub-saharan africa", SUB_SAHARAN_AFRICA),
	("subsaharan africa", SUB_SAHARAN_AFRICA),
	("sub saharan africa", SUB_SAHARAN_AFRICA),
	("ssa", SUB_SAHARAN_AFRICA),
	("global", GLOBAL),
];

/// Axis-aligned box in degrees, serialized as `[west, south, east, north]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
	pub west: f64,
	pub south: f64,
	pub east: f64,
	pub north: f64,
}
impl BoundingBox {
	pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
		Self { west, south, east, north }
	}

	pub fn area(&self) -> f64 {
		(self.east - self.west).max(0.0) * (self.north - self.south).max(0.0)
	}

	/// Smallest box covering both boxes.
	pub fn union(&self, other: &Self) -> Self {
		Self {
			west: self.west.min(other.west),
			south: self.south.min(other.south),
			east: self.east.max(other.east),
			north: self.north.max(other.north),
		}
	}

	pub fn intersection_area(&self, other: &Self) -> f64 {
		let west = self.west.max(other.west);
		let south = self.south.max(other.south);
		let east = self.east.min(other.east);
		let north = self.north.min(other.north);

		(east - west).max(0.0) * (north - south).max(0.0)
	}

	/// Intersection over union in `[0, 1]`. A degenerate union counts as 1.
	pub fn iou(&self, other: &Self) -> f64 {
		let intersection = self.intersection_area(other);
		let union = self.area() + other.area() - intersection;
		let union = if union > 0.0 { union } else { 1.0 };

		intersection / union
	}

	/// Formats the box as the `bounding_box` search parameter.
	pub fn to_param(&self) -> String {
		format!("{},{},{},{}", self.west, self.south, self.east, self.north)
	}
}
impl From<[f64; 4]> for BoundingBox {
	fn from([west, south, east, north]: [f64; 4]) -> Self {
		Self { west, south, east, north }
	}
}
impl From<BoundingBox> for [f64; 4] {
	fn from(bbox: BoundingBox) -> Self {
		[bbox.west, bbox.south, bbox.east, bbox.north]
	}
}

/// Closed UTC interval covering whole calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalRange {
	#[serde(with = "instant")]
	pub start: OffsetDateTime,
	#[serde(with = "instant")]
	pub end: OffsetDateTime,
}
impl TemporalRange {
	/// Formats the range as the `temporal` search parameter.
	pub fn to_param(&self) -> String {
		format!("{},{}", instant::format(self.start), instant::format(self.end))
	}

	pub fn start_text(&self) -> String {
		instant::format(self.start)
	}

	pub fn end_text(&self) -> String {
		instant::format(self.end)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeConstraint {
	pub start: Option<String>,
	pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConstraint {
	pub name: Option<String>,
	pub bbox: Option<BoundingBox>,
	pub crs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumption {
	pub assumption: String,
	pub confidence: f64,
}

/// Everything the query text says about time, place, and candidate variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredConstraints {
	pub time: TimeConstraint,
	pub region: RegionConstraint,
	pub variables: Vec<String>,
	#[serde(skip)]
	pub temporal: Option<TemporalRange>,
	#[serde(skip)]
	pub assumptions: Vec<Assumption>,
}

/// Returns the span from January 1 of the earliest year to December 31 of the latest year
/// mentioned, or `None` when fewer than two distinct years appear.
pub fn infer_temporal(text: &str) -> Option<TemporalRange> {
	let mut years: Vec<i32> =
		YEAR.find_iter(text).filter_map(|found| found.as_str().parse().ok()).collect();

	years.sort_unstable();
	years.dedup();

	let (first, last) = match years.as_slice() {
		[first, .., last] => (*first, *last),
		_ => return None,
	};
	let start = Date::from_calendar_date(first, Month::January, 1).ok()?.midnight().assume_utc();
	let end = Date::from_calendar_date(last, Month::December, 31)
		.ok()?
		.with_hms(23, 59, 59)
		.ok()?
		.assume_utc();

	Some(TemporalRange { start, end })
}

/// First gazetteer region mentioned in `text`, case-insensitively.
pub fn infer_bbox(text: &str) -> Option<BoundingBox> {
	let lowered = text.to_lowercase();

	REGIONS.iter().find(|(name, _)| lowered.contains(name)).map(|(_, bbox)| *bbox)
}

pub fn mentions_region(text: &str) -> bool {
	infer_bbox(text).is_some()
}

pub fn region_names() -> Vec<String> {
	REGIONS.iter().map(|(name, _)| name.to_string()).collect()
}

/// Text following "over" or "in", up to the next comma or semicolon.
pub fn infer_region_name(text: &str) -> Option<String> {
	REGION_PHRASE
		.captures(text)
		.and_then(|captures| captures.get(1))
		.map(|phrase| phrase.as_str().trim().to_string())
		.filter(|phrase| !phrase.is_empty())
}

pub fn infer_constraints(text: &str) -> InferredConstraints {
	let temporal = infer_temporal(text);
	let bbox = infer_bbox(text);
	let mut assumptions = Vec::new();

	if temporal.is_none() {
		assumptions.push(Assumption {
			assumption: "temporal range unspecified".to_string(),
			confidence: 0.2,
		});
	}
	if bbox.is_none() {
		assumptions
			.push(Assumption { assumption: "region unspecified".to_string(), confidence: 0.2 });
	}

	InferredConstraints {
		time: TimeConstraint {
			start: temporal.map(|range| range.start_text()),
			end: temporal.map(|range| range.end_text()),
		},
		region: RegionConstraint {
			name: infer_region_name(text),
			bbox,
			crs: "EPSG:4326".to_string(),
		},
		variables: text
			.split_whitespace()
			.filter(|word| word.chars().count() > 3)
			.map(str::to_string)
			.collect(),
		temporal,
		assumptions,
	}
}

pub mod instant {
	use serde::{Deserialize, Deserializer, Serializer};
	use time::{
		OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description,
	};

	pub fn format(value: OffsetDateTime) -> String {
		value
			.format(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"))
			.unwrap_or_default()
	}

	pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&format(*value))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		OffsetDateTime::parse(&raw, &Rfc3339).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn infers_year_span() {
		let range = infer_temporal("rainfall 2010-2012 over sub-saharan africa")
			.expect("Expected a temporal range.");

		assert_eq!(range.start_text(), "2010-01-01T00:00:00Z");
		assert_eq!(range.end_text(), "2012-12-31T23:59:59Z");
		assert_eq!(range.to_param(), "2010-01-01T00:00:00Z,2012-12-31T23:59:59Z");
	}

	#[test]
	fn orders_years_regardless_of_position() {
		let range = infer_temporal("from 2020 back to 1998").expect("Expected a temporal range.");

		assert_eq!(range.start_text(), "1998-01-01T00:00:00Z");
		assert_eq!(range.end_text(), "2020-12-31T23:59:59Z");
	}

	#[test]
	fn needs_two_distinct_years() {
		assert!(infer_temporal("precipitation in 2015").is_none());
		assert!(infer_temporal("2015 and again 2015").is_none());
		assert!(infer_temporal("no years here").is_none());
		assert!(infer_temporal("1850 to 2150").is_none());
	}

	#[test]
	fn matches_regions_case_insensitively() {
		assert_eq!(
			infer_bbox("Datasets for Sub-Saharan Africa"),
			Some(BoundingBox::new(-20.0, -35.0, 52.0, 20.0))
		);
		assert_eq!(infer_bbox("GLOBAL sea ice"), Some(BoundingBox::new(-180.0, -90.0, 180.0, 90.0)));
		assert_eq!(infer_bbox("rain over europe"), None);
	}

	#[test]
	fn computes_intersection_over_union() {
		let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
		let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);

		assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-9);
		assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);

		let point = BoundingBox::new(1.0, 1.0, 1.0, 1.0);

		assert_eq!(point.iou(&point), 0.0);
	}

	#[test]
	fn serializes_bbox_as_array() {
		let value = serde_json::to_value(BoundingBox::new(-15.0, -5.0, 10.0, 12.0))
			.expect("Failed to serialize bbox.");

		assert_eq!(value, serde_json::json!([-15.0, -5.0, 10.0, 12.0]));
	}

	#[test]
	fn extracts_region_phrase_and_assumptions() {
		let inferred = infer_constraints("Find rainfall over West Africa, 2001 to 2005");

		assert_eq!(inferred.region.name.as_deref(), Some("West Africa"));
		assert!(inferred.temporal.is_some());
		assert_eq!(inferred.assumptions.len(), 1);
		assert_eq!(inferred.assumptions[0].assumption, "region unspecified");
		assert!(inferred.variables.contains(&"rainfall".to_string()));
	}
}
