//! Defensive accessors over metadata-search JSON records.
//!
//! Every accessor returns `None` or an empty collection when a field is absent or malformed.
//! Nothing in this module fails on bad input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{
	Date, OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339,
	macros::format_description,
};

use crate::constraints::BoundingBox;

/// One search hit: provider metadata under `meta`, the domain payload under `umm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(pub Value);
impl Item {
	pub fn concept_id(&self) -> Option<&str> {
		self.0.get("meta")?.get("concept-id")?.as_str().filter(|id| !id.is_empty())
	}

	pub fn provider_id(&self) -> Option<&str> {
		self.0.get("meta")?.get("provider-id")?.as_str().filter(|id| !id.is_empty())
	}

	/// Collection short name, falling back to its long name.
	pub fn display_name(&self) -> Option<&str> {
		let umm = self.umm()?;

		non_empty_str(umm.get("ShortName")).or_else(|| non_empty_str(umm.get("LongName")))
	}

	pub fn variable_name(&self) -> Option<&str> {
		non_empty_str(self.umm()?.get("Name"))
	}

	/// Collection ids a variable record is associated with, in record order.
	pub fn associated_collection_ids(&self) -> Vec<String> {
		self.0
			.get("associations")
			.and_then(|associations| associations.get("collections"))
			.and_then(Value::as_array)
			.map(|collections| {
				collections
					.iter()
					.filter_map(|entry| {
						non_empty_str(entry.get("concept_id"))
							.or_else(|| non_empty_str(entry.get("concept-id")))
					})
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default()
	}

	/// `TemporalExtent.RangeDateTime` as an instant pair. Both ends must parse.
	pub fn temporal_range(&self) -> Option<(OffsetDateTime, OffsetDateTime)> {
		let range = self.umm()?.get("TemporalExtent")?.get("RangeDateTime")?;
		let begin = parse_instant(range.get("BeginningDateTime")?.as_str()?)?;
		let end = parse_instant(range.get("EndingDateTime")?.as_str()?)?;

		Some((begin, end))
	}

	/// Horizontal bounding boxes, whether declared as one object or a list. Boxes with any
	/// non-numeric coordinate are skipped.
	pub fn bounding_boxes(&self) -> Vec<BoundingBox> {
		let Some(geometry) = self
			.umm()
			.and_then(|umm| umm.get("SpatialExtent"))
			.and_then(|extent| extent.get("HorizontalSpatialDomain"))
			.and_then(|domain| domain.get("Geometry"))
		else {
			return Vec::new();
		};
		let boxes = geometry
			.get("BoundingBox")
			.filter(|value| is_present(value))
			.or_else(|| geometry.get("BoundingRectangles"));

		one_or_many(boxes)
			.into_iter()
			.filter_map(|value| {
				Some(BoundingBox::new(
					coordinate(value.get("WestBoundingCoordinate"))?,
					coordinate(value.get("SouthBoundingCoordinate"))?,
					coordinate(value.get("EastBoundingCoordinate"))?,
					coordinate(value.get("NorthBoundingCoordinate"))?,
				))
			})
			.collect()
	}

	/// Platforms with the names of their instruments.
	pub fn platforms(&self) -> Vec<Platform> {
		one_or_many(self.umm().and_then(|umm| umm.get("Platforms")))
			.into_iter()
			.map(|platform| Platform {
				name: named(platform).map(str::to_string),
				instruments: one_or_many(platform.get("Instruments"))
					.into_iter()
					.filter_map(named)
					.map(str::to_string)
					.collect(),
			})
			.collect()
	}

	/// First value of each `AdditionalAttributes` entry named `spatial resolution*`.
	pub fn spatial_resolutions(&self) -> Vec<String> {
		self.umm()
			.and_then(|umm| umm.get("AdditionalAttributes"))
			.and_then(Value::as_array)
			.map(|attributes| {
				attributes
					.iter()
					.filter(|attribute| {
						attribute
							.get("Name")
							.and_then(Value::as_str)
							.map(|name| name.to_lowercase().starts_with("spatial resolution"))
							.unwrap_or(false)
					})
					.filter_map(|attribute| {
						attribute.get("Values")?.as_array()?.first().map(|value| match value {
							Value::String(text) => text.clone(),
							other => other.to_string(),
						})
					})
					.collect()
			})
			.unwrap_or_default()
	}

	fn umm(&self) -> Option<&Value> {
		self.0.get("umm").filter(|umm| umm.is_object())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
	pub name: Option<String>,
	pub instruments: Vec<String>,
}

/// Items returned by one search, or the error that replaced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSet {
	pub items: Vec<Item>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}
impl ItemSet {
	pub fn new(items: Vec<Item>) -> Self {
		Self { items, error: None }
	}

	/// Reads the `items` array of a search response. A missing array means no items.
	pub fn from_response(body: &Value) -> Self {
		let items = body
			.get("items")
			.and_then(Value::as_array)
			.map(|items| items.iter().cloned().map(Item).collect())
			.unwrap_or_default();

		Self::new(items)
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self { items: Vec::new(), error: Some(message.into()) }
	}

	pub fn len(&self) -> usize {
		self.items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	pub fn concept_ids(&self) -> impl Iterator<Item = &str> {
		self.items.iter().filter_map(Item::concept_id)
	}
}

/// Concatenates item lists keeping the first item seen for each concept id. Items without an id
/// are dropped.
pub fn merge_unique<'a>(lists: impl IntoIterator<Item = &'a [Item]>) -> Vec<Item> {
	let mut seen = std::collections::HashSet::new();
	let mut merged = Vec::new();

	for list in lists {
		for item in list {
			if let Some(id) = item.concept_id()
				&& seen.insert(id.to_string())
			{
				merged.push(item.clone());
			}
		}
	}

	merged
}

/// Parses RFC 3339 timestamps, plus the offset-less and date-only forms some providers emit
/// (read as UTC).
pub fn parse_instant(raw: &str) -> Option<OffsetDateTime> {
	let raw = raw.trim();

	if raw.is_empty() {
		return None;
	}
	if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
		return Some(parsed);
	}
	if let Ok(parsed) = PrimitiveDateTime::parse(
		raw,
		format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
	) {
		return Some(parsed.assume_utc());
	}

	Date::parse(raw, format_description!("[year]-[month]-[day]"))
		.ok()
		.map(|date| date.midnight().assume_utc())
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
	value.and_then(Value::as_str).filter(|text| !text.is_empty())
}

fn named(value: &Value) -> Option<&str> {
	non_empty_str(value.get("ShortName")).or_else(|| non_empty_str(value.get("LongName")))
}

fn is_present(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Array(items) => !items.is_empty(),
		Value::Object(fields) => !fields.is_empty(),
		_ => true,
	}
}

fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
	match value {
		Some(Value::Array(items)) => items.iter().filter(|item| item.is_object()).collect(),
		Some(item) if item.is_object() => vec![item],
		_ => Vec::new(),
	}
}

fn coordinate(value: Option<&Value>) -> Option<f64> {
	let parsed = match value? {
		Value::Number(number) => number.as_f64(),
		Value::String(text) => text.trim().parse::<f64>().ok(),
		_ => None,
	};

	parsed.filter(|coordinate| coordinate.is_finite())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn granule(begin: &str, end: &str) -> Item {
		Item(json!({
			"meta": { "concept-id": "G1-PROV" },
			"umm": {
				"TemporalExtent": {
					"RangeDateTime": { "BeginningDateTime": begin, "EndingDateTime": end }
				}
			}
		}))
	}

	#[test]
	fn reads_identity_fields() {
		let item = Item(json!({
			"meta": { "concept-id": "C1-PROV", "provider-id": "PROV" },
			"umm": { "LongName": "Long name only" }
		}));

		assert_eq!(item.concept_id(), Some("C1-PROV"));
		assert_eq!(item.provider_id(), Some("PROV"));
		assert_eq!(item.display_name(), Some("Long name only"));
		assert_eq!(Item(json!({ "meta": null })).concept_id(), None);
	}

	#[test]
	fn parses_temporal_forms() {
		assert!(
			granule("2020-01-01T00:00:00Z", "2020-01-10T00:00:00.000Z").temporal_range().is_some()
		);
		assert!(granule("2020-01-01", "2020-01-10T12:00:00").temporal_range().is_some());
		assert!(granule("not a date", "2020-01-10").temporal_range().is_none());
	}

	#[test]
	fn reads_boxes_from_object_or_list() {
		let single = Item(json!({
			"umm": { "SpatialExtent": { "HorizontalSpatialDomain": { "Geometry": {
				"BoundingBox": {
					"WestBoundingCoordinate": -10, "SouthBoundingCoordinate": "-5",
					"EastBoundingCoordinate": 5.0, "NorthBoundingCoordinate": 10
				}
			}}}}
		}));
		let listed = Item(json!({
			"umm": { "SpatialExtent": { "HorizontalSpatialDomain": { "Geometry": {
				"BoundingRectangles": [
					{ "WestBoundingCoordinate": 1, "SouthBoundingCoordinate": 2,
					  "EastBoundingCoordinate": 3, "NorthBoundingCoordinate": 4 },
					{ "WestBoundingCoordinate": "x" }
				]
			}}}}
		}));

		assert_eq!(single.bounding_boxes(), vec![BoundingBox::new(-10.0, -5.0, 5.0, 10.0)]);
		assert_eq!(listed.bounding_boxes(), vec![BoundingBox::new(1.0, 2.0, 3.0, 4.0)]);
	}

	#[test]
	fn reads_platforms_and_associations() {
		let collection = Item(json!({
			"umm": {
				"Platforms": { "ShortName": "Terra", "Instruments": [{ "ShortName": "MODIS" }, {}] },
				"AdditionalAttributes": [
					{ "Name": "Spatial Resolution (km)", "Values": ["10"] },
					{ "Name": "Other", "Values": ["x"] }
				]
			}
		}));
		let variable = Item(json!({
			"associations": { "collections": [{ "concept_id": "C1" }, { "concept-id": "C2" }, {}] }
		}));

		assert_eq!(
			collection.platforms(),
			vec![Platform { name: Some("Terra".to_string()), instruments: vec!["MODIS".to_string()] }]
		);
		assert_eq!(collection.spatial_resolutions(), vec!["10".to_string()]);
		assert_eq!(variable.associated_collection_ids(), vec!["C1".to_string(), "C2".to_string()]);
	}

	#[test]
	fn merge_keeps_first_seen() {
		let a = Item(json!({ "meta": { "concept-id": "C1" }, "umm": { "ShortName": "first" } }));
		let b = Item(json!({ "meta": { "concept-id": "C1" }, "umm": { "ShortName": "second" } }));
		let c = Item(json!({ "meta": { "concept-id": "C2" } }));
		let anonymous = Item(json!({ "umm": {} }));
		let merged = merge_unique([&[a, anonymous][..], &[b, c][..]]);

		assert_eq!(merged.len(), 2);
		assert_eq!(merged[0].display_name(), Some("first"));
		assert_eq!(merged[1].concept_id(), Some("C2"));
	}

	#[test]
	fn response_without_items_is_empty() {
		assert!(ItemSet::from_response(&json!({ "hits": 0 })).is_empty());
		assert_eq!(ItemSet::from_response(&json!({ "items": [{}, {}] })).len(), 2);
	}
}
