//! Local HTTP doubles for the metadata search API and chat-completion providers.

mod error;

pub use error::{Error, Result};

use std::{
	net::SocketAddr,
	sync::{Arc, Mutex},
};

use axum::{
	Json, Router,
	extract::{Query, State},
	http::{StatusCode, Uri},
	response::{IntoResponse, Response},
};
use serde_json::Value;
use tokio::{net::TcpListener, task::JoinHandle};

/// One request received by a [`MockServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
	pub path: String,
	pub query: Vec<(String, String)>,
	pub body: String,
}
impl Hit {
	pub fn param(&self, key: &str) -> Option<&str> {
		self.query.iter().find(|(existing, _)| existing == key).map(|(_, value)| value.as_str())
	}

	pub fn params(&self, key: &str) -> Vec<&str> {
		self.query
			.iter()
			.filter(|(existing, _)| existing == key)
			.map(|(_, value)| value.as_str())
			.collect()
	}

	pub fn json_body(&self) -> Option<Value> {
		serde_json::from_str(&self.body).ok()
	}
}

type Responder = Arc<dyn Fn(&Hit) -> (u16, Value) + Send + Sync>;

#[derive(Clone)]
struct MockState {
	responder: Responder,
	hits: Arc<Mutex<Vec<Hit>>>,
}

/// An axum server on an ephemeral port that records every request and answers with a scripted
/// status and JSON body. The server stops when dropped.
pub struct MockServer {
	addr: SocketAddr,
	hits: Arc<Mutex<Vec<Hit>>>,
	handle: JoinHandle<()>,
}
impl MockServer {
	pub async fn start<F>(responder: F) -> Result<Self>
	where
		F: Fn(&Hit) -> (u16, Value) + Send + Sync + 'static,
	{
		let hits = Arc::new(Mutex::new(Vec::new()));
		let state = MockState { responder: Arc::new(responder), hits: hits.clone() };
		let app = Router::new().fallback(record).with_state(state);
		let listener = TcpListener::bind("127.0.0.1:0").await?;
		let addr = listener.local_addr()?;
		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(listener, app).await {
				eprintln!("Mock server stopped: {err}.");
			}
		});

		Ok(Self { addr, hits, handle })
	}

	pub fn base_url(&self) -> String {
		format!("http://{}", self.addr)
	}

	pub fn hits(&self) -> Vec<Hit> {
		self.hits.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	/// Number of requests whose path contains `fragment`.
	pub fn count(&self, fragment: &str) -> usize {
		self.hits().iter().filter(|hit| hit.path.contains(fragment)).count()
	}
}
impl Drop for MockServer {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

async fn record(
	State(state): State<MockState>,
	uri: Uri,
	Query(query): Query<Vec<(String, String)>>,
	body: String,
) -> Response {
	let hit = Hit { path: uri.path().to_string(), query, body };
	let (status, payload) = (state.responder)(&hit);

	state.hits.lock().unwrap_or_else(|err| err.into_inner()).push(hit);

	let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

	(status, Json(payload)).into_response()
}

/// `{ "items": [...] }` as the metadata search API returns it.
pub fn items(items: Vec<Value>) -> Value {
	serde_json::json!({ "hits": items.len(), "items": items })
}

pub fn collection(concept_id: &str, short_name: &str, provider_id: &str) -> Value {
	serde_json::json!({
		"meta": { "concept-id": concept_id, "provider-id": provider_id },
		"umm": {
			"ShortName": short_name,
			"Platforms": [{ "ShortName": "GPM", "Instruments": [{ "ShortName": "GMI" }] }]
		}
	})
}

pub fn granule(concept_id: &str, begin: &str, end: &str, bbox: [f64; 4]) -> Value {
	let [west, south, east, north] = bbox;

	serde_json::json!({
		"meta": { "concept-id": concept_id },
		"umm": {
			"TemporalExtent": {
				"RangeDateTime": { "BeginningDateTime": begin, "EndingDateTime": end }
			},
			"SpatialExtent": { "HorizontalSpatialDomain": { "Geometry": {
				"BoundingRectangles": [{
					"WestBoundingCoordinate": west,
					"SouthBoundingCoordinate": south,
					"EastBoundingCoordinate": east,
					"NorthBoundingCoordinate": north
				}]
			}}}
		}
	})
}

pub fn variable(concept_id: &str, name: &str, collection_ids: &[&str]) -> Value {
	let collections: Vec<Value> =
		collection_ids.iter().map(|id| serde_json::json!({ "concept_id": id })).collect();

	serde_json::json!({
		"meta": { "concept-id": concept_id },
		"umm": { "Name": name },
		"associations": { "collections": collections }
	})
}

/// A chat-completion response whose first choice carries `content`.
pub fn chat_reply(content: &str) -> Value {
	serde_json::json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] })
}
