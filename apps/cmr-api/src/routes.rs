use std::convert::Infallible;

use axum::{
	Json, Router,
	extract::{Query, State},
	http::StatusCode,
	response::{
		IntoResponse, Response,
		sse::{Event as SseEvent, KeepAlive, Sse},
	},
	routing::get,
};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::AppState;
use cmr_service::{Error as ServiceError, Event, FinalResponse};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
	query: Option<String>,
	session_id: Option<String>,
}
impl QueryParams {
	fn into_parts(self) -> Result<(String, Option<String>), ApiError> {
		match self.query.filter(|query| !query.trim().is_empty()) {
			Some(query) => Ok((query, self.session_id)),
			None => Err(json_error(
				StatusCode::BAD_REQUEST,
				"invalid_request",
				"The query parameter is required.",
			)),
		}
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/query", get(query))
		.route("/stream", get(stream_query))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn query(
	State(state): State<AppState>,
	Query(params): Query<QueryParams>,
) -> Result<Json<FinalResponse>, ApiError> {
	let (query, session_id) = params.into_parts()?;
	let response = state.service.query(&query, session_id.as_deref()).await?;

	Ok(Json(response))
}

/// Runs the pipeline in the background and relays its events as server-sent events.
async fn stream_query(
	State(state): State<AppState>,
	Query(params): Query<QueryParams>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
	let (query, session_id) = params.into_parts()?;
	let (tx, rx) = mpsc::unbounded_channel();
	let service = state.service.clone();

	tokio::spawn(async move {
		service.stream(&query, session_id.as_deref(), tx).await;
	});

	let events = stream::unfold(rx, |mut rx| async move {
		rx.recv().await.map(|event| (Ok(sse_event(&event)), rx))
	});

	Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &Event) -> SseEvent {
	SseEvent::default().event(event.kind.as_str()).data(event.data.to_string())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::ProviderUnavailable | ServiceError::Provider { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "provider_unavailable", err.to_string()),
			ServiceError::InvalidPlan { .. } =>
				json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_plan", err.to_string()),
			ServiceError::Search { .. } =>
				json_error(StatusCode::BAD_GATEWAY, "search_failed", err.to_string()),
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}

pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
	ApiError::new(status, code, message)
}
