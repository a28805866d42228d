//! Incremental progress events for streaming surfaces.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

pub type EventSink = UnboundedSender<Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
	Update,
	Error,
	End,
}
impl EventKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Update => "update",
			Self::Error => "error",
			Self::End => "end",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
	pub kind: EventKind,
	pub data: Value,
}
impl Event {
	pub fn update(data: Value) -> Self {
		Self { kind: EventKind::Update, data }
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self { kind: EventKind::Error, data: serde_json::json!({ "error": message.into() }) }
	}

	pub fn end() -> Self {
		Self { kind: EventKind::End, data: Value::Object(Default::default()) }
	}

	/// The `event:`/`data:` text record for this event, terminated by a blank line.
	pub fn to_record(&self) -> String {
		format!("event: {}\ndata: {}\n\n", self.kind.as_str(), self.data)
	}
}

/// Sends `event` if a sink is attached. A closed receiver is ignored.
pub(crate) fn emit(sink: Option<&EventSink>, event: Event) {
	if let Some(sink) = sink
		&& sink.send(event).is_err()
	{
		tracing::debug!("Event receiver dropped; continuing without streaming.");
	}
}
