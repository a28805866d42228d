use std::{
	collections::HashMap,
	sync::{Mutex, PoisonError},
};

use crate::BoxFuture;

/// Query history keyed by session id. `get` and `put` are separate calls, so callers that
/// read, extend, and write back a history must serialise runs per session themselves.
pub trait SessionStore
where
	Self: Send + Sync,
{
	fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Vec<String>>;

	fn put<'a>(&'a self, session_id: &'a str, history: Vec<String>) -> BoxFuture<'a, ()>;
}

/// Process-local history. Lost on restart.
#[derive(Default)]
pub struct InMemorySessions {
	sessions: Mutex<HashMap<String, Vec<String>>>,
}

impl SessionStore for InMemorySessions {
	fn get<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Vec<String>> {
		let history = self
			.sessions
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(session_id)
			.cloned()
			.unwrap_or_default();

		Box::pin(async move { history })
	}

	fn put<'a>(&'a self, session_id: &'a str, history: Vec<String>) -> BoxFuture<'a, ()> {
		self.sessions
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(session_id.to_string(), history);

		Box::pin(async {})
	}
}
