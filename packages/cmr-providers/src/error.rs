pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),
	#[error(transparent)]
	InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
	#[error("{message}")]
	InvalidConfig { message: String },
	#[error("Metadata search circuit is open; temporarily rejecting requests.")]
	CircuitOpen,
	#[error("Metadata search {endpoint} returned HTTP {status}.")]
	Status { endpoint: &'static str, status: u16 },
	#[error("Metadata search failed after {attempts} attempts: {last}")]
	RetryExhausted { attempts: u32, last: Box<Error> },
	#[error("{message}")]
	InvalidResponse { message: String },
}
impl Error {
	/// True when the failure was, or ended with, the circuit breaker rejecting the call.
	pub fn is_circuit_open(&self) -> bool {
		match self {
			Self::CircuitOpen => true,
			Self::RetryExhausted { last, .. } => last.is_circuit_open(),
			_ => false,
		}
	}
}
