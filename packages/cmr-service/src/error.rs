pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("No language-model provider is available.")]
	ProviderUnavailable,
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Invalid plan: {message}")]
	InvalidPlan { message: String },
	#[error("Search error: {message}")]
	Search { message: String },
}
impl From<cmr_providers::Error> for Error {
	fn from(err: cmr_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
