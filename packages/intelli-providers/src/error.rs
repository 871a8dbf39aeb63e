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
	#[error("{message}")]
	InvalidResponse { message: String },
	#[error("Provider {provider_id} returned {status}: {body}")]
	Status { provider_id: String, status: u16, body: String },
	#[error("No streamed token from {provider_id} within {timeout_ms} ms.")]
	TokenTimeout { provider_id: String, timeout_ms: u64 },
}
impl Error {
	/// Timeouts and connection failures are worth one more attempt; everything else is not.
	pub fn is_transient(&self) -> bool {
		match self {
			Self::Reqwest(err) => err.is_timeout() || err.is_connect(),
			Self::TokenTimeout { .. } => true,
			_ => false,
		}
	}

	pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
		Self::InvalidResponse { message: message.into() }
	}
}
