use time::OffsetDateTime;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{message}")]
	RateLimited { message: String, reset_at: OffsetDateTime },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Internal error: {message}")]
	Internal { message: String },
}
impl Error {
	pub fn code(&self) -> &'static str {
		match self {
			Self::RateLimited { .. } => "RATE_LIMITED",
			Self::NotFound { .. } => "NOT_FOUND",
			Self::InvalidRequest { .. } => "INVALID_REQUEST",
			Self::Provider { .. } => "UPSTREAM_ERROR",
			Self::Storage { .. } => "STORAGE_ERROR",
			Self::Internal { .. } => "INTERNAL_ERROR",
		}
	}

	/// Text safe to show a learner. Raw upstream and storage details stay in the logs unless
	/// `expose_details` is set.
	pub fn public_message(&self, expose_details: bool) -> String {
		match self {
			Self::RateLimited { message, .. } => message.clone(),
			Self::NotFound { .. } => "Conversation not found.".to_string(),
			Self::InvalidRequest { message } => message.clone(),
			_ if expose_details => self.to_string(),
			Self::Provider { .. } =>
				"The tutor is temporarily unavailable. Please try again in a moment.".to_string(),
			Self::Storage { .. } | Self::Internal { .. } =>
				"Something went wrong while processing your message. Please try again.".to_string(),
		}
	}

	pub(crate) fn not_found(message: impl Into<String>) -> Self {
		Self::NotFound { message: message.into() }
	}

	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into() }
	}
}
impl From<intelli_storage::Error> for Error {
	fn from(err: intelli_storage::Error) -> Self {
		match err {
			intelli_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			intelli_storage::Error::NotFound(message) => Self::NotFound { message },
			other => Self::Storage { message: other.to_string() },
		}
	}
}
impl From<intelli_providers::Error> for Error {
	fn from(err: intelli_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
impl From<intelli_chunking::Error> for Error {
	fn from(err: intelli_chunking::Error) -> Self {
		match err {
			intelli_chunking::Error::InvalidWindow { .. } =>
				Self::InvalidRequest { message: err.to_string() },
			other => Self::Internal { message: other.to_string() },
		}
	}
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}
