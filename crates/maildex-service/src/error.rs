pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Vector store error: {message}")]
	Vector { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<maildex_storage::Error> for Error {
	fn from(err: maildex_storage::Error) -> Self {
		match err {
			maildex_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			maildex_storage::Error::NotFound(message) => Self::NotFound { message },
			maildex_storage::Error::Qdrant(inner) => Self::Vector { message: inner.to_string() },
			other => Self::Storage { message: other.to_string() },
		}
	}
}
