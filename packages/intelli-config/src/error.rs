pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read config file at {path:?}.")]
	Read { path: std::path::PathBuf, source: std::io::Error },
	#[error("Config file at {path:?} is not valid TOML for this service.")]
	Parse { path: std::path::PathBuf, source: toml::de::Error },
	#[error("Invalid config: {message}")]
	Validation { message: String },
}
