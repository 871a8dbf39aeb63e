pub mod content_index;
pub mod db;
pub mod guardrails;
pub mod models;
pub mod qdrant;
pub mod rate_limits;
pub mod schema;
pub mod threads;
pub mod time_serde;
pub mod usage;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
