pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Tokenizer could not be loaded from {repo}: {message}")]
	Load { repo: String, message: String },
	#[error("Tokenizer failed to {operation}: {message}")]
	Codec { operation: &'static str, message: String },
	#[error("Chunk overlap ({overlap_tokens}) must be smaller than the chunk size ({max_tokens}).")]
	InvalidWindow { max_tokens: u32, overlap_tokens: u32 },
}
