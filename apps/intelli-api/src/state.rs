use std::sync::Arc;

use intelli_config::Config;
use intelli_service::{Stores, TutorService};

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<TutorService>,
}
impl AppState {
	pub async fn new(config: Config) -> color_eyre::Result<Self> {
		let stores = Stores::connect(&config).await?;
		let repo = config
			.chunking
			.tokenizer_repo
			.clone()
			.unwrap_or_else(|| config.providers.embedding.model.clone());
		let tokenizer = intelli_chunking::load_tokenizer(&repo)?;
		let service = TutorService::new(config, stores, Arc::new(tokenizer));

		Ok(Self::from_service(Arc::new(service)))
	}

	pub fn from_service(service: Arc<TutorService>) -> Self {
		Self { service }
	}
}
