pub mod error;
pub mod worker;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use uuid::Uuid;

use intelli_cli::ConfigArgs;
use intelli_config::Config;
use intelli_service::{Stores, TutorService};

pub use error::{Error, Result};

#[derive(Debug, Parser)]
#[command(
	version = intelli_cli::VERSION,
	rename_all = "kebab",
	styles = intelli_cli::styles(),
)]
pub struct Args {
	#[command(flatten)]
	pub config: ConfigArgs,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Deletes expired conversation threads on a fixed interval.
	Run,
	/// Chunks, embeds and indexes one curriculum document.
	Ingest(IngestArgs),
	/// Drops a document from the vector index.
	Remove {
		#[arg(long)]
		content_id: Uuid,
	},
}

#[derive(Debug, clap::Args)]
pub struct IngestArgs {
	/// Plain text or markdown file holding the document body.
	#[arg(long, value_name = "FILE")]
	pub file: PathBuf,
	#[arg(long)]
	pub content_id: Uuid,
	#[arg(long)]
	pub stage_id: i32,
	/// Defaults to `Stage <stage_id>`.
	#[arg(long)]
	pub stage_name: Option<String>,
	/// Defaults to the file stem.
	#[arg(long)]
	pub title: Option<String>,
	/// JSON object stored with every chunk.
	#[arg(long)]
	pub metadata: Option<String>,
	#[arg(long)]
	pub force_reindex: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = intelli_config::load(&args.config.config)?;

	intelli_cli::init_tracing(&config.service.log_level);

	match args.command {
		Command::Run => {
			let service = connect(config, false).await?;

			worker::run_cleanup_loop(&service).await
		},
		Command::Ingest(ingest) => {
			let source = worker::load_source(&ingest)?;
			let service = connect(config, true).await?;
			let report = service.ingest(&source, ingest.force_reindex).await?;

			println!("{}", serde_json::to_string_pretty(&report)?);

			Ok(())
		},
		Command::Remove { content_id } => {
			let service = connect(config, false).await?;
			let removed = service.remove_content(content_id).await?;

			tracing::info!(%content_id, removed, "Remove finished.");

			Ok(())
		},
	}
}

/// Only ingestion needs the tokenizer, which may be fetched from the hub on first use.
async fn connect(config: Config, with_tokenizer: bool) -> color_eyre::Result<TutorService> {
	let stores = Stores::connect(&config).await?;
	let tokenizer: Arc<dyn intelli_chunking::TokenCodec + Send + Sync> = if with_tokenizer {
		let repo = config
			.chunking
			.tokenizer_repo
			.clone()
			.unwrap_or_else(|| config.providers.embedding.model.clone());

		Arc::new(intelli_chunking::load_tokenizer(&repo)?)
	} else {
		Arc::new(worker::NoTokenizer)
	};

	Ok(TutorService::new(config, stores, tokenizer))
}
