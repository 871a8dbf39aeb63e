use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = intelli_api::Args::parse();

	intelli_api::run(args).await
}
