use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = intelli_worker::Args::parse();

	intelli_worker::run(args).await
}
