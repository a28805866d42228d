use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = cmr_api::Args::parse();
	cmr_api::run(args).await
}
