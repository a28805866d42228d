use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = cmr_query::Args::parse();
	cmr_query::run(args).await
}
