use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cmr_config::Config;
use cmr_service::{CmrService, FinalResponse};

pub const DEFAULT_QUERY: &str = "Find precipitation datasets for Sub-Saharan Africa 2015-2023";

#[derive(Debug, Parser)]
#[command(
	version = cmr_cli::VERSION,
	rename_all = "kebab",
	styles = cmr_cli::styles(),
)]
pub struct Args {
	/// Defaults apply when omitted.
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: Option<PathBuf>,
	/// Print each stage event as it arrives instead of the final response.
	#[arg(long, conflicts_with = "json")]
	pub stream: bool,
	/// Print a compact JSON summary.
	#[arg(long)]
	pub json: bool,
	#[arg(value_name = "QUERY", trailing_var_arg = true)]
	pub query: Vec<String>,
}
impl Args {
	pub fn query_text(&self) -> String {
		if self.query.is_empty() { DEFAULT_QUERY.to_string() } else { self.query.join(" ") }
	}
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = match &args.config {
		Some(path) => cmr_config::load(path)?,
		None => Config::default(),
	};

	init_tracing(&config);

	let query = args.query_text();
	let service = CmrService::new(config)?;

	if args.stream {
		let (tx, mut rx) = mpsc::unbounded_channel::<cmr_service::Event>();
		let print = async {
			while let Some(event) = rx.recv().await {
				print!("{}", event.to_record());
			}
		};

		tokio::join!(service.stream(&query, None, tx), print);

		return Ok(());
	}

	let response = service.query(&query, None).await?;

	if args.json {
		println!("{}", serde_json::to_string_pretty(&summarize(&response))?);
	} else {
		println!("{}", response.synthesis);
	}

	Ok(())
}

/// Intent, totals, and the first query's extent and coverage.
pub fn summarize(response: &FinalResponse) -> Value {
	let first = response.results.queries.first();

	serde_json::json!({
		"intent": response.intent,
		"total_collections": response.results.total_collections,
		"total_granules": response.results.total_granules,
		"bbox": first.and_then(|entry| entry.spatial_extent.bbox),
		"coverage": first.map(|entry| &entry.temporal_coverage),
	})
}

fn init_tracing(config: &Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
