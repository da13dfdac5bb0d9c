use clap::Parser;

use maildex_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	let args = Args::parse();

	maildex_worker::run(args).await
}
