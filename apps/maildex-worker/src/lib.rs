pub mod consumer;

// std
use std::{path::PathBuf, sync::Arc};

// crates.io
use clap::Parser;
use tracing_subscriber::EnvFilter;

// self
use maildex_service::MaildexService;
use maildex_storage::{blob::BlobStore, db::Db, vector::QdrantIndex};

#[derive(Debug, Parser)]
#[command(version, about = "Maildex ingestion and indexing worker")]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = maildex_config::load(&args.config)?;
	let filter = EnvFilter::new(config.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let db = Db::connect(&config.storage.sqlite).await?;

	db.ensure_schema().await?;

	let blobs = BlobStore::from_config(&config.storage.blobs);
	let qdrant = QdrantIndex::new(&config.storage.qdrant)?;

	qdrant.ensure_collection().await?;

	let service = MaildexService::new(config, db, blobs, Arc::new(qdrant));

	consumer::run_consumer(service).await
}
