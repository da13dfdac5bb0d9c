use std::{path::Path, str::FromStr, time::Duration};

use sqlx::{
	SqlitePool,
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};

use crate::{Result, schema};

#[derive(Clone)]
pub struct Db {
	pub pool: SqlitePool,
}
impl Db {
	pub async fn connect(cfg: &maildex_config::Sqlite) -> Result<Self> {
		Self::open(Path::new(&cfg.path), cfg.pool_max_conns).await
	}

	pub async fn open(path: &Path, pool_max_conns: u32) -> Result<Self> {
		if let Some(parent) = path.parent()
			&& !parent.as_os_str().is_empty()
		{
			std::fs::create_dir_all(parent)?;
		}

		let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
			.map_err(sqlx::Error::from)?
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.busy_timeout(Duration::from_secs(5))
			.foreign_keys(true);
		let pool = SqlitePoolOptions::new()
			.max_connections(pool_max_conns)
			.connect_with(options)
			.await?;

		Ok(Self { pool })
	}

	pub async fn ensure_schema(&self) -> Result<()> {
		sqlx::raw_sql(schema::SCHEMA_SQL).execute(&self.pool).await?;

		Ok(())
	}
}
