mod error;
mod observation_repo;
mod site_repo;

pub use error::StoreError;
pub use observation_repo::ObservationRepository;
pub use site_repo::SiteRepository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

use crate::models::{Observation, Site, SyncStatus};

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::CreateDir(parent.to_path_buf(), e))?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// The replica's local store: both collections over one pool.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(init_db(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn sites(&self) -> SiteRepository {
        SiteRepository::new(self.pool.clone())
    }

    pub fn observations(&self) -> ObservationRepository {
        ObservationRepository::new(self.pool.clone())
    }

    /// Starts a transaction spanning both collections.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Marks the given records as synced, all or nothing. A row whose
    /// content changed after it was read stays pending. Returns how many
    /// (sites, observations) were flipped.
    pub async fn acknowledge(
        &self,
        sites: &[Site],
        observations: &[Observation],
    ) -> Result<(usize, usize), StoreError> {
        let mut tx = self.begin().await?;
        let mut acked_sites = 0;
        for site in sites {
            if SiteRepository::acknowledge_in(&mut tx, site).await? {
                acked_sites += 1;
            }
        }
        let mut acked_observations = 0;
        for observation in observations {
            if ObservationRepository::acknowledge_in(&mut tx, observation).await? {
                acked_observations += 1;
            }
        }
        tx.commit().await?;
        Ok((acked_sites, acked_observations))
    }

    /// Number of (sites, observations) still waiting for the authority.
    pub async fn pending_counts(&self) -> Result<(i64, i64), StoreError> {
        let sites = self.sites().count_by_status(SyncStatus::Pending).await?;
        let observations = self
            .observations()
            .count_by_status(SyncStatus::Pending)
            .await?;
        Ok((sites, observations))
    }
}
