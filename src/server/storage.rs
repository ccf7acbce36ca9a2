//! Authority-side storage.
//!
//! Holds the long-term copy of every tree and collection in a relational
//! table pair:
//!
//! ```text
//! trees        (id, tree_id UNIQUE, lat, lng, note, created_at)
//! collections  (id, tree_id, cuts, milk_amount, note, timestamp, created_at)
//! ```
//!
//! Tables are created on first use in each process. Trees are upserted by
//! `tree_id` (last writer wins on lat/lng/note); collections are always
//! appended, duplicates included.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::models::{timestamp, validate_coordinates};
use crate::protocol::{CollectionRecord, RemoteTree, Snapshot, SyncBatch, TreeRecord};

const CREATE_TREES: &str = r#"
    CREATE TABLE IF NOT EXISTS trees (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tree_id TEXT NOT NULL UNIQUE,
        lat REAL NOT NULL,
        lng REAL NOT NULL,
        note TEXT,
        created_at TEXT NOT NULL
    )
"#;

const CREATE_COLLECTIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS collections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tree_id TEXT NOT NULL,
        cuts INTEGER NOT NULL,
        milk_amount REAL NOT NULL,
        note TEXT,
        timestamp TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
"#;

const CREATE_COLLECTIONS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_collections_tree_id ON collections(tree_id)";

/// Errors that can occur during authority storage operations.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid record in batch: {0}")]
    InvalidRecord(String),

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow {
        table: &'static str,
        message: String,
    },
}

/// Counts of what one ingest applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub trees_upserted: usize,
    pub collections_inserted: usize,
}

#[derive(sqlx::FromRow)]
struct TreeRow {
    tree_id: String,
    lat: f64,
    lng: f64,
    note: Option<String>,
    created_at: String,
}

#[derive(sqlx::FromRow)]
struct CollectionRow {
    id: i64,
    tree_id: String,
    cuts: i64,
    milk_amount: f64,
    note: Option<String>,
    timestamp: String,
}

/// The authority's relational store.
#[derive(Debug)]
pub struct AuthorityStore {
    pool: SqlitePool,
    schema: OnceCell<()>,
}

impl AuthorityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            schema: OnceCell::new(),
        }
    }

    /// Opens (creating if missing) the database file. Tables are provisioned
    /// lazily by the first read or write.
    pub async fn connect(path: &Path) -> Result<Self, AuthorityError> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<(), AuthorityError> {
        self.schema
            .get_or_try_init(|| async {
                let mut tx = self.pool.begin().await?;
                for ddl in [CREATE_TREES, CREATE_COLLECTIONS, CREATE_COLLECTIONS_INDEX] {
                    sqlx::query(ddl).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                tracing::debug!("Authority tables ready");
                Ok::<(), AuthorityError>(())
            })
            .await?;
        Ok(())
    }

    /// Applies a pushed batch inside one transaction: trees upserted by
    /// `tree_id`, collections appended.
    pub async fn ingest(&self, batch: &SyncBatch) -> Result<IngestSummary, AuthorityError> {
        validate_batch(batch)?;
        self.ensure_schema().await?;

        let received_at = timestamp::format(&timestamp::now());
        let mut tx = self.pool.begin().await?;

        for tree in &batch.trees {
            upsert_tree(&mut tx, tree, &received_at).await?;
        }
        for collection in &batch.collections {
            insert_collection(&mut tx, collection, &received_at).await?;
        }

        tx.commit().await?;

        Ok(IngestSummary {
            trees_upserted: batch.trees.len(),
            collections_inserted: batch.collections.len(),
        })
    }

    /// The full current record set.
    pub async fn snapshot(&self) -> Result<Snapshot, AuthorityError> {
        self.ensure_schema().await?;

        let tree_rows: Vec<TreeRow> = sqlx::query_as(
            "SELECT tree_id, lat, lng, note, created_at FROM trees ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let collection_rows: Vec<CollectionRow> = sqlx::query_as(
            "SELECT id, tree_id, cuts, milk_amount, note, timestamp FROM collections ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let trees = tree_rows
            .into_iter()
            .map(|row| -> Result<RemoteTree, AuthorityError> {
                let created_at =
                    timestamp::parse(&row.created_at).map_err(|e| AuthorityError::CorruptRow {
                        table: "trees",
                        message: format!("created_at for {}: {}", row.tree_id, e),
                    })?;
                Ok(RemoteTree {
                    tree_id: row.tree_id,
                    lat: row.lat,
                    lng: row.lng,
                    note: row.note,
                    created_at,
                })
            })
            .collect::<Result<Vec<_>, AuthorityError>>()?;

        let collections = collection_rows
            .into_iter()
            .map(|row| -> Result<CollectionRecord, AuthorityError> {
                let corrupt = |message: String| AuthorityError::CorruptRow {
                    table: "collections",
                    message,
                };
                let ts = timestamp::parse(&row.timestamp)
                    .map_err(|e| corrupt(format!("timestamp for id {}: {}", row.id, e)))?;
                let cuts = u32::try_from(row.cuts)
                    .map_err(|_| corrupt(format!("cuts {} for id {}", row.cuts, row.id)))?;
                Ok(CollectionRecord {
                    tree_id: row.tree_id,
                    cuts,
                    milk_amount: row.milk_amount,
                    note: row.note,
                    timestamp: ts,
                })
            })
            .collect::<Result<Vec<_>, AuthorityError>>()?;

        Ok(Snapshot { trees, collections })
    }
}

fn validate_batch(batch: &SyncBatch) -> Result<(), AuthorityError> {
    for tree in &batch.trees {
        if tree.tree_id.trim().is_empty() {
            return Err(AuthorityError::InvalidRecord(
                "tree with empty tree_id".to_string(),
            ));
        }
        validate_coordinates(tree.lat, tree.lng)
            .map_err(|e| AuthorityError::InvalidRecord(format!("tree {}: {}", tree.tree_id, e)))?;
    }
    for collection in &batch.collections {
        if collection.tree_id.trim().is_empty() {
            return Err(AuthorityError::InvalidRecord(
                "collection with empty tree_id".to_string(),
            ));
        }
        if !collection.milk_amount.is_finite() || collection.milk_amount < 0.0 {
            return Err(AuthorityError::InvalidRecord(format!(
                "collection for {}: milk amount {}",
                collection.tree_id, collection.milk_amount
            )));
        }
    }
    Ok(())
}

async fn upsert_tree(
    conn: &mut SqliteConnection,
    tree: &TreeRecord,
    received_at: &str,
) -> Result<(), AuthorityError> {
    sqlx::query(
        r#"
        INSERT INTO trees (tree_id, lat, lng, note, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(tree_id) DO UPDATE SET
            lat = excluded.lat,
            lng = excluded.lng,
            note = excluded.note
        "#,
    )
    .bind(tree.tree_id.trim())
    .bind(tree.lat)
    .bind(tree.lng)
    .bind(&tree.note)
    .bind(received_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_collection(
    conn: &mut SqliteConnection,
    collection: &CollectionRecord,
    received_at: &str,
) -> Result<(), AuthorityError> {
    sqlx::query(
        r#"
        INSERT INTO collections (tree_id, cuts, milk_amount, note, timestamp, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(collection.tree_id.trim())
    .bind(i64::from(collection.cuts))
    .bind(collection.milk_amount)
    .bind(&collection.note)
    .bind(timestamp::format(&collection.timestamp))
    .bind(received_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
