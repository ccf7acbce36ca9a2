use sqlx::{SqliteConnection, SqlitePool};

use super::StoreError;
use crate::models::{
    normalize_note, timestamp, validate_coordinates, NewSite, Site, SiteUpdate, SyncStatus,
};

pub struct SiteRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SiteRow {
    id: i64,
    tree_id: String,
    lat: f64,
    lng: f64,
    note: Option<String>,
    created_at: String,
    synced: i64,
}

impl TryFrom<SiteRow> for Site {
    type Error = StoreError;

    fn try_from(row: SiteRow) -> Result<Self, Self::Error> {
        let created_at = timestamp::parse(&row.created_at).map_err(|e| StoreError::CorruptRow {
            table: "sites",
            message: format!("created_at '{}' for id {}: {}", row.created_at, row.id, e),
        })?;

        Ok(Site {
            id: row.id,
            tree_id: row.tree_id,
            lat: row.lat,
            lng: row.lng,
            note: row.note,
            created_at,
            status: SyncStatus::from_flag(row.synced),
        })
    }
}

fn hydrate(rows: Vec<SiteRow>) -> Result<Vec<Site>, StoreError> {
    rows.into_iter().map(Site::try_from).collect()
}

impl SiteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Registers a new site. The tree id must not exist locally yet.
    pub async fn create(&self, site: &NewSite) -> Result<Site, StoreError> {
        site.validate().map_err(StoreError::Invalid)?;

        let mut tx = self.pool.begin().await?;
        if Self::find_by_tree_id_in(&mut tx, &site.tree_id)
            .await?
            .is_some()
        {
            return Err(StoreError::DuplicateTree(site.tree_id.clone()));
        }
        let id = Self::insert_in(&mut tx, site).await?;
        tx.commit().await?;

        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("site", id.to_string()))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Site>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    pub async fn get_by_tree_id(&self, tree_id: &str) -> Result<Option<Site>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_tree_id_in(&mut conn, tree_id).await
    }

    /// All sites in surrogate-key order.
    pub async fn list(&self) -> Result<Vec<Site>, StoreError> {
        let rows: Vec<SiteRow> = sqlx::query_as("SELECT * FROM sites ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        hydrate(rows)
    }

    pub async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Site>, StoreError> {
        let rows: Vec<SiteRow> = sqlx::query_as("SELECT * FROM sites WHERE synced = ? ORDER BY id")
            .bind(status.as_flag())
            .fetch_all(&self.pool)
            .await?;
        hydrate(rows)
    }

    /// Case-insensitive match on tree id or note.
    pub async fn search(&self, query: &str) -> Result<Vec<Site>, StoreError> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let rows: Vec<SiteRow> = sqlx::query_as(
            "SELECT * FROM sites WHERE LOWER(tree_id) LIKE ? OR LOWER(COALESCE(note, '')) LIKE ? ORDER BY id",
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;
        hydrate(rows)
    }

    /// The site registered after `id`, for walking a tapping round in order.
    pub async fn next_after(&self, id: i64) -> Result<Option<Site>, StoreError> {
        let row: Option<SiteRow> =
            sqlx::query_as("SELECT * FROM sites WHERE id > ? ORDER BY id LIMIT 1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Site::try_from).transpose()
    }

    pub async fn count_by_status(&self, status: SyncStatus) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sites WHERE synced = ?")
            .bind(status.as_flag())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Merges the provided fields into the stored site. The write happens
    /// first so the row is locked before it is read back and validated.
    pub async fn update(&self, id: i64, update: &SiteUpdate) -> Result<Site, StoreError> {
        if update.is_empty() {
            return self
                .get(id)
                .await?
                .ok_or_else(|| StoreError::NotFound("site", id.to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE sites SET
                lat = COALESCE(?, lat),
                lng = COALESCE(?, lng),
                note = CASE WHEN ? THEN ? ELSE note END,
                synced = COALESCE(?, synced)
            WHERE id = ?
            "#,
        )
        .bind(update.lat)
        .bind(update.lng)
        .bind(update.note.is_some())
        .bind(update.note.clone().and_then(normalize_note))
        .bind(update.status.map(SyncStatus::as_flag))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("site", id.to_string()));
        }

        let site = Self::get_in(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound("site", id.to_string()))?;
        // Dropping the transaction rolls the write back.
        validate_coordinates(site.lat, site.lng).map_err(StoreError::Invalid)?;

        tx.commit().await?;
        Ok(site)
    }

    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sites WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn find_by_tree_id_in(
        conn: &mut SqliteConnection,
        tree_id: &str,
    ) -> Result<Option<Site>, StoreError> {
        let row: Option<SiteRow> = sqlx::query_as("SELECT * FROM sites WHERE tree_id = ?")
            .bind(tree_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(Site::try_from).transpose()
    }

    pub(crate) async fn insert_in(
        conn: &mut SqliteConnection,
        site: &NewSite,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO sites (tree_id, lat, lng, note, created_at, synced)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&site.tree_id)
        .bind(site.lat)
        .bind(site.lng)
        .bind(&site.note)
        .bind(timestamp::format(&site.created_at))
        .bind(site.status.as_flag())
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Overwrites the authority-owned fields of a site, leaving its flag alone.
    pub(crate) async fn overwrite_location_in(
        conn: &mut SqliteConnection,
        id: i64,
        lat: f64,
        lng: f64,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE sites SET lat = ?, lng = ?, note = ? WHERE id = ?")
            .bind(lat)
            .bind(lng)
            .bind(note)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn get_in(conn: &mut SqliteConnection, id: i64) -> Result<Option<Site>, StoreError> {
        let row: Option<SiteRow> = sqlx::query_as("SELECT * FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(Site::try_from).transpose()
    }

    /// Flips a pending site to synced if it still holds the pushed content.
    pub(crate) async fn acknowledge_in(
        conn: &mut SqliteConnection,
        pushed: &Site,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE sites SET synced = ?
            WHERE id = ? AND synced = ? AND lat = ? AND lng = ? AND note IS ?
            "#,
        )
        .bind(SyncStatus::Synced.as_flag())
        .bind(pushed.id)
        .bind(SyncStatus::Pending.as_flag())
        .bind(pushed.lat)
        .bind(pushed.lng)
        .bind(&pushed.note)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
