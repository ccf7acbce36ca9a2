use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::StoreError;
use crate::models::{
    normalize_note, timestamp, NewObservation, Observation, ObservationUpdate, SyncStatus,
};

pub struct ObservationRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ObservationRow {
    id: i64,
    tree_id: String,
    cuts: i64,
    milk_amount: f64,
    note: Option<String>,
    timestamp: String,
    synced: i64,
}

impl TryFrom<ObservationRow> for Observation {
    type Error = StoreError;

    fn try_from(row: ObservationRow) -> Result<Self, Self::Error> {
        let corrupt = |message: String| StoreError::CorruptRow {
            table: "observations",
            message,
        };

        let ts = timestamp::parse(&row.timestamp)
            .map_err(|e| corrupt(format!("timestamp '{}' for id {}: {}", row.timestamp, row.id, e)))?;
        let cuts = u32::try_from(row.cuts)
            .map_err(|_| corrupt(format!("cuts {} for id {}", row.cuts, row.id)))?;

        Ok(Observation {
            id: row.id,
            tree_id: row.tree_id,
            cuts,
            milk_amount: row.milk_amount,
            note: row.note,
            timestamp: ts,
            status: SyncStatus::from_flag(row.synced),
        })
    }
}

fn hydrate(rows: Vec<ObservationRow>) -> Result<Vec<Observation>, StoreError> {
    rows.into_iter().map(Observation::try_from).collect()
}

impl ObservationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, observation: &NewObservation) -> Result<Observation, StoreError> {
        observation.validate().map_err(StoreError::Invalid)?;

        let mut conn = self.pool.acquire().await?;
        let id = Self::insert_in(&mut conn, observation).await?;
        drop(conn);

        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound("observation", id.to_string()))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Observation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    pub async fn list(&self) -> Result<Vec<Observation>, StoreError> {
        let rows: Vec<ObservationRow> = sqlx::query_as("SELECT * FROM observations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        hydrate(rows)
    }

    pub async fn list_by_status(&self, status: SyncStatus) -> Result<Vec<Observation>, StoreError> {
        let rows: Vec<ObservationRow> =
            sqlx::query_as("SELECT * FROM observations WHERE synced = ? ORDER BY id")
                .bind(status.as_flag())
                .fetch_all(&self.pool)
                .await?;
        hydrate(rows)
    }

    /// A site's history, newest first.
    pub async fn list_for_site(&self, tree_id: &str) -> Result<Vec<Observation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let mut observations = Self::list_for_site_in(&mut conn, tree_id).await?;
        observations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(observations)
    }

    /// An observation for `tree_id` recorded within `window` of `at`, if any.
    pub async fn find_near(
        &self,
        tree_id: &str,
        at: &DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Option<Observation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::find_near_in(&mut conn, tree_id, at, window).await
    }

    pub async fn count_by_status(&self, status: SyncStatus) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM observations WHERE synced = ?")
                .bind(status.as_flag())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Merges the provided fields in one write, so nothing committed
    /// between a read and the write can be lost.
    pub async fn update(
        &self,
        id: i64,
        update: &ObservationUpdate,
    ) -> Result<Observation, StoreError> {
        if let Some(amount) = update.milk_amount {
            if !amount.is_finite() || amount < 0.0 {
                return Err(StoreError::Invalid(format!(
                    "milk amount must be a non-negative number, got {}",
                    amount
                )));
            }
        }

        if update.is_empty() {
            return self
                .get(id)
                .await?
                .ok_or_else(|| StoreError::NotFound("observation", id.to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE observations SET
                cuts = COALESCE(?, cuts),
                milk_amount = COALESCE(?, milk_amount),
                note = CASE WHEN ? THEN ? ELSE note END,
                synced = COALESCE(?, synced)
            WHERE id = ?
            "#,
        )
        .bind(update.cuts.map(i64::from))
        .bind(update.milk_amount)
        .bind(update.note.is_some())
        .bind(update.note.clone().and_then(normalize_note))
        .bind(update.status.map(SyncStatus::as_flag))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("observation", id.to_string()));
        }

        let observation = Self::get_in(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound("observation", id.to_string()))?;
        tx.commit().await?;
        Ok(observation)
    }

    /// Local-only delete. The authority keeps its copy.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM observations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_site_in(
        conn: &mut SqliteConnection,
        tree_id: &str,
    ) -> Result<Vec<Observation>, StoreError> {
        let rows: Vec<ObservationRow> =
            sqlx::query_as("SELECT * FROM observations WHERE tree_id = ? ORDER BY id")
                .bind(tree_id)
                .fetch_all(&mut *conn)
                .await?;
        hydrate(rows)
    }

    // Stored timestamps are canonical `timestamp::format` text, so a text
    // range narrows the scan. The bounds are widened by a millisecond to
    // cover sub-millisecond `at`; the exact check runs on parsed values.
    pub(crate) async fn find_near_in(
        conn: &mut SqliteConnection,
        tree_id: &str,
        at: &DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Option<Observation>, StoreError> {
        let slack = window + TimeDelta::milliseconds(1);
        let rows: Vec<ObservationRow> = sqlx::query_as(
            r#"
            SELECT * FROM observations
            WHERE tree_id = ? AND timestamp BETWEEN ? AND ?
            ORDER BY id
            "#,
        )
        .bind(tree_id)
        .bind(timestamp::format(&(*at - slack)))
        .bind(timestamp::format(&(*at + slack)))
        .fetch_all(&mut *conn)
        .await?;

        Ok(hydrate(rows)?
            .into_iter()
            .find(|o| timestamp::within(&o.timestamp, at, window)))
    }

    pub(crate) async fn insert_in(
        conn: &mut SqliteConnection,
        observation: &NewObservation,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO observations (tree_id, cuts, milk_amount, note, timestamp, synced)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&observation.tree_id)
        .bind(i64::from(observation.cuts))
        .bind(observation.milk_amount)
        .bind(&observation.note)
        .bind(timestamp::format(&observation.timestamp))
        .bind(observation.status.as_flag())
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<Observation>, StoreError> {
        let row: Option<ObservationRow> = sqlx::query_as("SELECT * FROM observations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(Observation::try_from).transpose()
    }

    /// Flips a pending observation to synced if it still holds the pushed
    /// content.
    pub(crate) async fn acknowledge_in(
        conn: &mut SqliteConnection,
        pushed: &Observation,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE observations SET synced = ?
            WHERE id = ? AND synced = ? AND tree_id = ? AND cuts = ?
                AND milk_amount = ? AND note IS ?
            "#,
        )
        .bind(SyncStatus::Synced.as_flag())
        .bind(pushed.id)
        .bind(SyncStatus::Pending.as_flag())
        .bind(&pushed.tree_id)
        .bind(i64::from(pushed.cuts))
        .bind(pushed.milk_amount)
        .bind(&pushed.note)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
