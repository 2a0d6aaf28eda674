use std::path::{Path, PathBuf};

use anyhow::Context;
use sqlx::{
    Row, Sqlite, SqliteConnection,
    pool::PoolConnection,
    sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
        SqliteSynchronous,
    },
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    DataId, DetectionRecord, DetectionRepository, HandInfo, ImageRef, NewDetection, StoreError,
    merge_corrected,
};
use crate::detection::landmarks::Handedness;
use crate::models::LineSet;

const SELECT_RECORD: &str = r#"SELECT id, source_file, source_url, clean_file, clean_url,
    annotated_file, annotated_url, hand_label, hand_score, hand_open, palm_size, lines,
    created_at, updated_at
    FROM detection WHERE id = $1"#;

/// Detections persisted in a SQLite database file.
pub struct SqliteStore {
    db_file: PathBuf,
    pool: SqlitePool,
    /// Store-wide lock for line updates
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_file", &self.db_file)
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) the database and run the embedded migrations.
    pub async fn open<P: AsRef<Path>>(db_file: P) -> anyhow::Result<Self> {
        let db_file = db_file.as_ref().to_path_buf();
        if let Some(parent) = db_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(&db_file)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_opts)
            .await
            .with_context(|| format!("Failed to open detection store {:?}", db_file))?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            db_file,
            pool,
            write_lock: Mutex::new(()),
        })
    }

    async fn conn(&self) -> anyhow::Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Close the pool so the database file can be reopened or removed.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn label_to_str(label: Handedness) -> &'static str {
    match label {
        Handedness::Left => "Left",
        Handedness::Right => "Right",
    }
}

fn label_from_str(s: &str) -> anyhow::Result<Handedness> {
    match s {
        "Left" => Ok(Handedness::Left),
        "Right" => Ok(Handedness::Right),
        other => anyhow::bail!("Invalid hand label {:?}", other),
    }
}

fn record_from_row(row: &SqliteRow) -> anyhow::Result<DetectionRecord> {
    let id: String = row.try_get("id")?;
    let lines: String = row.try_get("lines")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let hand_label: String = row.try_get("hand_label")?;

    Ok(DetectionRecord {
        data_id: id
            .parse()
            .with_context(|| format!("Invalid detection id {:?}", id))?,
        source_image: ImageRef {
            file_name: row.try_get("source_file")?,
            url: row.try_get("source_url")?,
        },
        clean_image: ImageRef {
            file_name: row.try_get("clean_file")?,
            url: row.try_get("clean_url")?,
        },
        annotated_image: ImageRef {
            file_name: row.try_get("annotated_file")?,
            url: row.try_get("annotated_url")?,
        },
        hand_info: HandInfo {
            label: label_from_str(&hand_label)?,
            score: row.try_get::<f64, _>("hand_score")? as f32,
            is_open: row.try_get("hand_open")?,
        },
        palm_size: row.try_get::<f64, _>("palm_size")? as f32,
        lines: serde_json::from_str(&lines)
            .with_context(|| format!("Corrupt lines for detection {}", id))?,
        created_at: OffsetDateTime::parse(&created_at, &Rfc3339)?,
        updated_at: OffsetDateTime::parse(&updated_at, &Rfc3339)?,
    })
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    id: &DataId,
) -> anyhow::Result<Option<DetectionRecord>> {
    let row = sqlx::query(SELECT_RECORD)
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(record_from_row).transpose()
}

impl DetectionRepository for SqliteStore {
    async fn create(&self, detection: NewDetection) -> Result<DetectionRecord, StoreError> {
        let record = detection.into_record();
        let lines = serde_json::to_string(&record.lines).context("Failed to encode lines")?;
        let created_at = record.created_at.format(&Rfc3339).context("Failed to format timestamp")?;
        let updated_at = record.updated_at.format(&Rfc3339).context("Failed to format timestamp")?;

        let mut conn = self.conn().await?;
        sqlx::query(
            r#"INSERT INTO detection (id, source_file, source_url, clean_file, clean_url,
                annotated_file, annotated_url, hand_label, hand_score, hand_open, palm_size,
                lines, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(record.data_id.to_string())
        .bind(&record.source_image.file_name)
        .bind(&record.source_image.url)
        .bind(&record.clean_image.file_name)
        .bind(&record.clean_image.url)
        .bind(&record.annotated_image.file_name)
        .bind(&record.annotated_image.url)
        .bind(label_to_str(record.hand_info.label))
        .bind(record.hand_info.score as f64)
        .bind(record.hand_info.is_open)
        .bind(record.palm_size as f64)
        .bind(lines)
        .bind(created_at)
        .bind(updated_at)
        .execute(&mut *conn)
        .await
        .context("Failed to insert detection")?;

        debug!("Stored detection {} in {:?}", record.data_id, self.db_file);
        Ok(record)
    }

    async fn get(&self, id: &DataId) -> Result<DetectionRecord, StoreError> {
        let mut conn = self.conn().await?;
        fetch_record(&mut conn, id)
            .await?
            .ok_or(StoreError::NotFound(*id))
    }

    async fn update_lines(&self, id: &DataId, lines: LineSet) -> Result<DetectionRecord, StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let current = fetch_record(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound(*id))?;

        let merged = merge_corrected(&current.lines, lines);
        let updated_at = OffsetDateTime::now_utc();
        sqlx::query(r#"UPDATE detection SET lines = $1, updated_at = $2 WHERE id = $3"#)
            .bind(serde_json::to_string(&merged).context("Failed to encode lines")?)
            .bind(updated_at.format(&Rfc3339).context("Failed to format timestamp")?)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to update lines")?;
        tx.commit().await.context("Failed to commit correction")?;

        debug!("Corrected lines of detection {}", id);
        Ok(DetectionRecord {
            lines: merged,
            updated_at,
            ..current
        })
    }
}
