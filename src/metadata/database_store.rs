use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite, Transaction,
};
use uuid::Uuid;

use crate::configuration::config::StoreConfig;
use crate::error_handling::types::StoreError;
use crate::metadata::store_trait::MetadataStore;
use crate::metadata::types::{
    Agent, BoundingBox, Image, Label, LabelMetadata, Metrics, Model, Prediction, TrainingJob,
    TrainingStatus,
};

/// Table-per-entity schema; attribute names and types are the wire contract
/// other services rely on. Foreign keys are restrict-style on purpose: no
/// parent row can be deleted out from under its children, and nothing
/// cascades silently.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS agents (
        id TEXT PRIMARY KEY,
        hostname TEXT NOT NULL,
        username TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS images (
        id TEXT PRIMARY KEY,
        file_path TEXT NOT NULL,
        agent_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(agent_id) REFERENCES agents(id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_images_agent ON images(agent_id);",
    "CREATE TABLE IF NOT EXISTS labels (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS label_metadata (
        id TEXT PRIMARY KEY,
        image_id TEXT NOT NULL,
        label_id TEXT NOT NULL,
        bbox TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id),
        FOREIGN KEY(label_id) REFERENCES labels(id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_label_metadata_image ON label_metadata(image_id);",
    "CREATE INDEX IF NOT EXISTS idx_label_metadata_label ON label_metadata(label_id);",
    "CREATE TABLE IF NOT EXISTS predictions (
        id TEXT PRIMARY KEY,
        image_id TEXT NOT NULL,
        bbox TEXT NOT NULL,
        label TEXT NOT NULL,
        confidence REAL NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(image_id) REFERENCES images(id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_predictions_image ON predictions(image_id);",
    "CREATE TABLE IF NOT EXISTS models (
        id TEXT PRIMARY KEY,
        version TEXT NOT NULL UNIQUE,
        is_active INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS training_jobs (
        id TEXT PRIMARY KEY,
        model_id TEXT NOT NULL,
        status TEXT NOT NULL,
        metrics TEXT,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        FOREIGN KEY(model_id) REFERENCES models(id)
    );",
    "CREATE INDEX IF NOT EXISTS idx_training_jobs_model ON training_jobs(model_id);",
];

/// Classifies driver errors into the store taxonomy.
fn map_db_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let msg = db.message();
            if msg.contains("UNIQUE constraint failed") {
                StoreError::Conflict(msg.to_string())
            } else if msg.contains("database is locked")
                || msg.contains("database table is locked")
            {
                StoreError::Transient(msg.to_string())
            } else {
                StoreError::Backend(msg.to_string())
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Transient(String::from("connection pool timed out"))
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::Backend(format!("malformed id in row: {}", raw)))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Backend(format!("malformed timestamp in row: {}", raw)))
}

/// Fixed-width RFC3339 so lexicographic ordering matches chronological.
fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn bbox_text(bbox: &BoundingBox) -> Result<String, StoreError> {
    serde_json::to_string(bbox).map_err(|e| StoreError::Backend(e.to_string()))
}

fn parse_bbox(raw: &str) -> Result<BoundingBox, StoreError> {
    serde_json::from_str(raw).map_err(|_| StoreError::Backend(format!("malformed bbox: {}", raw)))
}

async fn row_exists(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    id: Uuid,
    what: &str,
) -> Result<(), StoreError> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?1", table);
    let found: Option<i64> = sqlx::query_scalar(&sql)
        .bind(id.to_string())
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_err)?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound(format!("{} {}", what, id))),
    }
}

// Internal row mappings to avoid manual try_get

#[derive(Debug, sqlx::FromRow)]
struct AgentRow {
    id: String,
    hostname: String,
    username: String,
    created_at: String,
}

impl AgentRow {
    fn into_agent(self) -> Result<Agent, StoreError> {
        Ok(Agent {
            id: parse_id(&self.id)?,
            hostname: self.hostname,
            username: self.username,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    id: String,
    file_path: String,
    agent_id: String,
    created_at: String,
}

impl ImageRow {
    fn into_image(self) -> Result<Image, StoreError> {
        Ok(Image {
            id: parse_id(&self.id)?,
            file_path: self.file_path,
            agent_id: parse_id(&self.agent_id)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LabelRow {
    id: String,
    name: String,
    created_at: String,
}

impl LabelRow {
    fn into_label(self) -> Result<Label, StoreError> {
        Ok(Label {
            id: parse_id(&self.id)?,
            name: self.name,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LabelMetadataRow {
    id: String,
    image_id: String,
    label_id: String,
    bbox: String,
    created_at: String,
}

impl LabelMetadataRow {
    fn into_label_metadata(self) -> Result<LabelMetadata, StoreError> {
        Ok(LabelMetadata {
            id: parse_id(&self.id)?,
            image_id: parse_id(&self.image_id)?,
            label_id: parse_id(&self.label_id)?,
            bbox: parse_bbox(&self.bbox)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PredictionRow {
    id: String,
    image_id: String,
    bbox: String,
    label: String,
    confidence: f64,
    created_at: String,
}

impl PredictionRow {
    fn into_prediction(self) -> Result<Prediction, StoreError> {
        Ok(Prediction {
            id: parse_id(&self.id)?,
            image_id: parse_id(&self.image_id)?,
            bbox: parse_bbox(&self.bbox)?,
            label: self.label,
            confidence: self.confidence,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ModelRow {
    id: String,
    version: String,
    is_active: i64,
    created_at: String,
}

impl ModelRow {
    fn into_model(self) -> Result<Model, StoreError> {
        Ok(Model {
            id: parse_id(&self.id)?,
            version: self.version,
            is_active: self.is_active != 0,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrainingJobRow {
    id: String,
    model_id: String,
    status: String,
    metrics: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl TrainingJobRow {
    fn into_training_job(self) -> Result<TrainingJob, StoreError> {
        let status = TrainingStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Backend(format!("unknown training status in row: {}", self.status))
        })?;
        let metrics = match self.metrics {
            Some(raw) => Some(serde_json::from_str::<Metrics>(&raw).map_err(|_| {
                StoreError::Backend(format!("malformed metrics in row: {}", raw))
            })?),
            None => None,
        };
        Ok(TrainingJob {
            id: parse_id(&self.id)?,
            model_id: parse_id(&self.model_id)?,
            status,
            metrics,
            started_at: parse_ts(&self.started_at)?,
            completed_at: match self.completed_at {
                Some(raw) => Some(parse_ts(&raw)?),
                None => None,
            },
        })
    }
}

/// SQLite-backed metadata store.
///
/// The store owns its connection pool and a current-thread runtime, giving
/// callers a synchronous API; the handle is `Send + Sync` and is shared
/// between threads by reference. Each operation runs as a single
/// transaction. Dropping the handle (or calling [`DatabaseStore::close`])
/// releases the pool.
pub struct DatabaseStore {
    rt: tokio::runtime::Runtime,
    pool: Pool<Sqlite>,
    config: StoreConfig,
}

impl DatabaseStore {
    /// Creates or opens the database at `path` and ensures the schema.
    pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self, StoreError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
            }
        }
        let pool = rt.block_on(async {
            let opts = SqliteConnectOptions::new()
                .filename(path_ref)
                .create_if_missing(true)
                .foreign_keys(true)
                .busy_timeout(Duration::from_secs(config.busy_timeout_secs));
            let pool = SqlitePoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(opts)
                .await
                .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
            for statement in SCHEMA {
                sqlx::query(statement)
                    .execute(&pool)
                    .await
                    .map_err(map_db_err)?;
            }
            Ok::<_, StoreError>(pool)
        })?;
        info!("Metadata store opened at {}", path_ref.display());
        Ok(Self { rt, pool, config })
    }

    /// Opens the store with default configuration.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::open(path, StoreConfig::default())
    }

    /// Closes the connection pool. Dropping the store has the same effect.
    pub fn close(self) {
        self.rt.block_on(self.pool.close());
    }
}

impl MetadataStore for DatabaseStore {
    fn register_agent(&self, hostname: &str, username: &str) -> Result<Uuid, StoreError> {
        if hostname.trim().is_empty() {
            return Err(StoreError::Validation(String::from(
                "hostname must not be empty",
            )));
        }
        if username.trim().is_empty() {
            return Err(StoreError::Validation(String::from(
                "username must not be empty",
            )));
        }
        self.rt.block_on(async {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO agents (id, hostname, username, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(id.to_string())
            .bind(hostname)
            .bind(username)
            .bind(ts_text(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            debug!("Registered agent {} ({}@{})", id, username, hostname);
            Ok(id)
        })
    }

    fn record_image(&self, agent_id: Uuid, file_path: &str) -> Result<Uuid, StoreError> {
        if file_path.trim().is_empty() {
            return Err(StoreError::Validation(String::from(
                "file_path must not be empty",
            )));
        }
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            row_exists(&mut tx, "agents", agent_id, "agent").await?;
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO images (id, file_path, agent_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(id.to_string())
            .bind(file_path)
            .bind(agent_id.to_string())
            .bind(ts_text(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(id)
        })
    }

    fn ensure_label(&self, name: &str) -> Result<Uuid, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation(String::from(
                "label name must not be empty",
            )));
        }
        self.rt.block_on(async {
            let id = Uuid::new_v4();
            let inserted =
                sqlx::query("INSERT INTO labels (id, name, created_at) VALUES (?1, ?2, ?3)")
                    .bind(id.to_string())
                    .bind(name)
                    .bind(ts_text(Utc::now()))
                    .execute(&self.pool)
                    .await;
            match inserted {
                Ok(_) => Ok(id),
                // lost the uniqueness race: another caller created this
                // name, fall back to looking it up
                Err(err) => match map_db_err(err) {
                    StoreError::Conflict(_) => {
                        let existing: Option<String> =
                            sqlx::query_scalar("SELECT id FROM labels WHERE name = ?1")
                                .bind(name)
                                .fetch_optional(&self.pool)
                                .await
                                .map_err(map_db_err)?;
                        match existing {
                            Some(raw) => parse_id(&raw),
                            None => Err(StoreError::Backend(format!(
                                "label '{}' vanished after uniqueness conflict",
                                name
                            ))),
                        }
                    }
                    other => Err(other),
                },
            }
        })
    }

    fn add_label_metadata(
        &self,
        image_id: Uuid,
        label_id: Uuid,
        bbox: BoundingBox,
    ) -> Result<Uuid, StoreError> {
        bbox.validate(self.config.image_bounds.as_ref())?;
        let bbox_json = bbox_text(&bbox)?;
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            row_exists(&mut tx, "images", image_id, "image").await?;
            row_exists(&mut tx, "labels", label_id, "label").await?;
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO label_metadata (id, image_id, label_id, bbox, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(id.to_string())
            .bind(image_id.to_string())
            .bind(label_id.to_string())
            .bind(bbox_json)
            .bind(ts_text(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(id)
        })
    }

    fn record_prediction(
        &self,
        image_id: Uuid,
        bbox: BoundingBox,
        label: &str,
        confidence: f64,
    ) -> Result<Uuid, StoreError> {
        if label.trim().is_empty() {
            return Err(StoreError::Validation(String::from(
                "prediction label must not be empty",
            )));
        }
        bbox.validate(self.config.image_bounds.as_ref())?;
        if !self.config.score_range.contains(confidence) {
            return Err(StoreError::Validation(format!(
                "confidence {} outside [{}, {}]",
                confidence, self.config.score_range.min, self.config.score_range.max
            )));
        }
        let bbox_json = bbox_text(&bbox)?;
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            row_exists(&mut tx, "images", image_id, "image").await?;
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO predictions (id, image_id, bbox, label, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(id.to_string())
            .bind(image_id.to_string())
            .bind(bbox_json)
            .bind(label)
            .bind(confidence)
            .bind(ts_text(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            Ok(id)
        })
    }

    fn create_model(&self, version: &str) -> Result<Uuid, StoreError> {
        if version.trim().is_empty() {
            return Err(StoreError::Validation(String::from(
                "model version must not be empty",
            )));
        }
        self.rt.block_on(async {
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO models (id, version, is_active, created_at) VALUES (?1, ?2, 0, ?3)",
            )
            .bind(id.to_string())
            .bind(version)
            .bind(ts_text(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(id)
        })
    }

    fn activate_model(&self, model_id: Uuid) -> Result<(), StoreError> {
        self.rt.block_on(async {
            // Demotion and promotion share one transaction so readers never
            // observe zero or two active models.
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            row_exists(&mut tx, "models", model_id, "model").await?;
            sqlx::query("UPDATE models SET is_active = 0 WHERE is_active = 1")
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            sqlx::query("UPDATE models SET is_active = 1 WHERE id = ?1")
                .bind(model_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            info!("Activated model {}", model_id);
            Ok(())
        })
    }

    fn start_training_job(&self, model_id: Uuid) -> Result<Uuid, StoreError> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            row_exists(&mut tx, "models", model_id, "model").await?;
            let id = Uuid::new_v4();
            // fused create+start: the job is born running
            sqlx::query(
                "INSERT INTO training_jobs (id, model_id, status, metrics, started_at, completed_at)
                 VALUES (?1, ?2, ?3, NULL, ?4, NULL)",
            )
            .bind(id.to_string())
            .bind(model_id.to_string())
            .bind(TrainingStatus::InProgress.as_str())
            .bind(ts_text(Utc::now()))
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            debug!("Started training job {} for model {}", id, model_id);
            Ok(id)
        })
    }

    fn update_training_job(
        &self,
        job_id: Uuid,
        status: TrainingStatus,
        metrics: Option<Metrics>,
    ) -> Result<(), StoreError> {
        let metrics_json = match &metrics {
            Some(m) => {
                Some(serde_json::to_string(m).map_err(|e| StoreError::Backend(e.to_string()))?)
            }
            None => None,
        };
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM training_jobs WHERE id = ?1")
                    .bind(job_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_db_err)?;
            let current = match current {
                Some(raw) => TrainingStatus::parse(&raw).ok_or_else(|| {
                    StoreError::Backend(format!("unknown training status in row: {}", raw))
                })?,
                None => {
                    return Err(StoreError::NotFound(format!("training job {}", job_id)));
                }
            };
            if !current.can_transition_to(status) {
                return Err(StoreError::InvalidTransition(format!(
                    "training job {} cannot move from {} to {}",
                    job_id,
                    current.as_str(),
                    status.as_str()
                )));
            }
            let completed_at = if status.is_terminal() {
                Some(ts_text(Utc::now()))
            } else {
                None
            };
            // NULL binds leave the stored value untouched
            sqlx::query(
                "UPDATE training_jobs
                 SET status = ?1,
                     completed_at = COALESCE(?2, completed_at),
                     metrics = COALESCE(?3, metrics)
                 WHERE id = ?4",
            )
            .bind(status.as_str())
            .bind(completed_at)
            .bind(metrics_json)
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            tx.commit().await.map_err(map_db_err)?;
            debug!(
                "Training job {} moved from {} to {}",
                job_id,
                current.as_str(),
                status.as_str()
            );
            Ok(())
        })
    }

    fn get_agent(&self, id: Uuid) -> Result<Agent, StoreError> {
        self.rt.block_on(async {
            let row: Option<AgentRow> = sqlx::query_as(
                "SELECT id, hostname, username, created_at FROM agents WHERE id = ?1",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.ok_or_else(|| StoreError::NotFound(format!("agent {}", id)))?
                .into_agent()
        })
    }

    fn get_image(&self, id: Uuid) -> Result<Image, StoreError> {
        self.rt.block_on(async {
            let row: Option<ImageRow> = sqlx::query_as(
                "SELECT id, file_path, agent_id, created_at FROM images WHERE id = ?1",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.ok_or_else(|| StoreError::NotFound(format!("image {}", id)))?
                .into_image()
        })
    }

    fn get_label(&self, id: Uuid) -> Result<Label, StoreError> {
        self.rt.block_on(async {
            let row: Option<LabelRow> =
                sqlx::query_as("SELECT id, name, created_at FROM labels WHERE id = ?1")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            row.ok_or_else(|| StoreError::NotFound(format!("label {}", id)))?
                .into_label()
        })
    }

    fn get_label_metadata(&self, id: Uuid) -> Result<LabelMetadata, StoreError> {
        self.rt.block_on(async {
            let row: Option<LabelMetadataRow> = sqlx::query_as(
                "SELECT id, image_id, label_id, bbox, created_at FROM label_metadata WHERE id = ?1",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.ok_or_else(|| StoreError::NotFound(format!("label metadata {}", id)))?
                .into_label_metadata()
        })
    }

    fn get_prediction(&self, id: Uuid) -> Result<Prediction, StoreError> {
        self.rt.block_on(async {
            let row: Option<PredictionRow> = sqlx::query_as(
                "SELECT id, image_id, bbox, label, confidence, created_at
                 FROM predictions WHERE id = ?1",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.ok_or_else(|| StoreError::NotFound(format!("prediction {}", id)))?
                .into_prediction()
        })
    }

    fn get_model(&self, id: Uuid) -> Result<Model, StoreError> {
        self.rt.block_on(async {
            let row: Option<ModelRow> = sqlx::query_as(
                "SELECT id, version, is_active, created_at FROM models WHERE id = ?1",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.ok_or_else(|| StoreError::NotFound(format!("model {}", id)))?
                .into_model()
        })
    }

    fn get_training_job(&self, id: Uuid) -> Result<TrainingJob, StoreError> {
        self.rt.block_on(async {
            let row: Option<TrainingJobRow> = sqlx::query_as(
                "SELECT id, model_id, status, metrics, started_at, completed_at
                 FROM training_jobs WHERE id = ?1",
            )
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.ok_or_else(|| StoreError::NotFound(format!("training job {}", id)))?
                .into_training_job()
        })
    }

    fn find_label(&self, name: &str) -> Result<Option<Label>, StoreError> {
        self.rt.block_on(async {
            let row: Option<LabelRow> =
                sqlx::query_as("SELECT id, name, created_at FROM labels WHERE name = ?1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            row.map(LabelRow::into_label).transpose()
        })
    }

    fn active_model(&self) -> Result<Option<Model>, StoreError> {
        self.rt.block_on(async {
            let row: Option<ModelRow> = sqlx::query_as(
                "SELECT id, version, is_active, created_at FROM models WHERE is_active = 1",
            )
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            row.map(ModelRow::into_model).transpose()
        })
    }

    fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<AgentRow> = sqlx::query_as(
                "SELECT id, hostname, username, created_at FROM agents
                 ORDER BY created_at ASC, rowid ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(AgentRow::into_agent).collect()
        })
    }

    fn list_images(&self, agent_id: Uuid) -> Result<Vec<Image>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<ImageRow> = sqlx::query_as(
                "SELECT id, file_path, agent_id, created_at FROM images
                 WHERE agent_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .bind(agent_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(ImageRow::into_image).collect()
        })
    }

    fn list_labels(&self) -> Result<Vec<Label>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<LabelRow> = sqlx::query_as(
                "SELECT id, name, created_at FROM labels ORDER BY created_at ASC, rowid ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(LabelRow::into_label).collect()
        })
    }

    fn list_label_metadata(&self, image_id: Uuid) -> Result<Vec<LabelMetadata>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<LabelMetadataRow> = sqlx::query_as(
                "SELECT id, image_id, label_id, bbox, created_at FROM label_metadata
                 WHERE image_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .bind(image_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter()
                .map(LabelMetadataRow::into_label_metadata)
                .collect()
        })
    }

    fn list_label_metadata_for_label(
        &self,
        label_id: Uuid,
    ) -> Result<Vec<LabelMetadata>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<LabelMetadataRow> = sqlx::query_as(
                "SELECT id, image_id, label_id, bbox, created_at FROM label_metadata
                 WHERE label_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .bind(label_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter()
                .map(LabelMetadataRow::into_label_metadata)
                .collect()
        })
    }

    fn list_predictions(&self, image_id: Uuid) -> Result<Vec<Prediction>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<PredictionRow> = sqlx::query_as(
                "SELECT id, image_id, bbox, label, confidence, created_at FROM predictions
                 WHERE image_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .bind(image_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(PredictionRow::into_prediction).collect()
        })
    }

    fn list_models(&self) -> Result<Vec<Model>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<ModelRow> = sqlx::query_as(
                "SELECT id, version, is_active, created_at FROM models
                 ORDER BY created_at ASC, rowid ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter().map(ModelRow::into_model).collect()
        })
    }

    fn list_training_jobs(&self, model_id: Uuid) -> Result<Vec<TrainingJob>, StoreError> {
        self.rt.block_on(async {
            let rows: Vec<TrainingJobRow> = sqlx::query_as(
                "SELECT id, model_id, status, metrics, started_at, completed_at
                 FROM training_jobs WHERE model_id = ?1
                 ORDER BY started_at ASC, rowid ASC",
            )
            .bind(model_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
            rows.into_iter()
                .map(TrainingJobRow::into_training_job)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::ImageBounds;
    use crate::metadata::types::MetricValue;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn temp_store_with(config: StoreConfig) -> DatabaseStore {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("test.sqlite3");
        // Keep TempDir alive by leaking it for the test duration
        Box::leak(Box::new(dir));
        DatabaseStore::open(path, config).unwrap()
    }

    fn temp_store() -> DatabaseStore {
        temp_store_with(StoreConfig::default())
    }

    fn bbox() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 10.0, 10.0)
    }

    #[test]
    fn test_register_agent_and_fetch() {
        let store = temp_store();
        let id = store.register_agent("host1", "alice").unwrap();
        let agent = store.get_agent(id).unwrap();
        assert_eq!(agent.id, id);
        assert_eq!(agent.hostname, "host1");
        assert_eq!(agent.username, "alice");
    }

    #[test]
    fn test_register_agent_rejects_empty_fields() {
        let store = temp_store();
        assert!(matches!(
            store.register_agent("", "alice"),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.register_agent("host1", "  "),
            Err(StoreError::Validation(_))
        ));
        assert!(store.list_agents().unwrap().is_empty());
    }

    #[test]
    fn test_record_image_resolves_back_to_agent() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();
        let image = store.get_image(image_id).unwrap();
        assert_eq!(image.agent_id, agent_id);
        assert_eq!(image.file_path, "/img/1.jpg");
        assert_eq!(store.get_agent(image.agent_id).unwrap().id, agent_id);
    }

    #[test]
    fn test_record_image_unknown_agent() {
        let store = temp_store();
        let err = store.record_image(Uuid::new_v4(), "/img/1.jpg").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_record_image_rejects_empty_path() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        assert!(matches!(
            store.record_image(agent_id, ""),
            Err(StoreError::Validation(_))
        ));
        assert!(store.list_images(agent_id).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_label_idempotent() {
        let store = temp_store();
        let first = store.ensure_label("car").unwrap();
        for _ in 0..4 {
            assert_eq!(store.ensure_label("car").unwrap(), first);
        }
        let labels = store.list_labels().unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].name, "car");
        assert_eq!(store.find_label("car").unwrap().unwrap().id, first);
        assert!(store.find_label("bike").unwrap().is_none());
    }

    #[test]
    fn test_ensure_label_concurrent_callers_agree() {
        let store = Arc::new(temp_store());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || store.ensure_label("car").unwrap()));
        }
        let ids: Vec<Uuid> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.list_labels().unwrap().len(), 1);
    }

    #[test]
    fn test_ensure_label_rejects_empty_name() {
        let store = temp_store();
        assert!(matches!(
            store.ensure_label(" "),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_add_label_metadata_unknown_refs() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();
        let label_id = store.ensure_label("cat").unwrap();

        let err = store
            .add_label_metadata(Uuid::new_v4(), label_id, bbox())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let err = store
            .add_label_metadata(image_id, Uuid::new_v4(), bbox())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        // no rows were created by the failed attempts
        assert!(store.list_label_metadata(image_id).unwrap().is_empty());
    }

    #[test]
    fn test_add_label_metadata_rejects_malformed_bbox() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();
        let label_id = store.ensure_label("cat").unwrap();
        let inverted = BoundingBox::new(10.0, 0.0, 0.0, 10.0);
        assert!(matches!(
            store.add_label_metadata(image_id, label_id, inverted),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_bbox_bounds_check_enforced_when_configured() {
        let store = temp_store_with(StoreConfig {
            image_bounds: Some(ImageBounds {
                width: 640.0,
                height: 480.0,
            }),
            ..StoreConfig::default()
        });
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();
        let label_id = store.ensure_label("cat").unwrap();

        let oversized = BoundingBox::new(0.0, 0.0, 700.0, 480.0);
        assert!(matches!(
            store.add_label_metadata(image_id, label_id, oversized),
            Err(StoreError::Validation(_))
        ));
        assert!(store
            .add_label_metadata(image_id, label_id, BoundingBox::new(0.0, 0.0, 640.0, 480.0))
            .is_ok());
    }

    #[test]
    fn test_prediction_confidence_range() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();

        assert!(matches!(
            store.record_prediction(image_id, bbox(), "car", 1.5),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            store.record_prediction(image_id, bbox(), "car", -0.1),
            Err(StoreError::Validation(_))
        ));
        // boundary values are inclusive
        store.record_prediction(image_id, bbox(), "car", 0.0).unwrap();
        store.record_prediction(image_id, bbox(), "car", 1.0).unwrap();
        assert_eq!(store.list_predictions(image_id).unwrap().len(), 2);
    }

    #[test]
    fn test_prediction_label_is_free_text() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();
        // no label row named "experimental_class_7" exists, and none is needed
        let id = store
            .record_prediction(image_id, bbox(), "experimental_class_7", 0.4)
            .unwrap();
        let prediction = store.get_prediction(id).unwrap();
        assert_eq!(prediction.label, "experimental_class_7");
        assert!(store.find_label("experimental_class_7").unwrap().is_none());
    }

    #[test]
    fn test_prediction_unknown_image() {
        let store = temp_store();
        assert!(matches!(
            store.record_prediction(Uuid::new_v4(), bbox(), "car", 0.5),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_create_model_version_conflict() {
        let store = temp_store();
        let first = store.create_model("v1.0.0").unwrap();
        let err = store.create_model("v1.0.0").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // the original row is untouched
        assert_eq!(store.get_model(first).unwrap().version, "v1.0.0");
        assert_eq!(store.list_models().unwrap().len(), 1);
    }

    #[test]
    fn test_activate_model_is_exclusive() {
        let store = temp_store();
        let a = store.create_model("v1").unwrap();
        let b = store.create_model("v2").unwrap();
        assert!(store.active_model().unwrap().is_none());

        store.activate_model(a).unwrap();
        assert_eq!(store.active_model().unwrap().unwrap().id, a);

        store.activate_model(b).unwrap();
        let models = store.list_models().unwrap();
        for model in &models {
            assert_eq!(model.is_active, model.id == b);
        }
        assert_eq!(store.active_model().unwrap().unwrap().id, b);

        assert!(matches!(
            store.activate_model(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
        // the failed activation did not disturb the active flag
        assert_eq!(store.active_model().unwrap().unwrap().id, b);
    }

    #[test]
    fn test_training_job_lifecycle() {
        let store = temp_store();
        let model_id = store.create_model("v1").unwrap();
        let job_id = store.start_training_job(model_id).unwrap();

        let job = store.get_training_job(job_id).unwrap();
        assert_eq!(job.model_id, model_id);
        assert_eq!(job.status, TrainingStatus::InProgress);
        assert!(job.metrics.is_none());
        assert!(job.completed_at.is_none());

        let mut metrics = Metrics::new();
        metrics.insert(String::from("loss"), MetricValue::Number(0.12));
        metrics.insert(String::from("epochs"), MetricValue::Number(50.0));
        store
            .update_training_job(job_id, TrainingStatus::InProgress, Some(metrics.clone()))
            .unwrap();
        let job = store.get_training_job(job_id).unwrap();
        assert_eq!(job.metrics, Some(metrics.clone()));
        assert!(job.completed_at.is_none());

        // terminal update without metrics keeps the stored map
        store
            .update_training_job(job_id, TrainingStatus::Completed, None)
            .unwrap();
        let job = store.get_training_job(job_id).unwrap();
        assert_eq!(job.status, TrainingStatus::Completed);
        assert_eq!(job.metrics, Some(metrics));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_training_job_terminal_is_final() {
        let store = temp_store();
        let model_id = store.create_model("v1").unwrap();
        let job_id = store.start_training_job(model_id).unwrap();
        store
            .update_training_job(job_id, TrainingStatus::Completed, None)
            .unwrap();

        let err = store
            .update_training_job(job_id, TrainingStatus::InProgress, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
        assert_eq!(
            store.get_training_job(job_id).unwrap().status,
            TrainingStatus::Completed
        );

        // re-asserting the terminal status is also rejected
        assert!(store
            .update_training_job(job_id, TrainingStatus::Completed, None)
            .is_err());
    }

    #[test]
    fn test_training_job_unknown_ids() {
        let store = temp_store();
        assert!(matches!(
            store.start_training_job(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.update_training_job(Uuid::new_v4(), TrainingStatus::Completed, None),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_ordering_is_creation_order() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let first = store.record_image(agent_id, "/img/1.jpg").unwrap();
        let second = store.record_image(agent_id, "/img/2.jpg").unwrap();
        let third = store.record_image(agent_id, "/img/3.jpg").unwrap();
        let ids: Vec<Uuid> = store
            .list_images(agent_id)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![first, second, third]);
        // listing under an absent parent is an empty result, not an error
        assert!(store.list_images(Uuid::new_v4()).unwrap().is_empty());
    }

    #[test]
    fn test_labeling_scenario() {
        let store = temp_store();
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();
        let label_id = store.ensure_label("cat").unwrap();
        let annotation = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let metadata_id = store
            .add_label_metadata(image_id, label_id, annotation)
            .unwrap();

        let rows = store.list_label_metadata(image_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, metadata_id);
        assert_eq!(rows[0].bbox, annotation);
        assert_eq!(rows[0].label_id, label_id);

        let by_label = store.list_label_metadata_for_label(label_id).unwrap();
        assert_eq!(by_label.len(), 1);
        assert_eq!(by_label[0].image_id, image_id);
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("persist.sqlite3");
        let agent_id;
        {
            let store = DatabaseStore::open_default(&path).unwrap();
            agent_id = store.register_agent("host1", "alice").unwrap();
            store.close();
        }
        let store = DatabaseStore::open_default(&path).unwrap();
        assert_eq!(store.get_agent(agent_id).unwrap().hostname, "host1");
    }

    #[test]
    fn test_custom_score_range() {
        let store = temp_store_with(StoreConfig {
            score_range: crate::configuration::types::ScoreRange {
                min: 0.0,
                max: 100.0,
            },
            ..StoreConfig::default()
        });
        let agent_id = store.register_agent("host1", "alice").unwrap();
        let image_id = store.record_image(agent_id, "/img/1.jpg").unwrap();
        store.record_prediction(image_id, bbox(), "car", 42.0).unwrap();
        assert!(matches!(
            store.record_prediction(image_id, bbox(), "car", 100.5),
            Err(StoreError::Validation(_))
        ));
    }
}
