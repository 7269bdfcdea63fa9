//! MetadataStore Trait
//!
//! This module defines the `MetadataStore` trait, the interface every
//! metadata persistence backend implements.
//!
//! Implementors are responsible for:
//! - Assigning ids and creation timestamps at write time
//! - Enforcing referential integrity between the entities
//! - Applying every write as one atomic unit of work
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::error_handling::types::StoreError;
use crate::metadata::types::{
    Agent, BoundingBox, Image, Label, LabelMetadata, Metrics, Model, Prediction, TrainingJob,
    TrainingStatus,
};
use uuid::Uuid;

/// The `MetadataStore` trait defines the persistence contract for the
/// labeling/training pipeline metadata.
///
/// Writes are atomic: they either fully succeed and become visible, or have
/// no effect. Reads are pure and return rows ordered by creation time
/// ascending unless documented otherwise.
pub trait MetadataStore: Send + Sync {
    /// Registers a data-collection agent. Both fields must be non-empty.
    fn register_agent(&self, hostname: &str, username: &str) -> Result<Uuid, StoreError>;

    /// Records a captured image under an existing agent.
    fn record_image(&self, agent_id: Uuid, file_path: &str) -> Result<Uuid, StoreError>;

    /// Returns the id of the label with this name, creating it if missing.
    ///
    /// Idempotent: concurrent callers racing on the same name all resolve
    /// to the same id.
    fn ensure_label(&self, name: &str) -> Result<Uuid, StoreError>;

    /// Attaches a ground-truth bounding-box annotation to an image.
    fn add_label_metadata(
        &self,
        image_id: Uuid,
        label_id: Uuid,
        bbox: BoundingBox,
    ) -> Result<Uuid, StoreError>;

    /// Records a model-generated detection for an image. `label` is free
    /// text and need not exist in the curated vocabulary.
    fn record_prediction(
        &self,
        image_id: Uuid,
        bbox: BoundingBox,
        label: &str,
        confidence: f64,
    ) -> Result<Uuid, StoreError>;

    /// Creates a model version. Versions are unique store-wide.
    fn create_model(&self, version: &str) -> Result<Uuid, StoreError>;

    /// Promotes this model and demotes every other one, atomically, so that
    /// at most one model is active store-wide.
    fn activate_model(&self, model_id: Uuid) -> Result<(), StoreError>;

    /// Creates a training job for a model, already running: the row is born
    /// `in_progress` with `started_at` set to now.
    fn start_training_job(&self, model_id: Uuid) -> Result<Uuid, StoreError>;

    /// Transitions a job's status and optionally replaces its metrics.
    ///
    /// Reaching a terminal status (`completed`/`failed`) stamps
    /// `completed_at`; terminal states are final.
    fn update_training_job(
        &self,
        job_id: Uuid,
        status: TrainingStatus,
        metrics: Option<Metrics>,
    ) -> Result<(), StoreError>;

    // Reads: fetch by id.

    fn get_agent(&self, id: Uuid) -> Result<Agent, StoreError>;
    fn get_image(&self, id: Uuid) -> Result<Image, StoreError>;
    fn get_label(&self, id: Uuid) -> Result<Label, StoreError>;
    fn get_label_metadata(&self, id: Uuid) -> Result<LabelMetadata, StoreError>;
    fn get_prediction(&self, id: Uuid) -> Result<Prediction, StoreError>;
    fn get_model(&self, id: Uuid) -> Result<Model, StoreError>;
    fn get_training_job(&self, id: Uuid) -> Result<TrainingJob, StoreError>;

    /// Looks a label up by its unique name.
    fn find_label(&self, name: &str) -> Result<Option<Label>, StoreError>;

    /// The currently active model, if any.
    fn active_model(&self) -> Result<Option<Model>, StoreError>;

    // Reads: list by parent. Listing under an absent parent yields an empty
    // vector; the read performs no existence check.

    fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;
    fn list_images(&self, agent_id: Uuid) -> Result<Vec<Image>, StoreError>;
    fn list_labels(&self) -> Result<Vec<Label>, StoreError>;
    fn list_label_metadata(&self, image_id: Uuid) -> Result<Vec<LabelMetadata>, StoreError>;
    fn list_label_metadata_for_label(
        &self,
        label_id: Uuid,
    ) -> Result<Vec<LabelMetadata>, StoreError>;
    fn list_predictions(&self, image_id: Uuid) -> Result<Vec<Prediction>, StoreError>;
    fn list_models(&self) -> Result<Vec<Model>, StoreError>;
    /// Ordered by `started_at` ascending.
    fn list_training_jobs(&self, model_id: Uuid) -> Result<Vec<TrainingJob>, StoreError>;
}
