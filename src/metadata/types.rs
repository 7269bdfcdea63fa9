use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::types::ImageBounds;
use crate::error_handling::types::StoreError;

/// A data-collection client, identified by hostname/username.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub hostname: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A captured file owned by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: Uuid,
    pub file_path: String,
    pub agent_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A named class in the curated annotation vocabulary. Names are unique
/// store-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One ground-truth bounding-box annotation linking an image to a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMetadata {
    pub id: Uuid,
    pub image_id: Uuid,
    pub label_id: Uuid,
    pub bbox: BoundingBox,
    pub created_at: DateTime<Utc>,
}

/// One model-generated detection for an image.
///
/// `label` is deliberately free text rather than a reference into the
/// curated vocabulary: predictions may name classes outside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub image_id: Uuid,
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// A versioned trained artifact. At most one model is active store-wide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: Uuid,
    pub version: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One training run for a model, tracked through a status state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: Uuid,
    pub model_id: Uuid,
    pub status: TrainingStatus,
    pub metrics: Option<Metrics>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Open-ended training-run statistics (loss, accuracy, epoch counts, ...).
pub type Metrics = BTreeMap<String, MetricValue>;

/// A single metric value, numeric or free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

/// Training-job lifecycle states.
///
/// `pending -> in_progress -> {completed, failed}`; the last two are
/// terminal and no transition moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Pending => "pending",
            TrainingStatus::InProgress => "in_progress",
            TrainingStatus::Completed => "completed",
            TrainingStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<TrainingStatus> {
        match raw {
            "pending" => Some(TrainingStatus::Pending),
            "in_progress" => Some(TrainingStatus::InProgress),
            "completed" => Some(TrainingStatus::Completed),
            "failed" => Some(TrainingStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingStatus::Completed | TrainingStatus::Failed)
    }

    /// Position along the lifecycle, used to reject backwards transitions.
    fn rank(&self) -> u8 {
        match self {
            TrainingStatus::Pending => 0,
            TrainingStatus::InProgress => 1,
            TrainingStatus::Completed | TrainingStatus::Failed => 2,
        }
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// Terminal states are final. Re-asserting the current non-terminal
    /// status is allowed (a metrics-only update while running).
    pub fn can_transition_to(&self, next: TrainingStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// An axis-aligned bounding box in image coordinates.
///
/// The store treats this as an opaque structured value; callers must agree
/// on the coordinate convention. It is persisted as a JSON column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Rejects non-finite coordinates, non-positive extents and, when the
    /// store is configured with image bounds, coordinates outside them.
    pub fn validate(&self, bounds: Option<&ImageBounds>) -> Result<(), StoreError> {
        let coords = [self.x_min, self.y_min, self.x_max, self.y_max];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(StoreError::Validation(String::from(
                "bbox coordinates must be finite",
            )));
        }
        if self.x_max <= self.x_min || self.y_max <= self.y_min {
            return Err(StoreError::Validation(format!(
                "bbox extents must be positive, got ({}, {}, {}, {})",
                self.x_min, self.y_min, self.x_max, self.y_max
            )));
        }
        if let Some(b) = bounds {
            if self.x_min < 0.0 || self.y_min < 0.0 || self.x_max > b.width || self.y_max > b.height
            {
                return Err(StoreError::Validation(format!(
                    "bbox outside image bounds {}x{}",
                    b.width, b.height
                )));
            }
        }
        Ok(())
    }
}
