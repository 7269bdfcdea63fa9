//! Metadata subsystem
//!
//! This module provides the data model and persistence for the
//! labeling/training pipeline: agents, captured images, the curated label
//! vocabulary, ground-truth annotations, model predictions, model versions
//! and training-job history.
//!
//! Components:
//! - `types`: the entity structs and value types shared by all backends.
//! - `store_trait`: the MetadataStore trait defining a uniform API.
//! - `database_store`: SQLite implementation using sqlx.

pub mod database_store;
pub mod store_trait;
pub mod types;
