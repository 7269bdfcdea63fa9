pub mod config;
pub mod types;

pub use config::StoreConfig;
pub use types::{ImageBounds, ScoreRange};
