pub mod configuration;
pub use configuration::config::StoreConfig;

pub mod error_handling;
pub use error_handling::types::{ConfigError, StoreError};

pub mod metadata;
pub use metadata::database_store::DatabaseStore;
pub use metadata::store_trait::MetadataStore;
