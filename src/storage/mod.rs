mod incidents;

pub use incidents::{FileIncidentStore, IncidentRecord};

use thiserror::Error;
use uuid::Uuid;

use crate::analytics::IncidentEvent;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("incident {0} not found")]
    NotFound(Uuid),
}

/// Durable home for incidents. Shared between the session runner and the API.
pub trait IncidentStore: Send + Sync {
    fn persist(&self, event: &IncidentEvent) -> Result<Uuid, StoreError>;

    fn count(&self) -> usize;
}
