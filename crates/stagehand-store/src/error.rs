use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("there must be at least one layer in a layered store")]
    NoLayers,

    #[error("invalid property snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
