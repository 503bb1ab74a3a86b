use thiserror::Error;

/// Failure taxonomy of the onboarding pipeline.
///
/// Document-phase failures are fatal to a request; embedding and index
/// failures are downgraded at the orchestrator boundary because vectors are
/// a rebuildable projection of the documents.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid submission: {0}")]
    InvalidInput(String),

    #[error("identity backend unavailable: {0}")]
    AuthUnavailable(String),

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
