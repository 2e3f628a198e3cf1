use std::fmt::Display;

use serde::Serialize;
use thiserror::Error;

/// Unified application error type to simplify bubbling errors through the pipeline.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request. {0}")]
    Validation(String),
    #[error("Dependency unavailable. {0}")]
    DependencyUnavailable(String),
    #[error("Error generating embeddings. {0}")]
    Embedding(String),
    #[error("Error rendering the plot. {0}")]
    Render(String),
    #[error("Errored while handling a file. {0}")]
    Io(#[from] std::io::Error),
    #[error("Error serializing json. {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("Error reading configuration. {0}")]
    Config(#[from] figment::Error),
    #[error("Error encoding the image. {0}")]
    Image(#[from] image::ImageError),
    #[error("Error decoding base64 data. {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Runtime error. {0}")]
    TokioJoin(#[from] tokio::task::JoinError),
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of [`AppError`] used by callers to decide on retries
/// and by the response envelope to pick a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    DependencyUnavailable,
    Embedding,
    Render,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::Embedding => "embedding",
            ErrorKind::Render => "render",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::Config(_) => ErrorKind::Validation,
            AppError::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            AppError::Embedding(_) => ErrorKind::Embedding,
            AppError::Render(_) | AppError::Image(_) => ErrorKind::Render,
            AppError::Io(_)
            | AppError::SerdeJson(_)
            | AppError::Base64(_)
            | AppError::TokioJoin(_)
            | AppError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller caused the failure and can fix it by resubmitting.
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl<E: std::error::Error + Send + Sync> From<plotters::drawing::DrawingAreaErrorKind<E>> for AppError {
    fn from(e: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        AppError::Render(e.to_string())
    }
}

#[cfg(feature = "local-ml")]
impl From<lean_embed_viz_local_embedder::EmbedderError> for AppError {
    fn from(e: lean_embed_viz_local_embedder::EmbedderError) -> Self {
        AppError::Embedding(e.to_string())
    }
}

/// Convenience alias for results that bubble `AppError`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(
            AppError::Validation("missing".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AppError::DependencyUnavailable("bert".into()).kind(),
            ErrorKind::DependencyUnavailable
        );
        assert_eq!(
            AppError::Embedding("bad".into()).kind(),
            ErrorKind::Embedding
        );
        assert_eq!(AppError::Render("bad".into()).kind(), ErrorKind::Render);
        let io = std::io::Error::other("disk");
        assert_eq!(AppError::from(io).kind(), ErrorKind::Internal);
    }

    #[test]
    fn only_validation_is_a_client_error() {
        assert!(AppError::Validation("x".into()).is_client_error());
        assert!(!AppError::Render("x".into()).is_client_error());
    }

    #[test]
    fn kind_displays_snake_case() {
        assert_eq!(
            ErrorKind::DependencyUnavailable.to_string(),
            "dependency_unavailable"
        );
    }
}
