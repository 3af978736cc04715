//! Context store errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Database error: {0}")]
    Sqlite(String),

    #[error("Summarization error: {0}")]
    Summarization(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ContextError {
    /// rusqlite 에러에 동작 설명을 붙임
    pub(crate) fn db(action: &str) -> impl FnOnce(rusqlite::Error) -> Self + '_ {
        move |e| ContextError::Sqlite(format!("Failed to {}: {}", action, e))
    }
}

impl From<ContextError> for pocket_foundation::Error {
    fn from(err: ContextError) -> Self {
        use pocket_foundation::Error;
        match err {
            ContextError::Sqlite(msg) | ContextError::Persistence(msg) => Error::Persistence(msg),
            ContextError::Summarization(msg) => Error::Summarization(msg),
            ContextError::NotFound(id) => Error::NotFound(format!("session {}", id)),
            ContextError::Json(e) => Error::Json(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_foundation() {
        let err: pocket_foundation::Error =
            ContextError::Summarization("no conversation history".into()).into();
        assert_eq!(err.kind(), "summarization");

        let err: pocket_foundation::Error = ContextError::db("insert turn")(
            rusqlite::Error::QueryReturnedNoRows,
        )
        .into();
        assert_eq!(err.kind(), "persistence");
        assert!(err.to_string().contains("Failed to insert turn"));
    }
}
