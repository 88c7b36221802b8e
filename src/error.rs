use thiserror::Error;

/// Everything that can go wrong while serving a quiz. All variants are
/// recoverable at the request boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("question {0} not found")]
    QuestionNotFound(i64),

    #[error("no questions match the requested filters")]
    EmptyPool,

    #[error("unknown or expired quiz session")]
    SessionNotStarted,

    #[error("quiz session is already complete")]
    SessionComplete,

    #[error("quiz session still has unanswered questions")]
    SessionInProgress,

    #[error("'{0}' is not one of this question's choices")]
    InvalidChoice(String),

    #[error("invalid question: {0}")]
    InvalidQuestion(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
