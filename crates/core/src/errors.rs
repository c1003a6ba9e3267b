use thiserror::Error;

use crate::domain::request::{RequestStatus, StepStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("field `{field}` must not be empty")]
    EmptyField { field: &'static str },
    #[error("field `{field}` exceeds {max_words} words (got {words})")]
    WordLimitExceeded { field: &'static str, words: usize, max_words: usize },
    #[error("a rejection requires a non-empty comment")]
    CommentRequired,
    #[error("comment exceeds {max_chars} characters (got {chars})")]
    CommentTooLong { chars: usize, max_chars: usize },
}

/// Transition preconditions are checked in a fixed order; the first failure
/// wins and the aggregate is left untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request is already finalized as {status:?}")]
    InvalidState { status: RequestStatus },
    #[error("action targets level {given} but the request is at level {expected}")]
    InvalidLevel { expected: u32, given: u32 },
    #[error("level {level} was already resolved as {status:?}")]
    LevelAlreadyResolved { level: u32, status: StepStatus },
    #[error("actor `{actor_id}` may not perform this action")]
    Forbidden { actor_id: String },
}
