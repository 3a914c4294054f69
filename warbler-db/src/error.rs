use crate::fanout::FanOutReport;
use crate::loader::LoadError;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;
use warbler_common::model::ModelValidationError;
use warbler_common::model::post::PostId;
use warbler_common::model::user::{UserId, Username};

pub type Result<T, E = TimelineError> = std::result::Result<T, E>;

/// The coarse classification callers act on.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    StorageUnavailable,
    InconsistentState,
}

/// A write of a multi-step protocol whose failure leaves the arrangements
/// disagreeing.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum IndexStep {
    CanonicalWrite,
    RemoveOldEntry,
    InsertNewEntry,
}

impl Display for IndexStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let step = match self {
            IndexStep::CanonicalWrite => "canonical like count update",
            IndexStep::RemoveOldEntry => "popularity entry removal",
            IndexStep::InsertNewEntry => "popularity entry insertion",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("Post {post} by user {author} was not found")]
    PostNotFound { author: UserId, post: PostId },
    #[error("The feed of user {0} is empty")]
    EmptyFeed(UserId),
    #[error("User {0} has no username")]
    UnknownUser(UserId),
    #[error("No user is named {0:?}")]
    UnknownUsername(Username),
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ModelValidationError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("Post {post} was left inconsistent by a failed {step}: {source}")]
    InconsistentState {
        post: PostId,
        step: IndexStep,
        source: StoreError,
    },
    #[error(
        "Fan-out failed for {} of {} followers",
        .0.failed.len(),
        .0.total()
    )]
    PartialFanOut(FanOutReport),
    #[error("Bulk load failed: {0}")]
    Load(#[from] LoadError),
}

impl TimelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TimelineError::PostNotFound { .. }
            | TimelineError::EmptyFeed(_)
            | TimelineError::UnknownUser(_)
            | TimelineError::UnknownUsername(_) => ErrorKind::NotFound,
            TimelineError::InvalidArgument(_) | TimelineError::Load(_) => {
                ErrorKind::InvalidArgument
            }
            TimelineError::Storage(StoreError::Data(_))
            | TimelineError::InconsistentState { .. }
            | TimelineError::PartialFanOut(_) => ErrorKind::InconsistentState,
            TimelineError::Storage(_) => ErrorKind::StorageUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{ErrorKind, IndexStep, TimelineError};
    use crate::store::StoreError;
    use warbler_common::model::post::PostId;

    #[test]
    fn inconsistent_state_names_the_step() {
        let err = TimelineError::InconsistentState {
            post: PostId::from(12),
            step: IndexStep::InsertNewEntry,
            source: StoreError::Unavailable(sqlx::Error::PoolTimedOut),
        };

        assert_eq!(err.kind(), ErrorKind::InconsistentState);
        assert!(err.to_string().contains("popularity entry insertion"));
    }

    #[test]
    fn storage_failures_are_unavailable() {
        let err = TimelineError::from(StoreError::Unavailable(sqlx::Error::PoolClosed));
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }
}
