use std::time::Duration;

use serde::Serialize;

use crate::course::{CourseId, LearnerId, LessonId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Flat classification of [`Error`], for callers that only need to pick a UI state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NetworkFailure,
    Timeout,
    NotEntitled,
    ReconciliationExhausted,
    ReconciliationFailed,
    ProgressSyncFailed,
    InvariantViolation,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Network failure: {0}")]
    NetworkFailure(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Legitimate answer, the learner has to purchase the course.
    #[error("Learner {learner_id} is not entitled to course {course_id}")]
    NotEntitled {
        course_id: CourseId,
        learner_id: LearnerId,
    },
    #[error("Enrollment did not appear after {attempts} attempts")]
    ReconciliationExhausted { attempts: u32 },
    #[error("Enrollment check still failing after {attempts} attempts: {source}")]
    ReconciliationFailed {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("Failed to sync completion of lesson {lesson_id}: {source}")]
    ProgressSyncFailed {
        lesson_id: LessonId,
        #[source]
        source: Box<Error>,
    },
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NetworkFailure(_) => ErrorKind::NetworkFailure,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::NotEntitled { .. } => ErrorKind::NotEntitled,
            Error::ReconciliationExhausted { .. } => ErrorKind::ReconciliationExhausted,
            Error::ReconciliationFailed { .. } => ErrorKind::ReconciliationFailed,
            Error::ProgressSyncFailed { .. } => ErrorKind::ProgressSyncFailed,
            Error::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    /// Transport level failures, the only ones the reconciler retries transparently.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkFailure(_) | Error::Timeout(_))
    }

    /// Whether the caller may offer a "try again" action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::NotEntitled { .. } | Error::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = Error::ProgressSyncFailed {
            lesson_id: 7,
            source: Box::new(Error::Timeout(Duration::from_secs(10))),
        };
        assert_eq!(err.kind(), ErrorKind::ProgressSyncFailed);
        assert!(err.is_retryable());
        assert!(!err.is_transient());
        assert!(Error::NetworkFailure("reset".into()).is_transient());

        let not_entitled = Error::NotEntitled {
            course_id: 1,
            learner_id: 2,
        };
        assert!(!not_entitled.is_retryable());
        assert!(!Error::InvariantViolation("x".into()).is_retryable());
        assert_eq!(
            not_entitled.to_string(),
            "Learner 2 is not entitled to course 1"
        );
    }
}
