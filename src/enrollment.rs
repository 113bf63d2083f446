pub mod reconciler;

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    backend::{RemoteEnrollment, RemoteStatus, whole_percent},
    course::EnrollmentId,
    error::{Error, Result},
    utils::now,
};

pub use reconciler::{EnrollmentReconciler, Reconciliation};

/// Entitlement of one learner for one course, as this session sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum EnrollmentState {
    NotEnrolled,
    /// Client-local, entitlement is expected but not visible yet
    #[serde(rename_all = "camelCase")]
    Pending {
        attempt: u32,
        #[serde(with = "time::serde::rfc3339")]
        #[schemars(with = "String")]
        since: OffsetDateTime,
    },
    #[serde(rename_all = "camelCase")]
    Enrolled {
        enrollment_id: EnrollmentId,
        progress_percentage: u8,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        enrollment_id: EnrollmentId,
        #[serde(with = "time::serde::rfc3339")]
        #[schemars(with = "String")]
        completed_at: OffsetDateTime,
    },
}

impl EnrollmentState {
    pub fn from_remote(remote: &RemoteEnrollment) -> Result<Self> {
        if !remote.is_enrolled {
            return Ok(EnrollmentState::NotEnrolled);
        }
        let enrollment_id = remote.enrollment_id.ok_or_else(|| {
            Error::InvariantViolation("enrollment reported without an enrollment id".to_string())
        })?;
        if remote.status == Some(RemoteStatus::Completed) {
            return Ok(EnrollmentState::Completed {
                enrollment_id,
                completed_at: remote.completed_at.unwrap_or_else(now),
            });
        }
        Ok(EnrollmentState::Enrolled {
            enrollment_id,
            progress_percentage: whole_percent(remote.progress_percentage),
        })
    }

    pub fn is_entitled(&self) -> bool {
        matches!(
            self,
            EnrollmentState::Enrolled { .. } | EnrollmentState::Completed { .. }
        )
    }

    pub fn enrollment_id(&self) -> Option<EnrollmentId> {
        match self {
            EnrollmentState::Enrolled { enrollment_id, .. }
            | EnrollmentState::Completed { enrollment_id, .. } => Some(*enrollment_id),
            _ => None,
        }
    }
}

/// Fixed-interval retry schedule for entitlement reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn remote(
        is_enrolled: bool,
        id: Option<EnrollmentId>,
        status: Option<RemoteStatus>,
    ) -> RemoteEnrollment {
        RemoteEnrollment {
            is_enrolled,
            enrollment_id: id,
            progress_percentage: 33.4,
            status,
            completed_at: None,
        }
    }

    #[test]
    fn test_from_remote() {
        assert_eq!(
            EnrollmentState::from_remote(&remote(false, Some(3), None)).unwrap(),
            EnrollmentState::NotEnrolled
        );
        assert_eq!(
            EnrollmentState::from_remote(&remote(true, Some(3), Some(RemoteStatus::Active)))
                .unwrap(),
            EnrollmentState::Enrolled {
                enrollment_id: 3,
                progress_percentage: 33
            }
        );
        let mut done = remote(true, Some(3), Some(RemoteStatus::Completed));
        done.completed_at = Some(datetime!(2026-01-02 03:04:05 UTC));
        assert_eq!(
            EnrollmentState::from_remote(&done).unwrap(),
            EnrollmentState::Completed {
                enrollment_id: 3,
                completed_at: datetime!(2026-01-02 03:04:05 UTC)
            }
        );
    }

    #[test]
    fn test_enrolled_without_id() {
        let err = EnrollmentState::from_remote(&remote(true, None, None)).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn test_serialized_shape() {
        let state = EnrollmentState::Enrolled {
            enrollment_id: 4,
            progress_percentage: 50,
        };
        assert_eq!(
            serde_json::to_string(&state).unwrap(),
            r#"{"state":"enrolled","enrollmentId":4,"progressPercentage":50}"#
        );
        assert!(state.is_entitled());
        assert_eq!(state.enrollment_id(), Some(4));
        assert!(!EnrollmentState::NotEnrolled.is_entitled());
    }
}
