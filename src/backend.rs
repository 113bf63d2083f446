pub mod http;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    course::{Course, CourseId, EnrollmentId, LearnerId, Lesson, LessonId},
    error::Result,
};

pub use http::HttpBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteStatus {
    Active,
    Completed,
    #[serde(other)]
    Other,
}

/// Enrollment record as the enrollment service reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEnrollment {
    pub is_enrolled: bool,
    #[serde(default)]
    pub enrollment_id: Option<EnrollmentId>,
    #[serde(default)]
    pub progress_percentage: f64,
    #[serde(default)]
    pub status: Option<RemoteStatus>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProgress {
    pub progress_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCompletion {
    pub status: RemoteStatus,
}

/// Server percentages are floats, the engine works in whole percent.
pub fn whole_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

/// Catalog and enrollment collaborators, behind an authenticated client.
///
/// Implementations do not need to enforce deadlines, the engine wraps every call in
/// [`crate::utils::with_timeout`].
#[async_trait]
pub trait CourseBackend: Send + Sync {
    async fn course(&self, course_id: CourseId) -> Result<Course>;

    async fn lessons(&self, course_id: CourseId) -> Result<Vec<Lesson>>;

    async fn enrollment(
        &self,
        course_id: CourseId,
        learner_id: LearnerId,
    ) -> Result<RemoteEnrollment>;

    async fn completed_lessons(&self, enrollment_id: EnrollmentId) -> Result<Vec<LessonId>>;

    async fn update_progress(
        &self,
        enrollment_id: EnrollmentId,
        percentage: u8,
    ) -> Result<RemoteProgress>;

    async fn complete_enrollment(&self, enrollment_id: EnrollmentId) -> Result<RemoteCompletion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_percent() {
        assert_eq!(whole_percent(74.6), 75);
        assert_eq!(whole_percent(-3.0), 0);
        assert_eq!(whole_percent(140.0), 100);
        assert_eq!(whole_percent(f64::NAN), 0);
    }

    #[test]
    fn test_enrollment_wire_format() {
        let enrollment: RemoteEnrollment = serde_json::from_str(
            r#"{"isEnrolled":true,"enrollmentId":9,"progressPercentage":50.0,"status":"ACTIVE"}"#,
        )
        .unwrap();
        assert_eq!(enrollment.enrollment_id, Some(9));
        assert_eq!(enrollment.status, Some(RemoteStatus::Active));
        assert_eq!(enrollment.completed_at, None);

        let unknown: RemoteEnrollment =
            serde_json::from_str(r#"{"isEnrolled":false,"status":"REFUNDED"}"#).unwrap();
        assert_eq!(unknown.status, Some(RemoteStatus::Other));
    }
}
