use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CourseBackend, RemoteCompletion, RemoteEnrollment, RemoteProgress, RemoteStatus};
use crate::{
    course::{Course, CourseId, EnrollmentId, LearnerId, Lesson, LessonId},
    error::{Error, Result},
};

/// Canned answer for one enrollment check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scripted {
    Enrolled(EnrollmentId, f64),
    Completed(EnrollmentId),
    NotEnrolled,
    Fail,
    Hang,
}

/// In-memory collaborator with call counters.
pub struct MockBackend {
    pub lessons: Vec<Lesson>,
    pub completed: Vec<LessonId>,
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    pub enrollment_calls: AtomicUsize,
    pub progress_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub fail_progress: AtomicBool,
    pub fail_complete: AtomicBool,
    /// Server-side recalculated percentage, otherwise the sent value is echoed
    pub remote_percentage: Mutex<Option<f64>>,
    pub sent_percentages: Mutex<Vec<u8>>,
    progress_delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockBackend {
    pub fn new(lessons: Vec<Lesson>, fallback: Scripted) -> Self {
        Self {
            lessons,
            completed: vec![],
            script: Mutex::new(VecDeque::new()),
            fallback,
            enrollment_calls: AtomicUsize::new(0),
            progress_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            fail_progress: AtomicBool::new(false),
            fail_complete: AtomicBool::new(false),
            remote_percentage: Mutex::new(None),
            sent_percentages: Mutex::new(vec![]),
            progress_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answers used before falling back to the default.
    pub fn with_script(self, script: impl IntoIterator<Item = Scripted>) -> Self {
        self.script.lock().extend(script);
        self
    }

    pub fn with_completed(mut self, completed: Vec<LessonId>) -> Self {
        self.completed = completed;
        self
    }

    pub fn with_progress_delay(mut self, delay: Duration) -> Self {
        self.progress_delay = delay;
        self
    }

    pub fn enrollment_calls(&self) -> usize {
        self.enrollment_calls.load(Ordering::SeqCst)
    }

    pub fn progress_calls(&self) -> usize {
        self.progress_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CourseBackend for MockBackend {
    async fn course(&self, course_id: CourseId) -> Result<Course> {
        Ok(Course {
            id: course_id,
            title: format!("Course {course_id}"),
            instructor_id: 1,
            total_duration_seconds: self.lessons.iter().map(|l| l.duration_seconds).sum(),
        })
    }

    async fn lessons(&self, _course_id: CourseId) -> Result<Vec<Lesson>> {
        Ok(self.lessons.clone())
    }

    async fn enrollment(
        &self,
        _course_id: CourseId,
        _learner_id: LearnerId,
    ) -> Result<RemoteEnrollment> {
        self.enrollment_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.script.lock().pop_front().unwrap_or(self.fallback);
        let not_enrolled = RemoteEnrollment {
            is_enrolled: false,
            enrollment_id: None,
            progress_percentage: 0.0,
            status: None,
            completed_at: None,
        };
        match answer {
            Scripted::Enrolled(id, progress) => Ok(RemoteEnrollment {
                is_enrolled: true,
                enrollment_id: Some(id),
                progress_percentage: progress,
                status: Some(RemoteStatus::Active),
                ..not_enrolled
            }),
            Scripted::Completed(id) => Ok(RemoteEnrollment {
                is_enrolled: true,
                enrollment_id: Some(id),
                progress_percentage: 100.0,
                status: Some(RemoteStatus::Completed),
                ..not_enrolled
            }),
            Scripted::NotEnrolled => Ok(not_enrolled),
            Scripted::Fail => Err(Error::NetworkFailure("connection reset".to_string())),
            Scripted::Hang => std::future::pending().await,
        }
    }

    async fn completed_lessons(&self, _enrollment_id: EnrollmentId) -> Result<Vec<LessonId>> {
        Ok(self.completed.clone())
    }

    async fn update_progress(
        &self,
        _enrollment_id: EnrollmentId,
        percentage: u8,
    ) -> Result<RemoteProgress> {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_progress.load(Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.progress_delay.is_zero() {
            tokio::time::sleep(self.progress_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.sent_percentages.lock().push(percentage);
        if fail {
            return Err(Error::NetworkFailure("progress endpoint unavailable".to_string()));
        }
        let progress_percentage = self
            .remote_percentage
            .lock()
            .unwrap_or(f64::from(percentage));
        Ok(RemoteProgress {
            progress_percentage,
        })
    }

    async fn complete_enrollment(&self, _enrollment_id: EnrollmentId) -> Result<RemoteCompletion> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(Error::NetworkFailure("complete endpoint unavailable".to_string()));
        }
        Ok(RemoteCompletion {
            status: RemoteStatus::Completed,
        })
    }
}
