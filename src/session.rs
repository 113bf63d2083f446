use std::sync::Arc;

use moka::future::Cache;
use parking_lot::Mutex;
use tracing::info;

use crate::{
    backend::CourseBackend,
    config::Config,
    course::{ContentTree, Course, CourseId, LearnerId, Lesson, LessonId},
    enrollment::{EnrollmentReconciler, EnrollmentState, Reconciliation, RetryPolicy},
    error::{Error, Result},
    progress::{ProgressSnapshot, ProgressTracker},
    sync::{Mutation, SyncCoordinator, SyncOutcome},
    utils::with_timeout,
};

/// One learner viewing one course.
///
/// State is rehydrated from the server on open and lives as long as the session. Callers
/// only read it; changes go through [`CourseSession::reconcile`] and
/// [`CourseSession::complete_lesson`].
pub struct CourseSession {
    course: Course,
    tree: Arc<ContentTree>,
    reconciler: EnrollmentReconciler,
    tracker: Arc<Mutex<ProgressTracker>>,
    coordinator: SyncCoordinator,
    retry_policy: RetryPolicy,
}

impl CourseSession {
    pub async fn open(
        backend: Arc<dyn CourseBackend>,
        course_id: CourseId,
        learner_id: LearnerId,
        config: &Config,
    ) -> Result<Self> {
        let timeout = config.request_timeout();
        let course = with_timeout(timeout, backend.course(course_id)).await?;
        let lessons = with_timeout(timeout, backend.lessons(course_id)).await?;
        let tree = Arc::new(ContentTree::build(&lessons, config.tree.lessons_per_module)?);

        let reconciler = EnrollmentReconciler::new(backend.clone(), course_id, learner_id, timeout);
        let enrollment = reconciler.check_enrollment().await?;
        let (completed, remote_percentage) = match &enrollment {
            EnrollmentState::Enrolled {
                enrollment_id,
                progress_percentage,
            } => (
                with_timeout(timeout, backend.completed_lessons(*enrollment_id)).await?,
                Some(*progress_percentage),
            ),
            EnrollmentState::Completed { enrollment_id, .. } => (
                with_timeout(timeout, backend.completed_lessons(*enrollment_id)).await?,
                Some(100),
            ),
            _ => (vec![], None),
        };
        let mut tracker = ProgressTracker::new(tree.clone(), completed);
        if let Some(percentage) = remote_percentage {
            tracker.apply_remote_percentage(percentage);
        }
        info!(
            "open session learner {} course {}: {} modules, {} lessons, {}%",
            learner_id,
            course_id,
            tree.modules.len(),
            tree.total_lessons(),
            tracker.snapshot().percentage
        );

        let tracker = Arc::new(Mutex::new(tracker));
        let coordinator =
            SyncCoordinator::new(backend, reconciler.clone(), tracker.clone(), timeout);
        Ok(Self {
            course,
            tree,
            reconciler,
            tracker,
            coordinator,
            retry_policy: config.retry_policy(),
        })
    }

    pub fn course(&self) -> &Course {
        &self.course
    }

    /// Full tree, the denominator for progress.
    pub fn tree(&self) -> &Arc<ContentTree> {
        &self.tree
    }

    /// What the learner may open right now: everything once entitled, preview lessons before.
    pub fn visible_tree(&self) -> Arc<ContentTree> {
        if self.enrollment().is_entitled() {
            self.tree.clone()
        } else {
            Arc::new(self.tree.preview_only())
        }
    }

    pub fn enrollment(&self) -> EnrollmentState {
        self.reconciler.state()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.tracker.lock().snapshot().clone()
    }

    pub fn open_lesson(&self, lesson_id: LessonId) -> Result<&Lesson> {
        let lesson = self.tree.get_lesson(lesson_id).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "lesson {} is not part of course {}",
                lesson_id, self.course.id
            ))
        })?;
        if lesson.is_preview || self.enrollment().is_entitled() {
            Ok(lesson)
        } else {
            Err(Error::NotEntitled {
                course_id: self.course.id,
                learner_id: self.reconciler.learner_id(),
            })
        }
    }

    pub async fn check_enrollment(&self) -> Result<EnrollmentState> {
        self.reconciler.check_enrollment().await
    }

    /// Wait for entitlement after a purchase, with the configured retry policy.
    pub fn reconcile(&self) -> Reconciliation {
        self.reconcile_with(self.retry_policy)
    }

    pub fn reconcile_with(&self, policy: RetryPolicy) -> Reconciliation {
        self.reconciler.reconcile_with_retry(policy)
    }

    pub async fn apply_optimistic(&self, mutation: Mutation) -> Result<SyncOutcome> {
        self.coordinator.apply_optimistic(mutation).await
    }

    pub async fn complete_lesson(&self, lesson_id: LessonId) -> Result<SyncOutcome> {
        self.apply_optimistic(Mutation::CompleteLesson(lesson_id))
            .await
    }

    pub async fn report_course_completion(&self) -> Result<SyncOutcome> {
        self.coordinator.report_course_completion().await
    }
}

type SessionKey = (LearnerId, CourseId);

/// Open sessions, keyed by learner and course, dropped after they sit idle.
pub struct SessionRegistry {
    backend: Arc<dyn CourseBackend>,
    config: Config,
    sessions: Cache<SessionKey, Arc<CourseSession>>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn CourseBackend>, config: Config) -> Self {
        let sessions = Cache::builder()
            .max_capacity(config.sessions.capacity)
            .time_to_idle(config.session_idle())
            .build();
        Self {
            backend,
            config,
            sessions,
        }
    }

    pub async fn get_or_open(
        &self,
        learner_id: LearnerId,
        course_id: CourseId,
    ) -> Result<Arc<CourseSession>> {
        let backend = self.backend.clone();
        let config = self.config.clone();
        self.sessions
            .try_get_with((learner_id, course_id), async move {
                CourseSession::open(backend, course_id, learner_id, &config)
                    .await
                    .map(Arc::new)
            })
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    pub async fn close(&self, learner_id: LearnerId, course_id: CourseId) {
        self.sessions.invalidate(&(learner_id, course_id)).await;
    }
}
