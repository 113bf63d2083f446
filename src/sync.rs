use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{
    backend::{CourseBackend, RemoteStatus, whole_percent},
    course::{EnrollmentId, LessonId},
    enrollment::{EnrollmentReconciler, EnrollmentState},
    error::{Error, Result},
    progress::{ProgressSnapshot, ProgressTracker},
    utils::{now, with_timeout},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    CompleteLesson(LessonId),
}

#[derive(Debug)]
pub enum SyncOutcome {
    Committed {
        snapshot: ProgressSnapshot,
        /// The course completion call went through on this mutation
        course_just_completed: bool,
    },
    /// Progress is stored but marking the course completed failed,
    /// retry with [`SyncCoordinator::report_course_completion`].
    CompletionFailed {
        snapshot: ProgressSnapshot,
        error: Error,
    },
    /// The lesson is back to incomplete, `error` is [`Error::ProgressSyncFailed`].
    RolledBack {
        snapshot: ProgressSnapshot,
        error: Error,
    },
}

impl SyncOutcome {
    pub fn snapshot(&self) -> &ProgressSnapshot {
        match self {
            SyncOutcome::Committed { snapshot, .. }
            | SyncOutcome::CompletionFailed { snapshot, .. }
            | SyncOutcome::RolledBack { snapshot, .. } => snapshot,
        }
    }
}

/// A lesson applied locally and waiting for its progress call.
struct PendingLesson {
    lesson_id: LessonId,
    before: ProgressSnapshot,
    applied: u64,
}

/// What one progress call carried.
struct Dispatch {
    percentage: u8,
    generation: u64,
    lessons: BTreeSet<LessonId>,
}

/// Applies progress mutations locally first, then confirms or rolls them back.
///
/// Remote progress calls are serialized: a mutation arriving while another is in flight is
/// applied locally right away but waits for its remote call. The remote half of a mutation
/// runs on its own task, so it finishes with a commit or a rollback even when the caller
/// stops waiting.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn CourseBackend>,
    reconciler: EnrollmentReconciler,
    tracker: Arc<Mutex<ProgressTracker>>,
    in_flight: tokio::sync::Mutex<()>,
    completion_reported: AtomicBool,
    request_timeout: Duration,
}

impl SyncCoordinator {
    pub fn new(
        backend: Arc<dyn CourseBackend>,
        reconciler: EnrollmentReconciler,
        tracker: Arc<Mutex<ProgressTracker>>,
        request_timeout: Duration,
    ) -> Self {
        let already_completed = matches!(reconciler.state(), EnrollmentState::Completed { .. });
        Self {
            shared: Arc::new(Shared {
                backend,
                reconciler,
                tracker,
                in_flight: tokio::sync::Mutex::new(()),
                completion_reported: AtomicBool::new(already_completed),
                request_timeout,
            }),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared.snapshot()
    }

    pub async fn apply_optimistic(&self, mutation: Mutation) -> Result<SyncOutcome> {
        match mutation {
            Mutation::CompleteLesson(lesson_id) => self.complete_lesson(lesson_id).await,
        }
    }

    async fn complete_lesson(&self, lesson_id: LessonId) -> Result<SyncOutcome> {
        let enrollment_id = self.shared.enrollment_id()?;
        let pending = {
            let mut tracker = self.shared.tracker.lock();
            if tracker.is_synced(lesson_id) {
                return Ok(SyncOutcome::Committed {
                    snapshot: tracker.snapshot().clone(),
                    course_just_completed: false,
                });
            }
            let before = tracker.snapshot().clone();
            tracker.complete_lesson(lesson_id)?;
            PendingLesson {
                lesson_id,
                before,
                applied: tracker.generation(),
            }
        };

        let shared = self.shared.clone();
        tokio::spawn(async move { shared.sync_lesson(enrollment_id, pending).await })
            .await
            .map_err(|e| Error::InvariantViolation(format!("progress sync task failed: {e}")))?
    }

    /// Retry the course completion call after a [`SyncOutcome::CompletionFailed`].
    pub async fn report_course_completion(&self) -> Result<SyncOutcome> {
        let shared = &self.shared;
        let enrollment_id = shared.enrollment_id()?;
        let _in_flight = shared.in_flight.lock().await;
        let snapshot = shared.snapshot();
        if !snapshot.is_course_complete {
            return Err(Error::InvariantViolation(format!(
                "course is only {}% complete",
                snapshot.percentage
            )));
        }
        if shared.completion_reported.load(Ordering::SeqCst) {
            return Ok(SyncOutcome::Committed {
                snapshot,
                course_just_completed: false,
            });
        }
        Ok(shared.report_completion(enrollment_id, snapshot).await)
    }
}

impl Shared {
    fn snapshot(&self) -> ProgressSnapshot {
        self.tracker.lock().snapshot().clone()
    }

    async fn sync_lesson(
        &self,
        enrollment_id: EnrollmentId,
        mut pending: PendingLesson,
    ) -> Result<SyncOutcome> {
        let lesson_id = pending.lesson_id;
        let _in_flight = self.in_flight.lock().await;
        let dispatch = {
            let mut tracker = self.tracker.lock();
            // covered by an earlier call that carried the queued lessons
            if tracker.is_synced(lesson_id) {
                return Ok(SyncOutcome::Committed {
                    snapshot: tracker.snapshot().clone(),
                    course_just_completed: false,
                });
            }
            // rolled back by a failed call while this one was queued
            if !tracker.is_completed(lesson_id) {
                pending.before = tracker.snapshot().clone();
                tracker.complete_lesson(lesson_id)?;
                pending.applied = tracker.generation();
            }
            let snapshot = tracker.snapshot();
            Dispatch {
                percentage: snapshot.percentage,
                generation: tracker.generation(),
                lessons: snapshot.completed_lesson_ids.clone(),
            }
        };

        let result = with_timeout(
            self.request_timeout,
            self.backend.update_progress(enrollment_id, dispatch.percentage),
        )
        .await;
        let remote = match result {
            Ok(remote) => remote,
            Err(e) => {
                warn!("progress sync for lesson {} failed, rolling back: {}", lesson_id, e);
                let snapshot = {
                    let mut tracker = self.tracker.lock();
                    if tracker.generation() == pending.applied
                        && !pending.before.completed_lesson_ids.contains(&lesson_id)
                    {
                        tracker.restore(pending.before);
                        tracker.snapshot().clone()
                    } else {
                        tracker.revert_lesson(lesson_id)
                    }
                };
                return Ok(SyncOutcome::RolledBack {
                    snapshot,
                    error: Error::ProgressSyncFailed {
                        lesson_id,
                        source: Box::new(e),
                    },
                });
            }
        };

        let committed = whole_percent(remote.progress_percentage);
        let snapshot = {
            let mut tracker = self.tracker.lock();
            tracker.mark_synced(&dispatch.lessons);
            // a newer local mutation is queued and its answer will supersede this one
            if tracker.generation() == dispatch.generation {
                tracker.apply_remote_percentage(committed)
            } else {
                tracker.snapshot().clone()
            }
        };
        self.reconciler.set_progress(committed);
        if dispatch.percentage == 100
            && committed == 100
            && !self.completion_reported.load(Ordering::SeqCst)
        {
            return Ok(self.report_completion(enrollment_id, snapshot).await);
        }
        Ok(SyncOutcome::Committed {
            snapshot,
            course_just_completed: false,
        })
    }

    async fn report_completion(
        &self,
        enrollment_id: EnrollmentId,
        snapshot: ProgressSnapshot,
    ) -> SyncOutcome {
        let result = with_timeout(
            self.request_timeout,
            self.backend.complete_enrollment(enrollment_id),
        )
        .await
        .and_then(|completion| match completion.status {
            RemoteStatus::Completed => Ok(()),
            status => Err(Error::NetworkFailure(format!(
                "completion answered with status {status:?}"
            ))),
        });
        match result {
            Ok(()) => {
                info!("course completion reported for enrollment {}", enrollment_id);
                self.completion_reported.store(true, Ordering::SeqCst);
                self.reconciler.mark_completed(now());
                SyncOutcome::Committed {
                    snapshot,
                    course_just_completed: true,
                }
            }
            Err(error) => {
                error!(
                    "marking enrollment {} completed failed: {}",
                    enrollment_id, error
                );
                SyncOutcome::CompletionFailed { snapshot, error }
            }
        }
    }

    fn enrollment_id(&self) -> Result<EnrollmentId> {
        self.reconciler
            .state()
            .enrollment_id()
            .ok_or(Error::NotEntitled {
                course_id: self.reconciler.course_id(),
                learner_id: self.reconciler.learner_id(),
            })
    }
}
