use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use parking_lot::RwLock;
use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::{EnrollmentState, RetryPolicy};
use crate::{
    backend::CourseBackend,
    course::{CourseId, LearnerId},
    error::{Error, Result},
    utils::{now, with_timeout},
};

/// Sole writer of the session's [`EnrollmentState`].
#[derive(Clone)]
pub struct EnrollmentReconciler {
    backend: Arc<dyn CourseBackend>,
    course_id: CourseId,
    learner_id: LearnerId,
    request_timeout: Duration,
    state: Arc<RwLock<EnrollmentState>>,
}

impl EnrollmentReconciler {
    pub fn new(
        backend: Arc<dyn CourseBackend>,
        course_id: CourseId,
        learner_id: LearnerId,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            course_id,
            learner_id,
            request_timeout,
            state: Arc::new(RwLock::new(EnrollmentState::NotEnrolled)),
        }
    }

    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    pub fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    pub fn state(&self) -> EnrollmentState {
        self.state.read().clone()
    }

    /// One entitlement check. The answer is stored, transport errors leave the state untouched.
    pub async fn check_enrollment(&self) -> Result<EnrollmentState> {
        let state = self.fetch().await?;
        self.store(state.clone());
        Ok(state)
    }

    /// Poll entitlement on a fixed schedule until it shows up or the attempts run out.
    ///
    /// Emits `Pending` after every unsuccessful attempt but the last, then either the entitled
    /// state, or `NotEnrolled` followed by [`Error::ReconciliationExhausted`], or
    /// [`Error::ReconciliationFailed`] when the last attempt could not reach the server.
    pub fn reconcile_with_retry(&self, policy: RetryPolicy) -> Reconciliation {
        let capacity = policy.max_attempts.max(1) as usize + 2;
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.clone().run_retry(policy, tx));
        Reconciliation {
            events: ReceiverStream::new(rx),
            task,
            state: self.state.clone(),
        }
    }

    async fn run_retry(self, policy: RetryPolicy, tx: mpsc::Sender<Result<EnrollmentState>>) {
        let max_attempts = policy.max_attempts.max(1);
        let since = now();
        for attempt in 1..=max_attempts {
            let outcome = self.fetch().await;
            match outcome {
                Ok(state) if state.is_entitled() => {
                    info!(
                        "learner {} entitled to course {} after {} attempts",
                        self.learner_id, self.course_id, attempt
                    );
                    self.store(state.clone());
                    let _ = tx.send(Ok(state)).await;
                    return;
                }
                Err(e) if !e.is_transient() => {
                    error!("enrollment check for course {} failed: {}", self.course_id, e);
                    self.revert_pending();
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                outcome if attempt == max_attempts => {
                    self.finish_exhausted(outcome, max_attempts, &tx).await;
                    return;
                }
                outcome => {
                    if let Err(e) = &outcome {
                        warn!("enrollment check attempt {} failed: {}", attempt, e);
                    } else {
                        debug!("enrollment not visible yet, attempt {}", attempt);
                    }
                    let pending = EnrollmentState::Pending { attempt, since };
                    self.store(pending.clone());
                    if tx.send(Ok(pending)).await.is_err() {
                        // nobody is listening anymore
                        self.revert_pending();
                        return;
                    }
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }

    async fn finish_exhausted(
        &self,
        outcome: Result<EnrollmentState>,
        attempts: u32,
        tx: &mpsc::Sender<Result<EnrollmentState>>,
    ) {
        match outcome {
            Ok(state) => {
                warn!(
                    "enrollment for course {} still missing after {} attempts",
                    self.course_id, attempts
                );
                self.store(state.clone());
                let _ = tx.send(Ok(state)).await;
                let _ = tx.send(Err(Error::ReconciliationExhausted { attempts })).await;
            }
            Err(e) => {
                error!(
                    "enrollment check for course {} failed after {} attempts: {}",
                    self.course_id, attempts, e
                );
                self.revert_pending();
                let _ = tx
                    .send(Err(Error::ReconciliationFailed {
                        attempts,
                        source: Box::new(e),
                    }))
                    .await;
            }
        }
    }

    async fn fetch(&self) -> Result<EnrollmentState> {
        let remote = with_timeout(
            self.request_timeout,
            self.backend.enrollment(self.course_id, self.learner_id),
        )
        .await?;
        EnrollmentState::from_remote(&remote)
    }

    fn store(&self, new: EnrollmentState) {
        let mut state = self.state.write();
        // the server may lag behind a completion this session already reported
        if let (
            EnrollmentState::Completed { enrollment_id, .. },
            EnrollmentState::Enrolled {
                enrollment_id: new_id,
                ..
            },
        ) = (&*state, &new)
        {
            if enrollment_id == new_id {
                return;
            }
        }
        *state = new;
    }

    fn revert_pending(&self) {
        revert_pending(&self.state);
    }

    /// Enrolled -> Completed, once the completion call went through.
    pub(crate) fn mark_completed(&self, completed_at: OffsetDateTime) {
        let mut state = self.state.write();
        if let EnrollmentState::Enrolled { enrollment_id, .. } = *state {
            info!("enrollment {} completed", enrollment_id);
            *state = EnrollmentState::Completed {
                enrollment_id,
                completed_at,
            };
        }
    }

    pub(crate) fn set_progress(&self, percentage: u8) {
        if let EnrollmentState::Enrolled {
            progress_percentage,
            ..
        } = &mut *self.state.write()
        {
            *progress_percentage = percentage;
        }
    }
}

fn revert_pending(state: &RwLock<EnrollmentState>) {
    let mut state = state.write();
    if matches!(*state, EnrollmentState::Pending { .. }) {
        *state = EnrollmentState::NotEnrolled;
    }
}

/// Running reconciliation, a stream of states with a cancel handle.
///
/// Dropping it cancels the retries as well.
pub struct Reconciliation {
    events: ReceiverStream<Result<EnrollmentState>>,
    task: JoinHandle<()>,
    state: Arc<RwLock<EnrollmentState>>,
}

impl Reconciliation {
    /// Stop retrying. No further check is issued once this returns.
    pub async fn cancel(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
        self.events.close();
        revert_pending(&self.state);
        debug!("reconciliation cancelled");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for Reconciliation {
    type Item = Result<EnrollmentState>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for Reconciliation {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            self.task.abort();
            revert_pending(&self.state);
        }
    }
}
