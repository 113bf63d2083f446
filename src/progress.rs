use std::{collections::BTreeSet, sync::Arc};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    course::{ContentTree, LessonId, Module},
    error::{Error, Result},
};

/// Completion state of a course, always derived, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Completed lessons that exist in the course tree
    pub completed_lesson_ids: BTreeSet<LessonId>,
    pub completed_count: usize,
    /// Lessons of the full course, preview or not
    pub total_count: usize,
    pub percentage: u8,
    pub is_course_complete: bool,
}

/// Whole percent, rounded half up. Never reports 100 while a lesson is still open.
pub fn compute_percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    if completed >= total {
        return 100;
    }
    let rounded = (completed * 200 + total) / (total * 2);
    rounded.min(99) as u8
}

pub fn compute_snapshot(modules: &[Module], completed: &BTreeSet<LessonId>) -> ProgressSnapshot {
    let mut total_count = 0;
    let mut completed_lesson_ids = BTreeSet::new();
    for lesson in modules.iter().flat_map(|m| m.lessons.iter()) {
        total_count += 1;
        if completed.contains(&lesson.id) {
            completed_lesson_ids.insert(lesson.id);
        }
    }
    let completed_count = completed_lesson_ids.len();
    let percentage = compute_percentage(completed_count, total_count);
    ProgressSnapshot {
        completed_lesson_ids,
        completed_count,
        total_count,
        percentage,
        is_course_complete: percentage >= 100,
    }
}

impl ProgressSnapshot {
    /// Replace the local percentage with the server's figure.
    pub fn with_remote_percentage(mut self, percentage: u8) -> Self {
        self.percentage = percentage.min(100);
        self.is_course_complete = self.percentage >= 100;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonCompletion {
    pub snapshot: ProgressSnapshot,
    /// Set only on the call that moved the course to 100%
    pub course_just_completed: bool,
}

/// Completed-lesson set of one session against the full course tree.
///
/// Lessons the server has acknowledged are tracked apart from local completions and are
/// never reverted.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    tree: Arc<ContentTree>,
    completed: BTreeSet<LessonId>,
    synced: BTreeSet<LessonId>,
    snapshot: ProgressSnapshot,
    generation: u64,
}

impl ProgressTracker {
    pub fn new(tree: Arc<ContentTree>, completed: impl IntoIterator<Item = LessonId>) -> Self {
        let completed: BTreeSet<_> = completed.into_iter().collect();
        let snapshot = compute_snapshot(&tree.modules, &completed);
        Self {
            tree,
            completed: snapshot.completed_lesson_ids.clone(),
            synced: snapshot.completed_lesson_ids.clone(),
            snapshot,
            generation: 0,
        }
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    pub fn tree(&self) -> &Arc<ContentTree> {
        &self.tree
    }

    /// Bumped on every change, lets callers tell whether state moved since they looked.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_completed(&self, lesson_id: LessonId) -> bool {
        self.completed.contains(&lesson_id)
    }

    /// Completed and acknowledged by the server.
    pub fn is_synced(&self, lesson_id: LessonId) -> bool {
        self.synced.contains(&lesson_id)
    }

    pub(crate) fn mark_synced(&mut self, lesson_ids: &BTreeSet<LessonId>) {
        self.synced.extend(lesson_ids.intersection(&self.completed).copied());
    }

    pub fn complete_lesson(&mut self, lesson_id: LessonId) -> Result<LessonCompletion> {
        if !self.tree.contains(lesson_id) {
            return Err(Error::InvariantViolation(format!(
                "lesson {lesson_id} is not part of the course"
            )));
        }
        let was_complete = self.snapshot.is_course_complete;
        if self.completed.insert(lesson_id) {
            self.recompute();
        }
        let course_just_completed = !was_complete && self.snapshot.is_course_complete;
        if course_just_completed {
            info!("all {} lessons completed", self.snapshot.total_count);
        }
        Ok(LessonCompletion {
            snapshot: self.snapshot.clone(),
            course_just_completed,
        })
    }

    pub(crate) fn revert_lesson(&mut self, lesson_id: LessonId) -> ProgressSnapshot {
        if !self.synced.contains(&lesson_id) && self.completed.remove(&lesson_id) {
            self.recompute();
        }
        self.snapshot.clone()
    }

    pub(crate) fn restore(&mut self, snapshot: ProgressSnapshot) {
        self.completed = snapshot.completed_lesson_ids.clone();
        self.synced.retain(|id| snapshot.completed_lesson_ids.contains(id));
        self.snapshot = snapshot;
        self.generation += 1;
    }

    pub(crate) fn apply_remote_percentage(&mut self, percentage: u8) -> ProgressSnapshot {
        if self.snapshot.percentage != percentage {
            info!(
                "server reports {}% where local state computes {}%",
                percentage, self.snapshot.percentage
            );
            self.snapshot = self.snapshot.clone().with_remote_percentage(percentage);
            self.generation += 1;
        }
        self.snapshot.clone()
    }

    fn recompute(&mut self) {
        self.snapshot = compute_snapshot(&self.tree.modules, &self.completed);
        self.generation += 1;
    }
}
