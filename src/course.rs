pub mod lesson;
pub mod tree;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use lesson::{Lesson, Module, ModuleKey};
pub use tree::{ContentTree, build_tree, build_tree_with};

pub type CourseId = i64;
pub type LessonId = i64;
pub type ModuleId = i64;
pub type LearnerId = i64;
pub type EnrollmentId = i64;

/// Catalog record, read-only for the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: CourseId,
    pub title: String,
    pub instructor_id: i64,
    #[serde(default)]
    pub total_duration_seconds: u64,
}
