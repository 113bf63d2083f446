use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{LessonId, ModuleId};

/// Flat lesson record as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: LessonId,
    /// Missing on legacy courses, see [`super::tree::build_tree_with`]
    #[serde(default)]
    pub module_id: Option<ModuleId>,
    #[serde(default)]
    pub module_title: Option<String>,
    #[serde(default)]
    pub module_order_index: Option<i64>,
    pub title: String,
    pub order_index: i64,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub media_url: Option<String>,
    /// Viewable without entitlement
    #[serde(default)]
    pub is_preview: bool,
}

/// Identity of a module. Catalog and synthetic ids come from different number spaces, so
/// `Catalog(1)` and `Synthetic(1)` are different modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleKey {
    Catalog(ModuleId),
    Synthetic(ModuleId),
}

/// A group of lessons, derived by the tree builder.
///
/// `id` alone is only unique among modules of the same origin, use [`Module::key`] to
/// tell modules apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: ModuleId,
    pub title: String,
    pub order_index: Option<i64>,
    /// Assigned by block fallback rather than by the catalog
    pub synthetic: bool,
    pub lessons: Vec<Lesson>,
    pub total_duration_seconds: u64,
}

impl Module {
    pub(super) fn new(key: ModuleKey, title: String, order_index: Option<i64>) -> Self {
        let (id, synthetic) = match key {
            ModuleKey::Catalog(id) => (id, false),
            ModuleKey::Synthetic(id) => (id, true),
        };
        Self {
            id,
            title,
            order_index,
            synthetic,
            lessons: vec![],
            total_duration_seconds: 0,
        }
    }

    pub fn key(&self) -> ModuleKey {
        if self.synthetic {
            ModuleKey::Synthetic(self.id)
        } else {
            ModuleKey::Catalog(self.id)
        }
    }

    pub(super) fn push(&mut self, lesson: Lesson) {
        self.total_duration_seconds += lesson.duration_seconds;
        self.lessons.push(lesson);
    }

    pub fn get_lesson(&self, id: LessonId) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == id)
    }

    /// Copy holding only the preview lessons, `None` if there are none.
    pub fn preview_only(&self) -> Option<Module> {
        let mut module = Module::new(self.key(), self.title.clone(), self.order_index);
        for lesson in self.lessons.iter().filter(|l| l.is_preview) {
            module.push(lesson.clone());
        }
        (!module.lessons.is_empty()).then_some(module)
    }
}
