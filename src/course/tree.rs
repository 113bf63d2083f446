use std::collections::{BTreeSet, HashMap};

use schemars::JsonSchema;
use serde::Serialize;
use tracing::warn;

use super::{
    LessonId, ModuleId,
    lesson::{Lesson, Module, ModuleKey},
};
use crate::error::{Error, Result};

/// Block size used when a lesson carries no module id: lessons 1..=5 form module 1,
/// 6..=10 module 2, and so on.
pub const DEFAULT_LESSONS_PER_MODULE: i64 = 5;

pub fn synthetic_module_id(order_index: i64, lessons_per_module: i64) -> ModuleId {
    (order_index - 1).div_euclid(lessons_per_module) + 1
}

pub fn build_tree(lessons: &[Lesson]) -> Vec<Module> {
    build_tree_with(lessons, DEFAULT_LESSONS_PER_MODULE)
}

/// Group flat lessons into ordered modules.
///
/// Lessons are stably sorted by `order_index`, so ties keep their input order. Lessons
/// without a module id are put into synthetic modules of `lessons_per_module` lessons by
/// their order index. Modules that declare a `module_order_index` come first in that order,
/// the rest follow in order of first appearance.
pub fn build_tree_with(lessons: &[Lesson], lessons_per_module: i64) -> Vec<Module> {
    let lessons_per_module = lessons_per_module.max(1);
    let mut sorted: Vec<&Lesson> = lessons.iter().collect();
    sorted.sort_by_key(|l| l.order_index);

    let mut modules: Vec<Module> = vec![];
    let mut positions: HashMap<ModuleKey, usize> = HashMap::new();
    for lesson in sorted {
        let key = match lesson.module_id {
            Some(id) => ModuleKey::Catalog(id),
            None => {
                ModuleKey::Synthetic(synthetic_module_id(lesson.order_index, lessons_per_module))
            }
        };
        let pos = *positions.entry(key).or_insert_with(|| {
            let module = match key {
                ModuleKey::Catalog(id) => Module::new(
                    key,
                    lesson
                        .module_title
                        .clone()
                        .unwrap_or_else(|| format!("Module {id}")),
                    lesson.module_order_index,
                ),
                ModuleKey::Synthetic(id) => Module::new(key, format!("Module {id}"), None),
            };
            modules.push(module);
            modules.len() - 1
        });
        let module = &mut modules[pos];
        if module.order_index.is_none() && !module.synthetic {
            module.order_index = lesson.module_order_index;
        }
        if module
            .lessons
            .last()
            .is_some_and(|last| last.order_index == lesson.order_index)
        {
            warn!(
                "lesson {} shares order index {} with lesson {} in module {}",
                lesson.id,
                lesson.order_index,
                module.lessons.last().map(|l| l.id).unwrap_or_default(),
                module.id
            );
        }
        module.push(lesson.clone());
    }
    modules.sort_by_key(|m| (m.order_index.is_none(), m.order_index));
    modules
}

/// Built module tree of one course, with a lesson id index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ContentTree {
    pub modules: Vec<Module>,
    #[serde(skip)]
    lesson_ids: BTreeSet<LessonId>,
}

impl ContentTree {
    /// Build and check that every lesson id is unique.
    pub fn build(lessons: &[Lesson], lessons_per_module: i64) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for lesson in lessons {
            if !seen.insert(lesson.id) {
                return Err(Error::InvariantViolation(format!(
                    "lesson id {} listed more than once",
                    lesson.id
                )));
            }
        }
        Ok(Self::from_modules(build_tree_with(lessons, lessons_per_module)))
    }

    pub fn from_modules(modules: Vec<Module>) -> Self {
        let lesson_ids = modules
            .iter()
            .flat_map(|m| m.lessons.iter().map(|l| l.id))
            .collect();
        Self {
            modules,
            lesson_ids,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lesson> {
        self.modules.iter().flat_map(|m| m.lessons.iter())
    }

    pub fn total_lessons(&self) -> usize {
        self.lesson_ids.len()
    }

    pub fn total_duration_seconds(&self) -> u64 {
        self.modules.iter().map(|m| m.total_duration_seconds).sum()
    }

    pub fn contains(&self, id: LessonId) -> bool {
        self.lesson_ids.contains(&id)
    }

    pub fn lesson_ids(&self) -> &BTreeSet<LessonId> {
        &self.lesson_ids
    }

    pub fn get_module(&self, key: ModuleKey) -> Option<&Module> {
        self.modules.iter().find(|m| m.key() == key)
    }

    pub fn get_lesson(&self, id: LessonId) -> Option<&Lesson> {
        self.modules.iter().find_map(|m| m.get_lesson(id))
    }

    /// Subset a learner without entitlement may open.
    pub fn preview_only(&self) -> ContentTree {
        Self::from_modules(self.modules.iter().filter_map(Module::preview_only).collect())
    }

    pub fn get_table_of_contents(&self) -> String {
        let mut toc = String::new();
        for (i, module) in self.modules.iter().enumerate() {
            toc.push_str(&format!(
                "{}. {} ({}s)\n",
                i + 1,
                module.title,
                module.total_duration_seconds
            ));
            for lesson in &module.lessons {
                let preview = if lesson.is_preview { " [preview]" } else { "" };
                toc.push_str(&format!(
                    "  - [{}] {} ({}s){}\n",
                    lesson.id, lesson.title, lesson.duration_seconds, preview
                ));
            }
        }
        toc
    }
}
