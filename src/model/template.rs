//! Checklist and procedure templates referenced by schedules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// One checklist item. Completion is tracked per `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    pub order: u32,
}

/// One step of a written procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    pub order: u32,
}

impl ChecklistItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            image_ref: None,
            order,
        }
    }

    pub fn has_media(&self) -> bool {
        self.image_ref.is_some()
    }
}

impl ProcedureStep {
    pub fn new(id: impl Into<String>, text: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            image_ref: None,
            order,
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    pub fn has_media(&self) -> bool {
        self.image_ref.is_some()
    }
}

/// Entries that can be kept in display order.
pub trait Ordered {
    fn order(&self) -> u32;
}

impl Ordered for ChecklistItem {
    fn order(&self) -> u32 {
        self.order
    }
}

impl Ordered for ProcedureStep {
    fn order(&self) -> u32 {
        self.order
    }
}

/// A named, ordered list of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template<T> {
    pub id: Uuid,
    pub name: String,
    entries: Vec<T>,
}

impl<T: Ordered> Template<T> {
    /// Entries are sorted by `order` on construction.
    pub fn new(name: impl Into<String>, mut entries: Vec<T>) -> Self {
        entries.sort_by_key(Ordered::order);
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            entries,
        }
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type ChecklistTemplate = Template<ChecklistItem>;
pub type ProcedureTemplate = Template<ProcedureStep>;

/// Source of templates referenced (not owned) by schedules.
pub trait TemplateStore: Send + Sync {
    fn checklist(&self, id: Uuid) -> Option<ChecklistTemplate>;
    fn procedure(&self, id: Uuid) -> Option<ProcedureTemplate>;
}

#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    checklists: RwLock<HashMap<Uuid, ChecklistTemplate>>,
    procedures: RwLock<HashMap<Uuid, ProcedureTemplate>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_checklist(&self, template: ChecklistTemplate) -> Uuid {
        let id = template.id;
        if let Ok(mut map) = self.checklists.write() {
            map.insert(id, template);
        }
        id
    }

    pub fn add_procedure(&self, template: ProcedureTemplate) -> Uuid {
        let id = template.id;
        if let Ok(mut map) = self.procedures.write() {
            map.insert(id, template);
        }
        id
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn checklist(&self, id: Uuid) -> Option<ChecklistTemplate> {
        self.checklists.read().ok()?.get(&id).cloned()
    }

    fn procedure(&self, id: Uuid) -> Option<ProcedureTemplate> {
        self.procedures.read().ok()?.get(&id).cloned()
    }
}
