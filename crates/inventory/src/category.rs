use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmastock_core::{CategoryId, DomainResult, Entity};

use crate::values::{optional_text, required_text};

/// A drug category (e.g. antibiotics, analgesics).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update of a category. A blank or missing name keeps the current one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Category {
    pub fn create(
        id: CategoryId,
        name: &str,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            name: required_text("category name", name)?,
            description: optional_text(description),
            created_at,
        })
    }

    pub fn apply_patch(&mut self, patch: &CategoryPatch) {
        if let Some(name) = optional_text(patch.name.clone()) {
            self.name = name;
        }
        if patch.description.is_some() {
            self.description = optional_text(patch.description.clone());
        }
    }

    /// Uniqueness key: names compare case-insensitively after trimming.
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }
}

pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Entity for Category {
    type Id = CategoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
