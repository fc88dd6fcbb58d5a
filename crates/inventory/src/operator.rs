use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pharmastock_core::{DomainResult, Entity, OperatorId};

use crate::values::{optional_text, required_text};

/// The actor recorded on a stock movement.
///
/// Only identity lives here; credentials and sessions belong to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: OperatorId,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Operator {
    pub fn register(
        id: OperatorId,
        username: &str,
        display_name: Option<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Ok(Self {
            id,
            username: required_text("username", username)?,
            display_name: optional_text(display_name),
            created_at,
        })
    }
}

impl Entity for Operator {
    type Id = OperatorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
