//! The acting user, as supplied by the surrounding application.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
}

impl Actor {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Supplies the actor for `completed_by`, `created_by` and `used_by` fields.
pub trait IdentityProvider: Send + Sync {
    fn current_actor(&self) -> Actor;
}

/// Always answers with the same actor. Useful for batch jobs and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Actor);

impl IdentityProvider for StaticIdentity {
    fn current_actor(&self) -> Actor {
        self.0.clone()
    }
}
