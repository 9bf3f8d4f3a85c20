//! Actors: depositors (stakers) and node operators driven by a scenario.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Actor identifier (address-equivalent handle).
pub type ActorId = String;

/// Beacon-chain validator index.
pub type ValidatorId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Staker,
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Staker => write!(f, "staker"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

/// A scenario participant. Persists for the scenario lifetime; ledger-side state lives in the ledger, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
    /// Human-readable name; carries the factory sequence number, not identity.
    pub name: String,
    /// Whether the actor was assigned native stake (owns at most one pod).
    pub has_pod: bool,
    /// Validators started from this actor's native stake, in creation order.
    pub validators: Vec<ValidatorId>,
}

impl Actor {
    pub fn new(id: ActorId, role: Role, name: String) -> Self {
        Self {
            id,
            role,
            name,
            has_pod: false,
            validators: Vec::new(),
        }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
