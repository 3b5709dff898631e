//! Actor identity attached to every appended event.

use serde::{Deserialize, Serialize};

/// Kind of principal performing an action.
///
/// Signer keys carry a purpose that must match the actor type at append time,
/// so the set is closed and the wire names are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    /// The substrate itself (bootstrap key).
    Server,
    /// Automated principals (pipelines, schedulers, integrations).
    Robot,
    /// Human operators.
    Operator,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Server => "server",
            ActorType::Robot => "robot",
            ActorType::Operator => "operator",
        }
    }
}

impl core::fmt::Display for ActorType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to the principal that caused an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRef {
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    pub id: String,
}

impl ActorRef {
    pub fn new(actor_type: ActorType, id: impl Into<String>) -> Self {
        Self {
            actor_type,
            id: id.into(),
        }
    }

    pub fn server() -> Self {
        Self::new(ActorType::Server, "server")
    }

    pub fn robot(id: impl Into<String>) -> Self {
        Self::new(ActorType::Robot, id)
    }

    pub fn operator(id: impl Into<String>) -> Self {
        Self::new(ActorType::Operator, id)
    }
}
