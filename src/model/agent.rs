//! Agents: who or what caused an event.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::names::{AgentKey, AgentType};

/// Identifies the actor attributed to an event.
///
/// Instances of the same [`AgentType`] are told apart by `system_id`,
/// `agent_key`, or both. With neither set, every event of that type is
/// attributed to one shared anonymous agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Agent {
    pub agent_type: AgentType,
    pub system_id: Option<i64>,
    pub agent_key: Option<AgentKey>,
}

impl Agent {
    pub fn new(agent_type: AgentType, system_id: Option<i64>, agent_key: Option<AgentKey>) -> Self {
        Self {
            agent_type,
            system_id,
            agent_key,
        }
    }

    /// Agent identified by a numeric id owned by the calling system.
    pub fn system(agent_type: AgentType, system_id: i64) -> Self {
        Self::new(agent_type, Some(system_id), None)
    }

    /// Agent identified by an external key.
    pub fn keyed(agent_type: AgentType, agent_key: AgentKey) -> Self {
        Self::new(agent_type, None, Some(agent_key))
    }

    /// The shared anonymous agent of a type.
    pub fn anonymous(agent_type: AgentType) -> Self {
        Self::new(agent_type, None, None)
    }

    pub fn is_anonymous(&self) -> bool {
        self.system_id.is_none() && self.agent_key.is_none()
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.agent_type)?;
        if let Some(system_id) = self.system_id {
            write!(f, ":{}", system_id)?;
        }
        if let Some(ref key) = self.agent_key {
            write!(f, ":{}", key)?;
        }
        Ok(())
    }
}

/// Storage-level shape of an agent, with its type resolved to an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentDto {
    pub agent_type_id: i32,
    pub system_id: Option<i64>,
    pub agent_key: Option<AgentKey>,
}
