//! Acting identity recorded on every audit write.

use super::UnknownVariant;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of principal performing a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    User,
    Admin,
    System,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::User => "user",
            AgentKind::Admin => "admin",
            AgentKind::System => "system",
        }
    }
}

impl FromStr for AgentKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(AgentKind::User),
            "admin" => Ok(AgentKind::Admin),
            "system" => Ok(AgentKind::System),
            other => Err(UnknownVariant::new("agent kind", other)),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The actor on whose behalf a workflow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub user_id: i64,
    pub kind: AgentKind,
}

impl Agent {
    pub fn new(user_id: i64, kind: AgentKind) -> Self {
        Self { user_id, kind }
    }

    pub fn user(user_id: i64) -> Self {
        Self::new(user_id, AgentKind::User)
    }

    pub fn system() -> Self {
        Self::new(0, AgentKind::System)
    }
}
