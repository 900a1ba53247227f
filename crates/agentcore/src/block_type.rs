use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every block type the engine knows how to execute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Starter,
    Agent,
    Api,
    Function,
    Router,
    Condition,
    Evaluator,
    Workflow,
    Response,
    Loop,
    Parallel,
}

impl BlockType {
    pub const ALL: [BlockType; 11] = [
        BlockType::Starter,
        BlockType::Agent,
        BlockType::Api,
        BlockType::Function,
        BlockType::Router,
        BlockType::Condition,
        BlockType::Evaluator,
        BlockType::Workflow,
        BlockType::Response,
        BlockType::Loop,
        BlockType::Parallel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Starter => "starter",
            BlockType::Agent => "agent",
            BlockType::Api => "api",
            BlockType::Function => "function",
            BlockType::Router => "router",
            BlockType::Condition => "condition",
            BlockType::Evaluator => "evaluator",
            BlockType::Workflow => "workflow",
            BlockType::Response => "response",
            BlockType::Loop => "loop",
            BlockType::Parallel => "parallel",
        }
    }

    /// Loop and parallel blocks own a body sub-graph.
    pub fn is_container(&self) -> bool {
        matches!(self, BlockType::Loop | BlockType::Parallel)
    }

    /// Router and condition blocks record a branch decision.
    pub fn is_decision(&self) -> bool {
        matches!(self, BlockType::Router | BlockType::Condition)
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BlockType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}
