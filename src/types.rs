use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Node identifier, unique within one dispatch.
pub type NodeId = u32;

/// Globally unique dispatch identifier (a UUID v4 string).
pub type DispatchId = String;

/// Lifecycle state of a single node.
///
/// Nodes only move forward: `NEW_OBJECT -> PENDING -> RUNNING -> terminal`.
/// `CANCELLED` may be entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    NewObject,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    fn rank(self) -> u8 {
        match self {
            NodeStatus::NewObject => 0,
            NodeStatus::Pending => 1,
            NodeStatus::Running => 2,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Whether moving from `self` to `next` is a forward transition.
    ///
    /// Re-applying the current status is not a transition, which is what
    /// makes duplicate completion events harmless.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::NewObject => "NEW_OBJECT",
            NodeStatus::Pending => "PENDING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Completed => "COMPLETED",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NEW_OBJECT" => Ok(NodeStatus::NewObject),
            "PENDING" => Ok(NodeStatus::Pending),
            "RUNNING" => Ok(NodeStatus::Running),
            "COMPLETED" => Ok(NodeStatus::Completed),
            "FAILED" => Ok(NodeStatus::Failed),
            "CANCELLED" => Ok(NodeStatus::Cancelled),
            other => Err(format!("invalid node status: {other}")),
        }
    }
}

/// Aggregate state of a whole dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    NewObject,
    Running,
    Postprocessing,
    Completed,
    Failed,
    Cancelled,
    PostprocessingFailed,
}

impl DispatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchStatus::Completed
                | DispatchStatus::Failed
                | DispatchStatus::Cancelled
                | DispatchStatus::PostprocessingFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DispatchStatus::NewObject => "NEW_OBJECT",
            DispatchStatus::Running => "RUNNING",
            DispatchStatus::Postprocessing => "POSTPROCESSING",
            DispatchStatus::Completed => "COMPLETED",
            DispatchStatus::Failed => "FAILED",
            DispatchStatus::Cancelled => "CANCELLED",
            DispatchStatus::PostprocessingFailed => "POSTPROCESSING_FAILED",
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NEW_OBJECT" => Ok(DispatchStatus::NewObject),
            "RUNNING" => Ok(DispatchStatus::Running),
            "POSTPROCESSING" => Ok(DispatchStatus::Postprocessing),
            "COMPLETED" => Ok(DispatchStatus::Completed),
            "FAILED" => Ok(DispatchStatus::Failed),
            "CANCELLED" => Ok(DispatchStatus::Cancelled),
            "POSTPROCESSING_FAILED" => Ok(DispatchStatus::PostprocessingFailed),
            other => Err(format!("invalid dispatch status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_only_move_forward() {
        assert!(NodeStatus::NewObject.can_transition_to(NodeStatus::Pending));
        assert!(NodeStatus::Pending.can_transition_to(NodeStatus::Cancelled));
        assert!(NodeStatus::Running.can_transition_to(NodeStatus::Completed));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Pending));
        assert!(!NodeStatus::Running.can_transition_to(NodeStatus::Running));
        assert!(!NodeStatus::Completed.can_transition_to(NodeStatus::Cancelled));
        assert!(!NodeStatus::Cancelled.can_transition_to(NodeStatus::Failed));
    }

    #[test]
    fn status_names_round_trip_through_strings() {
        for s in ["NEW_OBJECT", "PENDING", "RUNNING", "COMPLETED", "FAILED", "CANCELLED"] {
            let parsed: NodeStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        let parsed: DispatchStatus = "POSTPROCESSING_FAILED".parse().unwrap();
        assert_eq!(parsed, DispatchStatus::PostprocessingFailed);
        assert!(parsed.is_terminal());
        assert!(!DispatchStatus::Postprocessing.is_terminal());
    }

    #[test]
    fn serde_uses_screaming_names() {
        let json = serde_json::to_string(&NodeStatus::NewObject).unwrap();
        assert_eq!(json, "\"NEW_OBJECT\"");
    }
}
