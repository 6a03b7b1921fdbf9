//! Claim task unit derived 1:1 from a discovered item.

use serde::{Deserialize, Serialize};

use snag_protocol::Posting;

/// Reported task lifecycle positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Exhausted,
    Skipped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A queued unit of claim work. Terminal on success, permanent failure, or
/// attempt exhaustion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTask {
    pub posting: Posting,
    /// Attempts already made, including the in-flight one once dequeued.
    pub attempts: u32,
}

impl ClaimTask {
    pub fn new(posting: Posting) -> Self {
        Self {
            posting,
            attempts: 0,
        }
    }

    /// Stable task identifier: the posting id.
    pub fn id(&self) -> &str {
        &self.posting.id
    }

    /// Copy with the attempt counter advanced, for requeueing.
    pub fn next_attempt(&self) -> Self {
        Self {
            posting: self.posting.clone(),
            attempts: self.attempts + 1,
        }
    }
}
