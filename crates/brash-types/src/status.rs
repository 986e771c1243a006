//! Exit statuses collected while running commands.

use serde::{Deserialize, Serialize};

use crate::source::SpanId;

/// Exit statuses of a group of processes, with the token that started each.
///
/// Filled when process substitutions are waited on, and by pipelines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusArray {
    pub codes: Vec<i32>,
    pub locations: Vec<SpanId>,
}

impl StatusArray {
    pub fn push(&mut self, code: i32, location: SpanId) {
        self.codes.push(code);
        self.locations.push(location);
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// First non-zero status, or 0 when all succeeded.
    pub fn first_failure(&self) -> i32 {
        self.codes.iter().copied().find(|&c| c != 0).unwrap_or(0)
    }
}

/// Statuses reported by a simple command or pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    /// Status of each pipeline stage; one entry for a simple command.
    pub pipe_status: Vec<i32>,
    /// Whether the command was a pipeline with `!` in front.
    pub negated: bool,
}

impl CommandStatus {
    /// The status of the last stage, inverted when negated.
    pub fn status(&self) -> i32 {
        let last = self.pipe_status.last().copied().unwrap_or(0);
        if self.negated {
            i32::from(last == 0)
        } else {
            last
        }
    }
}
