//! Aggregate outcome of one migrator run

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

use crate::{MigrationError, MigrationResult, Version};

/// Direction of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run state machine: `Initializing → Resolving → Executing → Completed`,
/// or `Aborted` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Resolving,
    Executing,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Initializing => "initializing",
            RunState::Resolving => "resolving",
            RunState::Executing => "executing",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// First failure of a run
#[derive(Debug, Clone)]
pub struct RunFailure {
    /// Failing unit, if the failure happened while executing one
    pub version: Option<Version>,
    /// State the run was in when it failed
    pub state: RunState,
    pub error: MigrationError,
}

/// Result of a migrate or downgrade invocation. Never persisted.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub direction: Direction,
    pub state: RunState,
    /// Versions applied (or reverted) in this run, in execution order
    pub applied: Vec<Version>,
    /// Supplied units that were not executed in this run
    pub skipped: usize,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: RunState::Initializing,
            applied: Vec::new(),
            skipped: 0,
            failure: None,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    /// Move to the next state
    pub fn transition(&mut self, next: RunState) {
        tracing::debug!(direction = %self.direction, from = %self.state, to = %next, "Run state transition");
        self.state = next;
    }

    /// Record the first failure and move to `Aborted`
    pub fn abort(&mut self, version: Option<Version>, error: MigrationError) {
        if self.failure.is_none() {
            self.failure = Some(RunFailure {
                version,
                state: self.state,
                error,
            });
        }
        self.transition(RunState::Aborted);
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed && self.failure.is_none()
    }

    /// The failing unit, if any
    pub fn failed_version(&self) -> Option<Version> {
        self.failure.as_ref().and_then(|f| f.version)
    }

    pub fn error(&self) -> Option<&MigrationError> {
        self.failure.as_ref().map(|f| &f.error)
    }

    /// Convert into the throwing form: `Err(RunAborted)` carrying this result on failure
    pub fn into_result(self) -> MigrationResult<RunResult> {
        let cause = match self.error() {
            None => return Ok(self),
            Some(error) => error.clone(),
        };
        Err(MigrationError::RunAborted {
            cause: Box::new(cause),
            result: Box::new(self),
        })
    }
}
