// src/supervisor/state.rs

use std::fmt;

use serde::Serialize;

/// Where a supervised process is in its life.
///
/// Variants are declared in escalation order, so `state > Running` means
/// shutdown has begun and `state >= SendingSigkill` means SIGKILL went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Running,
    TimedOut,
    SendingSigterm,
    SendingSigkill,
    Abandoned,
    Finished,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SupervisorState::Abandoned | SupervisorState::Finished)
    }

    pub fn is_shutting_down(self) -> bool {
        self > SupervisorState::Running && !self.is_terminal()
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::Running => "RUNNING",
            SupervisorState::TimedOut => "TIMED_OUT",
            SupervisorState::SendingSigterm => "SENDING_SIGTERM",
            SupervisorState::SendingSigkill => "SENDING_SIGKILL",
            SupervisorState::Abandoned => "ABANDONED",
            SupervisorState::Finished => "FINISHED",
        };
        f.write_str(s)
    }
}
