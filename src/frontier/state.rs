use serde::{Deserialize, Serialize};
use std::fmt;

/// States a frontier can be asked to reach, and reports having reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrontierState {
    /// Handing out work
    Run,
    /// Running, but nothing queued or in progress
    Empty,
    /// Reserved; treated like `Pause`
    Hold,
    /// Not handing out work and nothing in progress
    Pause,
    /// Terminated and every checked-out URI returned
    Finish,
}

impl FrontierState {
    /// Returns the uppercase name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "RUN",
            Self::Empty => "EMPTY",
            Self::Hold => "HOLD",
            Self::Pause => "PAUSE",
            Self::Finish => "FINISH",
        }
    }

    /// Returns true if URIs may be handed out while this is the target
    pub fn hands_out_work(&self) -> bool {
        matches!(self, Self::Run)
    }
}

impl fmt::Display for FrontierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
