use serde::{Deserialize, Serialize};
use std::fmt;

/// Crawl controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrawlState {
    Nascent,
    Preparing,
    Running,
    Empty,
    Pausing,
    Paused,
    Stopping,
    Finished,
}

impl CrawlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nascent => "NASCENT",
            Self::Preparing => "PREPARING",
            Self::Running => "RUNNING",
            Self::Empty => "EMPTY",
            Self::Pausing => "PAUSING",
            Self::Paused => "PAUSED",
            Self::Stopping => "STOPPING",
            Self::Finished => "FINISHED",
        }
    }

    /// RUNNING and EMPTY both count as an active crawl
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Empty)
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing crawl status, including how a crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrawlStatus {
    Created,
    Preparing,
    Running,
    WaitingForPause,
    Paused,
    Finished,
    FinishedAbnormal,
    Aborted,
}

impl CrawlStatus {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Preparing => "Preparing",
            Self::Running => "Running",
            Self::WaitingForPause => "Pausing - Waiting for workers to finish",
            Self::Paused => "Paused",
            Self::Finished => "Finished",
            Self::FinishedAbnormal => "Finished - Abnormal exit from crawling",
            Self::Aborted => "Finished - Ended by operator",
        }
    }

    /// Returns true for statuses describing an ended crawl
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::FinishedAbnormal | Self::Aborted
        )
    }

    /// Process exit code for the binary
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Finished => 0,
            Self::Aborted => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
