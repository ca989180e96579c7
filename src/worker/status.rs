use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Coarse position of a worker in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Step {
    Nascent,
    AboutToGetUri,
    AboutToBeginProcessor,
    HandlingException,
    AboutToReturnUri,
    Finishing,
    Finished,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nascent => "NASCENT",
            Self::AboutToGetUri => "ABOUT_TO_GET_URI",
            Self::AboutToBeginProcessor => "ABOUT_TO_BEGIN_PROCESSOR",
            Self::HandlingException => "HANDLING_EXCEPTION",
            Self::AboutToReturnUri => "ABOUT_TO_RETURN_URI",
            Self::Finishing => "FINISHING",
            Self::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub serial: u32,
    pub step: Step,
    pub step_since: DateTime<Utc>,

    /// URI currently held, if any
    pub current_uri: Option<String>,
    pub uri_since: Option<DateTime<Utc>>,
    pub current_processor: Option<String>,

    /// URIs returned to the frontier by this worker
    pub processed: u64,
}

impl WorkerStatus {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            step: Step::Nascent,
            step_since: Utc::now(),
            current_uri: None,
            uri_since: None,
            current_processor: None,
            processed: 0,
        }
    }

    pub fn set_step(&mut self, step: Step) {
        self.step = step;
        self.step_since = Utc::now();
    }

    /// Records that the worker took `uri` from the frontier
    pub fn begin_uri(&mut self, uri: &str) {
        let now = Utc::now();
        self.current_uri = Some(uri.to_string());
        self.uri_since = Some(now);
        self.current_processor = None;
    }

    /// Records that the worker is about to run a processor chain
    pub fn begin_chain(&mut self) {
        self.current_processor = None;
        self.set_step(Step::AboutToBeginProcessor);
    }

    pub fn begin_processor(&mut self, name: &str) {
        self.current_processor = Some(name.to_string());
        self.set_step(Step::AboutToBeginProcessor);
    }

    /// Records that the held URI was returned to the frontier
    pub fn end_uri(&mut self) {
        self.current_uri = None;
        self.uri_since = None;
        self.current_processor = None;
        self.processed += 1;
    }

    /// Returns true while the worker holds a URI
    pub fn is_active(&self) -> bool {
        self.current_uri.is_some()
    }

    /// One report line, e.g.
    /// `#3 ACTIVE for 2s ABOUT_TO_BEGIN_PROCESSOR fetch https://example.com/`
    pub fn report_line(&self, now: DateTime<Utc>) -> String {
        let mut line = match (&self.current_uri, self.uri_since) {
            (Some(uri), Some(since)) => {
                let held = (now - since).num_seconds().max(0);
                let mut line = format!("#{} ACTIVE for {}s {}", self.serial, held, self.step);
                if let Some(processor) = &self.current_processor {
                    line.push(' ');
                    line.push_str(processor);
                }
                line.push(' ');
                line.push_str(uri);
                line
            }
            _ => {
                let idle = (now - self.step_since).num_seconds().max(0);
                format!("#{} WAITING for {}s {}", self.serial, idle, self.step)
            }
        };
        line.push_str(&format!(" ({} done)", self.processed));
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_status() {
        let status = WorkerStatus::new(3);
        assert_eq!(status.step, Step::Nascent);
        assert!(!status.is_active());
        assert_eq!(status.processed, 0);
    }

    #[test]
    fn test_uri_lifecycle() {
        let mut status = WorkerStatus::new(1);
        status.begin_uri("https://example.com/");
        status.begin_processor("fetch");
        assert!(status.is_active());
        assert_eq!(status.step, Step::AboutToBeginProcessor);

        status.end_uri();
        assert!(!status.is_active());
        assert!(status.current_processor.is_none());
        assert_eq!(status.processed, 1);
    }

    #[test]
    fn test_chain_without_named_processor() {
        let mut status = WorkerStatus::new(2);
        status.set_step(Step::AboutToGetUri);
        status.begin_uri("https://example.com/");
        status.begin_processor("fetch");
        status.begin_chain();

        assert_eq!(status.step, Step::AboutToBeginProcessor);
        assert!(status.current_processor.is_none());
        let later = status.uri_since.unwrap() + Duration::seconds(1);
        assert_eq!(
            status.report_line(later),
            "#2 ACTIVE for 1s ABOUT_TO_BEGIN_PROCESSOR https://example.com/ (0 done)"
        );
    }

    #[test]
    fn test_report_line() {
        let mut status = WorkerStatus::new(7);
        status.set_step(Step::AboutToGetUri);
        let later = status.step_since + Duration::seconds(5);
        assert_eq!(
            status.report_line(later),
            "#7 WAITING for 5s ABOUT_TO_GET_URI (0 done)"
        );

        status.begin_uri("https://example.com/");
        status.begin_processor("fetch");
        let later = status.uri_since.unwrap() + Duration::seconds(2);
        assert_eq!(
            status.report_line(later),
            "#7 ACTIVE for 2s ABOUT_TO_BEGIN_PROCESSOR fetch https://example.com/ (0 done)"
        );
    }
}
