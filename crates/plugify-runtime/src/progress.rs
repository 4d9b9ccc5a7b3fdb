//! Initialization progress reporting.

use crate::logger::{Logger, Severity};
use std::sync::Arc;

/// Receives coarse progress during `initialize`, one call per extension
/// per pipeline stage.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, stage: &str, current: usize, total: usize);
}

/// Discards progress. The default when nothing is registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {
    fn report(&self, _stage: &str, _current: usize, _total: usize) {}
}

/// Forwards progress to the logger at verbose severity.
pub struct LogProgressReporter {
    logger: Arc<dyn Logger>,
}

impl LogProgressReporter {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        LogProgressReporter { logger }
    }
}

impl ProgressReporter for LogProgressReporter {
    fn report(&self, stage: &str, current: usize, total: usize) {
        self.logger.log(
            &format!("{} {}/{}", stage, current, total),
            Severity::Verbose,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording(Mutex<Vec<(String, usize, usize)>>);

    impl ProgressReporter for Recording {
        fn report(&self, stage: &str, current: usize, total: usize) {
            self.0.lock().push((stage.to_string(), current, total));
        }
    }

    #[test]
    fn test_reporter_receives_calls() {
        let reporter = Recording(Mutex::new(Vec::new()));
        reporter.report("load", 1, 3);
        assert_eq!(reporter.0.lock()[0], ("load".to_string(), 1, 3));
    }
}
