//! The handle language modules get from the host.

use crate::logger::{Logger, Severity};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Host services exposed to language modules.
#[derive(Clone)]
pub struct Provider {
    logger: Arc<dyn Logger>,
    base_dir: PathBuf,
}

impl Provider {
    pub fn new(logger: Arc<dyn Logger>, base_dir: PathBuf) -> Self {
        Provider { logger, base_dir }
    }

    pub fn log(&self, message: &str, severity: Severity) {
        self.logger.log(message, severity);
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }
}
