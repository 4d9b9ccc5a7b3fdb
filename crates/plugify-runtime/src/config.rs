//! Host configuration.

use plugify_core::{ErrorKind, PlugifyError};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Where the host looks for extensions and where it puts its own state.
/// All sub-paths are relative to `base_dir` and may not escape it.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub plugins_dir: PathBuf,
    pub modules_dir: PathBuf,
    pub configs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,

    /// Extension names short-circuited to `Disabled` before parsing
    pub disabled: Vec<String>,

    /// Interval of the background update pump; `None` leaves ticking to
    /// the embedder
    pub update_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_dir: PathBuf::from("."),
            plugins_dir: PathBuf::from("plugins"),
            modules_dir: PathBuf::from("modules"),
            configs_dir: PathBuf::from("configs"),
            data_dir: PathBuf::from("data"),
            logs_dir: PathBuf::from("logs"),
            disabled: Vec::new(),
            update_interval: None,
        }
    }
}

impl Config {
    /// Check that every sub-path is a clean relative path and that no two
    /// sub-paths collide.
    pub fn validate(&self) -> Result<(), PlugifyError> {
        let dirs = [
            ("pluginsDir", &self.plugins_dir),
            ("modulesDir", &self.modules_dir),
            ("configsDir", &self.configs_dir),
            ("dataDir", &self.data_dir),
            ("logsDir", &self.logs_dir),
        ];

        let mut errors = Vec::new();
        for (name, dir) in &dirs {
            if !is_clean_relative(dir) {
                errors.push(format!("{}: '{}'", name, dir.display()));
            }
        }
        if !errors.is_empty() {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                format!("Path(s) must be clean and relative: {}", errors.join(", ")),
            ));
        }

        for (i, (_, first)) in dirs.iter().enumerate() {
            for (_, second) in dirs.iter().skip(i + 1) {
                if collides(first, second) {
                    errors.push(format!("'{}' - '{}'", first.display(), second.display()));
                }
            }
        }
        if !errors.is_empty() {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                format!("Path(s) must not collide: {}", errors.join(", ")),
            ));
        }

        Ok(())
    }
}

/// Relative, non-empty, and free of `.`/`..` components.
fn is_clean_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path.is_relative()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// One path being a component-wise prefix of the other.
fn collides(first: &Path, second: &Path) -> bool {
    let mut a = first.components();
    let mut b = second.components();
    loop {
        match (a.next(), b.next()) {
            (Some(x), Some(y)) if x == y => continue,
            (Some(_), Some(_)) => return false,
            _ => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_absolute_subpath_rejected() {
        let config = Config {
            plugins_dir: PathBuf::from("/abs/plugins"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_escaping_subpath_rejected() {
        let config = Config {
            data_dir: PathBuf::from("../data"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_colliding_subpaths_rejected() {
        let config = Config {
            data_dir: PathBuf::from("state"),
            logs_dir: PathBuf::from("state/logs"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
