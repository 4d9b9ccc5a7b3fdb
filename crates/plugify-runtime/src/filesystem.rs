//! Filesystem collaborator.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from filesystem operations, with the path that caused them
#[derive(Debug, Error)]
pub enum FsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    fn io(path: &Path, source: io::Error) -> Self {
        FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory enumeration controls.
#[derive(Default)]
pub struct EnumerateOptions<'a> {
    /// Descend into subdirectories
    pub recursive: bool,

    /// Depth limit when recursing; `None` means unbounded
    pub max_depth: Option<usize>,

    /// Keep only files with this extension (no leading dot)
    pub extension: Option<&'a str>,

    /// Arbitrary per-path filter applied after the extension check
    pub filter: Option<&'a dyn Fn(&Path) -> bool>,
}

/// Filesystem access used by the runtime. All fallible operations return
/// `Result`; the runtime never panics on missing files.
pub trait FileSystem: Send + Sync {
    fn read_text(&self, path: &Path) -> Result<String, FsError>;
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, FsError>;
    fn write_text(&self, path: &Path, text: &str) -> Result<(), FsError>;
    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), FsError>;
    fn exists(&self, path: &Path) -> bool;
    fn is_directory(&self, path: &Path) -> bool;
    fn create_directories(&self, path: &Path) -> Result<(), FsError>;

    /// List files under `dir` according to `options`. Directories
    /// themselves are not returned.
    fn enumerate(&self, dir: &Path, options: &EnumerateOptions<'_>)
        -> Result<Vec<PathBuf>, FsError>;
}

/// [`FileSystem`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl StdFileSystem {
    fn walk(
        dir: &Path,
        options: &EnumerateOptions<'_>,
        depth: usize,
        out: &mut Vec<PathBuf>,
    ) -> Result<(), FsError> {
        let entries = std::fs::read_dir(dir).map_err(|e| FsError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| FsError::io(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                let descend = options.recursive
                    && options.max_depth.map_or(true, |limit| depth + 1 < limit);
                if descend {
                    Self::walk(&path, options, depth + 1, out)?;
                }
                continue;
            }
            if let Some(ext) = options.extension {
                if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                    continue;
                }
            }
            if let Some(filter) = options.filter {
                if !filter(&path) {
                    continue;
                }
            }
            out.push(path);
        }
        Ok(())
    }
}

impl FileSystem for StdFileSystem {
    fn read_text(&self, path: &Path) -> Result<String, FsError> {
        std::fs::read_to_string(path).map_err(|e| FsError::io(path, e))
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        std::fs::read(path).map_err(|e| FsError::io(path, e))
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<(), FsError> {
        std::fs::write(path, text).map_err(|e| FsError::io(path, e))
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<(), FsError> {
        std::fs::write(path, bytes).map_err(|e| FsError::io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_directory(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_directories(&self, path: &Path) -> Result<(), FsError> {
        std::fs::create_dir_all(path).map_err(|e| FsError::io(path, e))
    }

    fn enumerate(
        &self,
        dir: &Path,
        options: &EnumerateOptions<'_>,
    ) -> Result<Vec<PathBuf>, FsError> {
        let mut out = Vec::new();
        Self::walk(dir, options, 0, &mut out)?;
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_text() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdFileSystem;
        let path = dir.path().join("hello.txt");

        fs.write_text(&path, "hello").unwrap();
        assert!(fs.exists(&path));
        assert_eq!(fs.read_text(&path).unwrap(), "hello");
    }

    #[test]
    fn test_missing_file_is_error() {
        let fs = StdFileSystem;
        assert!(fs.read_text(Path::new("/no/such/file")).is_err());
    }

    #[test]
    fn test_enumerate_with_extension_filter() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdFileSystem;
        fs.write_text(&dir.path().join("a.pplugin"), "{}").unwrap();
        fs.write_text(&dir.path().join("b.txt"), "").unwrap();
        let nested = dir.path().join("sub");
        fs.create_directories(&nested).unwrap();
        fs.write_text(&nested.join("c.pplugin"), "{}").unwrap();

        let flat = fs
            .enumerate(
                dir.path(),
                &EnumerateOptions {
                    extension: Some("pplugin"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(flat.len(), 1);

        let recursive = fs
            .enumerate(
                dir.path(),
                &EnumerateOptions {
                    recursive: true,
                    extension: Some("pplugin"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(recursive.len(), 2);
    }

    #[test]
    fn test_enumerate_depth_limit_and_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let fs = StdFileSystem;
        let deep = dir.path().join("a/b");
        fs.create_directories(&deep).unwrap();
        fs.write_text(&dir.path().join("top.txt"), "").unwrap();
        fs.write_text(&dir.path().join("a/mid.txt"), "").unwrap();
        fs.write_text(&deep.join("deep.txt"), "").unwrap();

        let capped = fs
            .enumerate(
                dir.path(),
                &EnumerateOptions {
                    recursive: true,
                    max_depth: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(capped.len(), 2);

        let filter = |path: &Path| path.file_stem().is_some_and(|s| s == "mid");
        let filtered = fs
            .enumerate(
                dir.path(),
                &EnumerateOptions {
                    recursive: true,
                    filter: Some(&filter),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
    }
}
