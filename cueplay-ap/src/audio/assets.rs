//! Asset access
//!
//! Audio files are read whole into memory; the codec then walks the bytes
//! with a [`crate::audio::ByteCursor`].

use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Source of raw asset bytes
pub trait AssetReader {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    fn exists(&self, path: &str) -> bool;
}

/// Reads assets from the filesystem, optionally below a root directory
#[derive(Debug, Clone, Default)]
pub struct FsAssetReader {
    root: Option<PathBuf>,
}

impl FsAssetReader {
    pub fn new() -> Self {
        Self { root: None }
    }

    /// Resolve relative asset paths against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl AssetReader for FsAssetReader {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let resolved = self.resolve(path);
        trace!("Reading asset {}", resolved.display());
        std::fs::read(resolved)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("beep.raw")).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        let reader = FsAssetReader::with_root(dir.path());
        assert!(reader.exists("beep.raw"));
        assert_eq!(reader.read("beep.raw").unwrap(), vec![1, 2, 3]);
        assert!(!reader.exists("missing.raw"));
        assert_eq!(
            reader.read("missing.raw").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
