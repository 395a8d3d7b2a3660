//! In-memory asset store

use cueplay_ap::audio::AssetReader;
use cueplay_ap::playback::normalize_path;
use std::collections::HashMap;
use std::io;

/// Case-insensitive in-memory assets, keyed like the clip cache
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&mut self, path: &str, bytes: Vec<u8>) {
        self.files.insert(normalize_path(path), bytes);
    }
}

impl AssetReader for MemoryAssets {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no asset {}", path)))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(&normalize_path(path))
    }
}
