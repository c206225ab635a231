//! Song library: song ID → file path lookups.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::factory::SourceFactory;
use crate::session::SongId;

/// Read-only key → path lookup supplied by the host application.
pub trait SongLibrary: Send + Sync {
    fn path(&self, id: SongId) -> Option<PathBuf>;
}

impl SongLibrary for HashMap<SongId, PathBuf> {
    fn path(&self, id: SongId) -> Option<PathBuf> {
        self.get(&id).cloned()
    }
}

/// Library built from a directory tree; IDs follow sorted path order from 1.
#[derive(Clone, Debug, Default)]
pub struct DirectoryLibrary {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl DirectoryLibrary {
    pub fn scan(root: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        walk(root, &mut paths)?;
        paths.sort();
        tracing::info!(root = ?root, songs = paths.len(), "library scanned");
        Ok(Self {
            root: root.to_path_buf(),
            paths,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// `(id, path)` pairs in ID order.
    pub fn entries(&self) -> impl Iterator<Item = (SongId, &Path)> {
        self.paths
            .iter()
            .enumerate()
            .map(|(i, p)| (i as SongId + 1, p.as_path()))
    }
}

impl SongLibrary for DirectoryLibrary {
    fn path(&self, id: SongId) -> Option<PathBuf> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.paths.get(idx).cloned()
    }
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| EngineError::io(&path, e))?;
        if file_type.is_dir() {
            if let Err(e) = walk(&path, out) {
                tracing::warn!(dir = ?path, "skipping unreadable directory: {e}");
            }
        } else if SourceFactory::is_supported(&path) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_assigns_ids_in_sorted_order_and_skips_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("b_album")).unwrap();
        fs::write(dir.path().join("b_album/02.flac"), b"").unwrap();
        fs::write(dir.path().join("b_album/01.mp3"), b"").unwrap();
        fs::write(dir.path().join("a.wav"), b"").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"").unwrap();

        let lib = DirectoryLibrary::scan(dir.path()).unwrap();
        assert_eq!(lib.len(), 3);
        assert_eq!(lib.path(1), Some(dir.path().join("a.wav")));
        assert_eq!(lib.path(2), Some(dir.path().join("b_album/01.mp3")));
        assert_eq!(lib.path(3), Some(dir.path().join("b_album/02.flac")));
        assert_eq!(lib.path(0), None);
        assert_eq!(lib.path(4), None);
        assert_eq!(lib.entries().count(), 3);
    }

    #[test]
    fn scan_of_missing_root_fails() {
        let err = DirectoryLibrary::scan(Path::new("/no/such/music")).unwrap_err();
        assert!(matches!(err, EngineError::Io { .. }));
    }

    #[test]
    fn map_library_lookup() {
        let mut map: HashMap<SongId, PathBuf> = HashMap::new();
        map.insert(5, PathBuf::from("/music/x.flac"));
        assert_eq!(map.path(5), Some(PathBuf::from("/music/x.flac")));
        assert_eq!(map.path(6), None);
    }
}
