//! Page persistence backends.
//!
//! A [`PageStore`] holds the persistent pages of one contract plus its
//! compiled object blob. [`FileStore`] keeps each page in its own fixed-size
//! file inside the contract directory; [`MemStore`] backs tests.

use crate::errors::VmError;
use crate::memory::PAGE_SIZE;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistence backend for one contract's pages and object blob.
///
/// Implementations must be `Sync`: dirty pages are flushed from scoped
/// worker threads.
pub trait PageStore: Send + Sync {
    /// Reads a persisted page, `None` if the page was never written.
    fn get(&self, pn: u32) -> Result<Option<Vec<u8>>, VmError>;

    /// Persists a page. `page` must be exactly one page long.
    fn set(&self, pn: u32, page: &[u8]) -> Result<(), VmError>;

    /// Drops a persisted page.
    fn del(&self, pn: u32) -> Result<(), VmError>;

    /// Reads the compiled object blob.
    fn get_object(&self) -> Result<Vec<u8>, VmError>;

    /// Writes the compiled object blob.
    fn set_object(&self, blob: &[u8]) -> Result<(), VmError>;

    /// True if an object blob has been written.
    fn has_object(&self) -> bool;
}

/// File-per-page store: `<n>.pg` page files and an `ft` object blob inside
/// one contract directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) the store rooted at `dir`.
    pub fn new(dir: &Path) -> Result<Self, VmError> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn page_path(&self, pn: u32) -> PathBuf {
        self.dir.join(format!("{}.pg", pn))
    }

    fn object_path(&self) -> PathBuf {
        self.dir.join("ft")
    }
}

impl PageStore for FileStore {
    fn get(&self, pn: u32) -> Result<Option<Vec<u8>>, VmError> {
        let path = self.page_path(pn);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        if data.len() != PAGE_SIZE as usize {
            return Err(VmError::BadValue(format!(
                "page file {} has length {}",
                pn,
                data.len()
            )));
        }
        Ok(Some(data))
    }

    fn set(&self, pn: u32, page: &[u8]) -> Result<(), VmError> {
        if page.len() != PAGE_SIZE as usize {
            return Err(VmError::BadValue(format!(
                "page {} write of length {}",
                pn,
                page.len()
            )));
        }
        fs::write(self.page_path(pn), page)?;
        Ok(())
    }

    fn del(&self, pn: u32) -> Result<(), VmError> {
        let path = self.page_path(pn);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn get_object(&self) -> Result<Vec<u8>, VmError> {
        Ok(fs::read(self.object_path())?)
    }

    fn set_object(&self, blob: &[u8]) -> Result<(), VmError> {
        fs::write(self.object_path(), blob)?;
        Ok(())
    }

    fn has_object(&self) -> bool {
        self.object_path().exists()
    }
}

/// In-memory store for tests.
pub struct MemStore {
    pages: Mutex<HashMap<u32, Vec<u8>>>,
    object: Mutex<Option<Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            object: Mutex::new(None),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemStore {
    fn get(&self, pn: u32) -> Result<Option<Vec<u8>>, VmError> {
        Ok(self.pages.lock().unwrap().get(&pn).cloned())
    }

    fn set(&self, pn: u32, page: &[u8]) -> Result<(), VmError> {
        self.pages.lock().unwrap().insert(pn, page.to_vec());
        Ok(())
    }

    fn del(&self, pn: u32) -> Result<(), VmError> {
        self.pages.lock().unwrap().remove(&pn);
        Ok(())
    }

    fn get_object(&self) -> Result<Vec<u8>, VmError> {
        self.object
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VmError::MalformedObject("no object blob".into()))
    }

    fn set_object(&self, blob: &[u8]) -> Result<(), VmError> {
        *self.object.lock().unwrap() = Some(blob.to_vec());
        Ok(())
    }

    fn has_object(&self) -> bool {
        self.object.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.get(7).unwrap().is_none());
        let page = vec![3u8; PAGE_SIZE as usize];
        store.set(7, &page).unwrap();
        assert_eq!(store.get(7).unwrap().unwrap(), page);
        store.del(7).unwrap();
        assert!(store.get(7).unwrap().is_none());
    }

    #[test]
    fn file_store_rejects_short_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        assert!(store.set(0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn object_blob() {
        let store = MemStore::new();
        assert!(!store.has_object());
        store.set_object(b"blob").unwrap();
        assert!(store.has_object());
        assert_eq!(store.get_object().unwrap(), b"blob");
    }
}
