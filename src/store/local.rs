//! Local filesystem store.

use super::{Capacity, FileStore, ReadSeek, StoreWriter};
use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// A store rooted at one directory.
///
/// The directory is created on construction. Capacity is the free and total
/// space of the filesystem holding it.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens (creating if needed) a store at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Opens a store at `base/sub_path`.
    pub fn with_sub_path<P: AsRef<Path>>(base: P, sub_path: &str) -> Result<Self> {
        Self::open(base.as_ref().join(sub_path))
    }

    /// The directory holding this store's files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(Error::invalid_argument(format!("Invalid file name: {:?}", name)));
        }
        Ok(self.root.join(name))
    }
}

impl StoreWriter for BufWriter<File> {
    fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.get_ref().sync_all()?;
        Ok(())
    }
}

impl FileStore for LocalStore {
    fn label(&self) -> String {
        self.root.display().to_string()
    }

    fn open(&self, name: &str) -> Result<Box<dyn ReadSeek>> {
        let file = File::open(self.path_of(name)?)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn create(&self, name: &str) -> Result<Box<dyn StoreWriter>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path_of(name)?)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_of(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_len(&self, name: &str) -> Result<u64> {
        Ok(fs::metadata(self.path_of(name)?)?.len())
    }

    fn capacity(&self) -> Result<Capacity> {
        let free_bytes = fs2::available_space(&self.root)?;
        let total_bytes = fs2::total_space(&self.root)?;
        Ok(Capacity { free_bytes, total_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_create_open_list_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::with_sub_path(temp_dir.path(), "scope").unwrap();
        assert!(store.root().ends_with("scope"));

        {
            let mut w = store.create("b.seg").unwrap();
            w.write_all(b"hello").unwrap();
            w.flush().unwrap();
        }
        store.create("a.seg").unwrap().flush().unwrap();

        assert_eq!(store.list().unwrap(), vec!["a.seg".to_string(), "b.seg".to_string()]);
        assert_eq!(store.file_len("b.seg").unwrap(), 5);

        let mut contents = String::new();
        store.open("b.seg").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");

        store.remove("b.seg").unwrap();
        store.remove("b.seg").unwrap();
        assert_eq!(store.list().unwrap(), vec!["a.seg".to_string()]);
    }

    #[test]
    fn test_synced_file_is_complete() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();

        let mut w = store.create("c.seg").unwrap();
        w.write_all(&[7u8; 10_000]).unwrap();
        w.sync().unwrap();
        // Visible before the writer is dropped
        assert_eq!(store.file_len("c.seg").unwrap(), 10_000);
        drop(w);
        assert_eq!(fs::read(temp_dir.path().join("c.seg")).unwrap(), vec![7u8; 10_000]);
    }

    #[test]
    fn test_capacity_reports_space() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        let cap = store.capacity().unwrap();
        assert!(cap.total_bytes > 0);
        assert!(cap.free_bytes <= cap.total_bytes);
    }

    #[test]
    fn test_rejects_path_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path()).unwrap();
        assert!(store.create("../escape").is_err());
        assert!(store.open("").is_err());
    }
}
