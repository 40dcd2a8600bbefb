use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::blob::{BlobId, BlobStore};
use crate::error::{StoreError, StoreResult};

/// Blob store keeping one file per blob under `<root>/docs/<xx>/<id>`,
/// where `xx` is the first two characters of the identifier.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use `root` as the store directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("docs"))?;
        debug!(root = %root.display(), "opened blob directory");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, id: &BlobId) -> StoreResult<PathBuf> {
        let raw = id.as_str();
        let valid = raw.len() >= 2
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(StoreError::InvalidBlobId(raw.to_string()));
        }
        Ok(self.root.join("docs").join(&raw[..2]).join(raw))
    }
}

fn not_found(id: &BlobId, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::BlobNotFound(id.clone())
    } else {
        StoreError::Io(err)
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, data: &mut dyn Read) -> StoreResult<BlobId> {
        let id = BlobId::generate();
        let path = self.path_of(&id)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let copied = File::create(&path).and_then(|file| {
            let mut out = BufWriter::new(file);
            let n = io::copy(data, &mut out)?;
            out.flush()?;
            Ok(n)
        });
        match copied {
            Ok(len) => {
                debug!(blob = %id, len, "blob written");
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&path) {
                    warn!(blob = %id, error = %cleanup, "failed to remove partial blob");
                }
                Err(StoreError::Io(e))
            }
        }
    }

    fn open(&self, id: &BlobId) -> StoreResult<Box<dyn Read + Send>> {
        let file = File::open(self.path_of(id)?).map_err(|e| not_found(id, e))?;
        Ok(Box::new(file))
    }

    fn delete(&self, id: &BlobId) -> StoreResult<()> {
        fs::remove_file(self.path_of(id)?).map_err(|e| not_found(id, e))?;
        debug!(blob = %id, "blob deleted");
        Ok(())
    }

    fn exists(&self, id: &BlobId) -> StoreResult<bool> {
        Ok(self.path_of(id)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FailingReader;

    fn store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn write_read_delete() {
        let (_dir, store) = store();
        let payload = vec![7u8; 10_000];
        let id = store.write(&mut payload.as_slice()).unwrap();
        assert!(store.exists(&id).unwrap());
        assert_eq!(store.read_all(&id).unwrap().as_ref(), payload.as_slice());

        store.delete(&id).unwrap();
        assert!(!store.exists(&id).unwrap());
        assert!(matches!(store.delete(&id), Err(StoreError::BlobNotFound(_))));
    }

    #[test]
    fn files_are_sharded_by_prefix() {
        let (dir, store) = store();
        let id = store.write(&mut &b"abc"[..]).unwrap();
        let expected = dir
            .path()
            .join("docs")
            .join(&id.as_str()[..2])
            .join(id.as_str());
        assert!(expected.is_file());
    }

    #[test]
    fn rejects_path_like_ids() {
        let (_dir, store) = store();
        for raw in ["../etc", "a", "", "ab/cd"] {
            assert!(matches!(
                store.open(&BlobId::new(raw)),
                Err(StoreError::InvalidBlobId(_))
            ));
        }
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let (dir, store) = store();
        let result = store.write(&mut FailingReader { ok_bytes: 100 });
        assert!(matches!(result, Err(StoreError::Io(_))));

        let leftovers = fs::read_dir(dir.path().join("docs"))
            .unwrap()
            .flat_map(|shard| fs::read_dir(shard.unwrap().path()).unwrap())
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn reopen_sees_existing_blobs() {
        let (dir, store) = store();
        let id = store.write(&mut &b"persisted"[..]).unwrap();
        let reopened = FsBlobStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read_all(&id).unwrap().as_ref(), b"persisted");
    }
}
