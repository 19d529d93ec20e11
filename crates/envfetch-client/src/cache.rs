//! Directory-based cache of raw envelopes, one file per credential id.

use std::io;
use std::path::PathBuf;

use tokio::sync::oneshot;

/// Disk store keyed by credential id. Writes are whole-file replacements
/// staged through a temp file and renamed into place, so a concurrent
/// reader never observes torn contents.
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Open the cache at `dir`, or at `$HOME/.envkey/cache` when `None`.
    /// The directory is created on first use.
    pub fn new(dir: Option<PathBuf>) -> io::Result<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => default_dir()?,
        };
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Read the last cached envelope for the id.
    pub async fn read(&self, id: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.dir.join(id)).await
    }

    /// Persist the raw envelope, fire-and-forget. The returned channel
    /// fires once the write settles, successfully or not; callers needing
    /// quiescence may await it, the fetch path only polls it.
    pub fn write(&self, id: &str, bytes: Vec<u8>) -> oneshot::Receiver<()> {
        let path = self.dir.join(id);
        let staging = self.dir.join(format!(".{id}.tmp"));
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = async {
                tokio::fs::write(&staging, &bytes).await?;
                tokio::fs::rename(&staging, &path).await
            }
            .await;
            match result {
                Ok(()) => tracing::debug!(path = %path.display(), "cached envelope"),
                Err(error) => tracing::warn!(%error, "cache write failed"),
            }
            let _ = done_tx.send(());
        });

        done_rx
    }

    /// Remove the entry for the id. A missing entry is not an error.
    pub async fn delete(&self, id: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.dir.join(id)).await {
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn default_dir() -> io::Result<PathBuf> {
    let base = directories::BaseDirs::new().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "could not determine the home directory",
        )
    })?;
    Ok(base.home_dir().join(".envkey").join("cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path().to_path_buf())).unwrap();

        cache.write("id-1", b"envelope".to_vec()).await.unwrap();
        assert_eq!(cache.read("id-1").await.unwrap(), b"envelope");
    }

    #[tokio::test]
    async fn test_write_replaces_previous_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path().to_path_buf())).unwrap();

        cache.write("id-1", b"old".to_vec()).await.unwrap();
        cache.write("id-1", b"new".to_vec()).await.unwrap();
        assert_eq!(cache.read("id-1").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_read_missing_entry_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path().to_path_buf())).unwrap();
        assert!(cache.read("absent").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path().to_path_buf())).unwrap();

        cache.write("id-1", b"envelope".to_vec()).await.unwrap();
        cache.delete("id-1").await.unwrap();
        cache.delete("id-1").await.unwrap();
        assert!(cache.read("id-1").await.is_err());
    }

    #[tokio::test]
    async fn test_no_staging_file_left_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Cache::new(Some(tmp.path().to_path_buf())).unwrap();

        cache.write("id-1", b"envelope".to_vec()).await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("id-1")]);
    }
}
