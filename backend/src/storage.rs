use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::{Duration, Instant, SystemTime},
};

use anyhow::{anyhow, Context, Result};
use tokio::{fs, io::AsyncWriteExt};

/// Reduces a client supplied name to its final path component.
pub fn sanitize_filename(name: &str) -> Option<&str> {
    let name = Path::new(name).file_name()?.to_str()?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending { received: usize, total: usize },
    Assembled { path: PathBuf },
}

struct Tally {
    total: usize,
    received: BTreeSet<usize>,
    updated: Instant,
}

/// Keeps incoming chunks on disk until every index of a file has arrived, then
/// concatenates them in index order.
pub struct ChunkStore {
    chunk_dir: PathBuf,
    upload_dir: PathBuf,
    tallies: Mutex<HashMap<String, Tally>>,
}

impl ChunkStore {
    pub fn new(chunk_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunk_dir: chunk_dir.into(),
            upload_dir: upload_dir.into(),
            tallies: Mutex::new(HashMap::new()),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.chunk_dir)
            .await
            .with_context(|| format!("failed to create {}", self.chunk_dir.display()))?;
        fs::create_dir_all(&self.upload_dir)
            .await
            .with_context(|| format!("failed to create {}", self.upload_dir.display()))?;
        Ok(())
    }

    fn tallies(&self) -> Result<MutexGuard<'_, HashMap<String, Tally>>> {
        self.tallies
            .lock()
            .map_err(|_| anyhow!("chunk tally lock poisoned"))
    }

    fn chunk_path(&self, filename: &str, index: usize) -> PathBuf {
        self.chunk_dir.join(filename).join(index.to_string())
    }

    /// Writes one chunk. Callers validate `index < total` and sanitize `filename`.
    pub async fn store_chunk(
        &self,
        filename: &str,
        index: usize,
        total: usize,
        data: &[u8],
    ) -> Result<ChunkStatus> {
        let dir = self.chunk_dir.join(filename);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = self.chunk_path(filename, index);
        fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        let received = {
            let mut tallies = self.tallies()?;
            let tally = tallies
                .entry(filename.to_string())
                .or_insert_with(|| Tally {
                    total,
                    received: BTreeSet::new(),
                    updated: Instant::now(),
                });
            if tally.total != total {
                tracing::warn!(%filename, old_total = tally.total, total, "chunk count changed, restarting tally");
                tally.total = total;
                tally.received.clear();
            }
            tally.received.insert(index);
            tally.updated = Instant::now();
            let received = tally.received.len();
            if received == total {
                tallies.remove(filename);
            }
            received
        };

        if received < total {
            return Ok(ChunkStatus::Pending { received, total });
        }
        let path = self.assemble(filename, total).await?;
        Ok(ChunkStatus::Assembled { path })
    }

    async fn assemble(&self, filename: &str, total: usize) -> Result<PathBuf> {
        fs::create_dir_all(&self.upload_dir).await?;
        let target = self.upload_dir.join(filename);
        let mut file = fs::File::create(&target)
            .await
            .with_context(|| format!("failed to create {}", target.display()))?;

        for index in 0..total {
            let path = self.chunk_path(filename, index);
            tracing::debug!(chunk = %path.display(), "appending chunk");
            let data = fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            file.write_all(&data).await?;
            fs::remove_file(&path).await?;
        }
        file.flush().await?;

        if let Err(error) = fs::remove_dir(self.chunk_dir.join(filename)).await {
            tracing::warn!(%error, %filename, "failed to remove chunk directory");
        }
        tracing::info!(%filename, total, target = %target.display(), "file reassembled");
        Ok(target)
    }

    pub async fn store_file(&self, filename: &str, data: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.upload_dir).await?;
        let target = self.upload_dir.join(filename);
        fs::write(&target, data)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(target)
    }

    /// Empties the upload directory, leaving the directory itself in place.
    pub async fn clean_uploads(&self) -> Result<()> {
        match fs::remove_dir_all(&self.upload_dir).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    /// Drops the chunks of uploads that received nothing for `max_age`, together with
    /// chunk directories no tally knows about (left over from a previous run).
    ///
    /// Returns the number of chunk directories removed.
    pub async fn clean_stale_chunks(&self, max_age: Duration) -> Result<usize> {
        let (stale, live) = {
            let mut tallies = self.tallies()?;
            let now = Instant::now();
            let stale = tallies
                .iter()
                .filter(|(_, tally)| now.duration_since(tally.updated) >= max_age)
                .map(|(filename, _)| filename.clone())
                .collect::<Vec<_>>();
            for filename in &stale {
                tallies.remove(filename);
            }
            let live = tallies.keys().cloned().collect::<BTreeSet<_>>();
            (stale, live)
        };

        let mut entries = match fs::read_dir(&self.chunk_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(error) => return Err(error.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name().to_string_lossy().to_string();
            if live.contains(&filename) {
                continue;
            }
            if !stale.contains(&filename) {
                let modified = entry.metadata().await?.modified()?;
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default();
                if age < max_age {
                    continue;
                }
            }

            let path = entry.path();
            tracing::info!(%filename, chunks = %path.display(), "removing stale chunks");
            fs::remove_dir_all(&path)
                .await
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> ChunkStore {
        ChunkStore::new(root.join("chunks"), root.join("uploads"))
    }

    #[test]
    fn sanitize_keeps_only_final_component() {
        assert_eq!(sanitize_filename("movie.mkv"), Some("movie.mkv"));
        assert_eq!(sanitize_filename("../../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_filename("dir/sub/a.tar.gz"), Some("a.tar.gz"));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("/"), None);
    }

    #[tokio::test]
    async fn out_of_order_chunks_assemble_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.prepare().await.unwrap();

        assert_eq!(
            store.store_chunk("a.txt", 2, 3, b"ghi").await.unwrap(),
            ChunkStatus::Pending {
                received: 1,
                total: 3
            }
        );
        store.store_chunk("a.txt", 0, 3, b"abc").await.unwrap();
        let status = store.store_chunk("a.txt", 1, 3, b"def").await.unwrap();

        let path = dir.path().join("uploads").join("a.txt");
        assert_eq!(status, ChunkStatus::Assembled { path: path.clone() });
        assert_eq!(std::fs::read(path).unwrap(), b"abcdefghi");
        assert!(!dir.path().join("chunks").join("a.txt").exists());
    }

    #[tokio::test]
    async fn resent_chunk_is_not_counted_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.store_chunk("b.bin", 0, 2, b"old").await.unwrap();
        let status = store.store_chunk("b.bin", 0, 2, b"new").await.unwrap();
        assert_eq!(
            status,
            ChunkStatus::Pending {
                received: 1,
                total: 2
            }
        );

        store.store_chunk("b.bin", 1, 2, b"!").await.unwrap();
        let data = std::fs::read(dir.path().join("uploads").join("b.bin")).unwrap();
        assert_eq!(data, b"new!");
    }

    #[tokio::test]
    async fn changed_total_restarts_tally() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.store_chunk("c.bin", 0, 3, b"x").await.unwrap();
        store.store_chunk("c.bin", 1, 3, b"y").await.unwrap();
        let status = store.store_chunk("c.bin", 0, 2, b"p").await.unwrap();
        assert_eq!(
            status,
            ChunkStatus::Pending {
                received: 1,
                total: 2
            }
        );
    }

    #[tokio::test]
    async fn clean_uploads_empties_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.store_file("d.txt", b"data").await.unwrap();

        store.clean_uploads().await.unwrap();
        let uploads = dir.path().join("uploads");
        assert!(uploads.is_dir());
        assert_eq!(std::fs::read_dir(uploads).unwrap().count(), 0);

        // a missing directory is recreated rather than treated as an error
        std::fs::remove_dir(dir.path().join("uploads")).unwrap();
        store.clean_uploads().await.unwrap();
        assert!(dir.path().join("uploads").is_dir());
    }

    #[tokio::test]
    async fn abandoned_chunks_are_dropped_once_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.prepare().await.unwrap();
        store.store_chunk("e.bin", 0, 2, b"half").await.unwrap();

        let chunks = dir.path().join("chunks").join("e.bin");
        assert_eq!(
            store
                .clean_stale_chunks(Duration::from_secs(3600))
                .await
                .unwrap(),
            0
        );
        assert!(chunks.join("0").is_file());

        assert_eq!(store.clean_stale_chunks(Duration::ZERO).await.unwrap(), 1);
        assert!(!chunks.exists());

        // the tally went with the files, so a fresh attempt starts from scratch
        let status = store.store_chunk("e.bin", 1, 2, b"!").await.unwrap();
        assert_eq!(
            status,
            ChunkStatus::Pending {
                received: 1,
                total: 2
            }
        );
    }

    #[tokio::test]
    async fn leftover_chunk_directories_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.prepare().await.unwrap();
        let leftover = dir.path().join("chunks").join("previous-run.iso");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("3"), b"old").unwrap();

        assert_eq!(
            store
                .clean_stale_chunks(Duration::from_secs(3600))
                .await
                .unwrap(),
            0
        );
        assert!(leftover.exists());

        assert_eq!(store.clean_stale_chunks(Duration::ZERO).await.unwrap(), 1);
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn stale_cleanup_without_chunk_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert_eq!(store.clean_stale_chunks(Duration::ZERO).await.unwrap(), 0);
    }
}
