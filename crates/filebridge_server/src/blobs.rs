//! Content blob area.
//!
//! Blobs live directly under a single content root and are addressed by a
//! relative path stored in each record. Every path, whether read back from a
//! record or derived from an upload, is resolved through
//! [`ContentRoot::resolve`], which refuses anything that could escape the root.

use crate::error::{ServerError, ServerResult};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// The directory holding uploaded content.
#[derive(Debug, Clone)]
pub struct ContentRoot {
    root: PathBuf,
}

impl ContentRoot {
    /// Creates a content root at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory if it does not exist.
    pub async fn ensure(&self) -> ServerResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Resolves a stored relative path to an absolute one inside the root.
    ///
    /// Absolute paths, `..`, `.` and empty paths are rejected.
    pub fn resolve(&self, relative: &str) -> ServerResult<PathBuf> {
        let path = Path::new(relative);
        let mut components = path.components().peekable();
        if components.peek().is_none() {
            return Err(ServerError::UnsafePath(relative.to_string()));
        }
        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return Err(ServerError::UnsafePath(relative.to_string()));
        }
        Ok(self.root.join(path))
    }

    /// Derives the blob name for an upload: `{id}_{basename}`.
    ///
    /// Only the final component of the client-supplied file name is kept.
    pub fn blob_name(id: &str, upload_name: &str) -> String {
        let base = upload_name
            .rsplit(['/', '\\'])
            .next()
            .filter(|b| !b.is_empty() && *b != "." && *b != "..")
            .unwrap_or("content");
        let id = id.replace(['/', '\\'], "_");
        format!("{id}_{base}")
    }

    /// Starts writing a blob at `relative`.
    ///
    /// Data goes to a sibling temp file and only replaces the destination on
    /// [`BlobWriter::commit`].
    pub async fn create(&self, relative: &str) -> ServerResult<BlobWriter> {
        let dest = self.resolve(relative)?;
        self.ensure()
            .await
            .map_err(|e| ServerError::UploadFailed(e.to_string()))?;

        let temp = self
            .root
            .join(format!(".upload-{}.part", Uuid::new_v4().simple()));
        let file = File::create(&temp)
            .await
            .map_err(|e| ServerError::UploadFailed(e.to_string()))?;

        Ok(BlobWriter {
            file,
            temp,
            dest,
            written: 0,
        })
    }

    /// Opens a stored blob for streaming. Returns `None` if it does not exist.
    pub async fn open(&self, relative: &str) -> ServerResult<Option<File>> {
        let path = self.resolve(relative)?;
        match File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a blob. Failures are logged, never returned.
    pub async fn remove(&self, relative: &str) {
        let path = match self.resolve(relative) {
            Ok(path) => path,
            Err(e) => {
                warn!(path = relative, error = %e, "refusing to remove blob");
                return;
            }
        };
        match fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed blob"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove blob"),
        }
    }
}

/// An in-progress blob upload.
#[derive(Debug)]
pub struct BlobWriter {
    file: File,
    temp: PathBuf,
    dest: PathBuf,
    written: usize,
}

impl BlobWriter {
    /// Appends a chunk.
    pub async fn write(&mut self, chunk: &[u8]) -> ServerResult<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| ServerError::UploadFailed(e.to_string()))?;
        self.written += chunk.len();
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flushes and moves the blob into place.
    pub async fn commit(mut self) -> ServerResult<()> {
        let result = async {
            self.file.flush().await?;
            self.file.sync_all().await?;
            fs::rename(&self.temp, &self.dest).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&self.temp).await;
            return Err(ServerError::UploadFailed(e.to_string()));
        }
        Ok(())
    }

    /// Discards the partial upload.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.temp).await {
            warn!(path = %self.temp.display(), error = %e, "failed to remove partial upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    #[test]
    fn resolve_rejects_escapes() {
        let root = ContentRoot::new("/srv/content");
        assert_eq!(
            root.resolve("abc_file.txt").unwrap(),
            PathBuf::from("/srv/content/abc_file.txt")
        );
        for bad in ["", "../etc/passwd", "/etc/passwd", "a/../../b", "./a"] {
            assert!(
                matches!(root.resolve(bad), Err(ServerError::UnsafePath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn blob_names_keep_only_basename() {
        assert_eq!(ContentRoot::blob_name("id1", "a.txt"), "id1_a.txt");
        assert_eq!(ContentRoot::blob_name("id1", "../../x.bin"), "id1_x.bin");
        assert_eq!(ContentRoot::blob_name("id1", "C:\\tmp\\y"), "id1_y");
        assert_eq!(ContentRoot::blob_name("id1", ".."), "id1_content");
        assert_eq!(ContentRoot::blob_name("a/b", "f"), "a_b_f");
    }

    #[tokio::test]
    async fn write_open_remove() {
        let dir = tempdir().unwrap();
        let root = ContentRoot::new(dir.path().join("blobs"));

        let mut writer = root.create("id_a.txt").await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert_eq!(writer.written(), 11);
        writer.commit().await.unwrap();

        let mut file = root.open("id_a.txt").await.unwrap().unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "hello world");

        root.remove("id_a.txt").await;
        assert!(root.open("id_a.txt").await.unwrap().is_none());
        // Removing again is a no-op.
        root.remove("id_a.txt").await;
    }

    #[tokio::test]
    async fn aborted_upload_leaves_nothing() {
        let dir = tempdir().unwrap();
        let root = ContentRoot::new(dir.path());

        let mut writer = root.create("id_b.txt").await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.abort().await;

        assert!(root.open("id_b.txt").await.unwrap().is_none());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
