//! Receiver side of the file-transfer sub-protocol.

use slog::{debug, warn, Logger};
use std::path::{Component, Path, PathBuf};
use tokio::{fs::File, io::AsyncWriteExt as _};

/// Reassembles one file at a time from blocks arriving in order. Each inbound connection owns its
/// own sink, so blocks from concurrent senders never interleave.
///
/// Every operation reports success as a `bool`, which the connection sends back to the peer as
/// its acknowledgment. Failures are logged here.
pub struct FileSink {
    root: Option<PathBuf>,
    current: Option<(String, File)>,
    log: Logger,
}

impl FileSink {
    /// A sink that writes into `root`. A sink without a root refuses every file.
    pub fn new(root: Option<PathBuf>, log: Logger) -> Self {
        Self {
            root,
            current: None,
            log,
        }
    }

    /// Create or truncate `name` in the storage root. Any file still open is closed first.
    pub async fn open_for_write(&mut self, name: &str) -> bool {
        self.close_file().await;
        let Some(root) = &self.root else {
            warn!(self.log, "refusing file: no storage"; "name" => name);
            return false;
        };
        if !is_plain_file_name(name) {
            warn!(self.log, "refusing file: unsafe name"; "name" => name);
            return false;
        }
        if let Err(err) = tokio::fs::create_dir_all(root).await {
            warn!(self.log, "creating storage directory failed"; "root" => ?root, "error" => %err);
            return false;
        }
        match File::create(root.join(name)).await {
            Ok(file) => {
                debug!(self.log, "receiving file"; "name" => name);
                self.current = Some((name.to_owned(), file));
                true
            }
            Err(err) => {
                warn!(self.log, "opening file failed"; "name" => name, "error" => %err);
                false
            }
        }
    }

    /// Append `block` to the open file.
    pub async fn write_block(&mut self, block: &[u8]) -> bool {
        let Some((name, file)) = &mut self.current else {
            warn!(self.log, "block received with no open file");
            return false;
        };
        match file.write_all(block).await {
            Ok(()) => true,
            Err(err) => {
                warn!(self.log, "writing block failed"; "name" => &*name, "error" => %err);
                self.current = None;
                false
            }
        }
    }

    /// Flush and close the open file. Closing with no open file is a no-op that fails.
    pub async fn close_file(&mut self) -> bool {
        let Some((name, mut file)) = self.current.take() else {
            return false;
        };
        match file.flush().await {
            Ok(()) => {
                debug!(self.log, "received file"; "name" => name);
                true
            }
            Err(err) => {
                warn!(self.log, "closing file failed"; "name" => name, "error" => %err);
                false
            }
        }
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_util::log::test_logger;

    fn sink(root: &Path) -> FileSink {
        FileSink::new(Some(root.to_owned()), test_logger())
    }

    #[tokio::test]
    async fn blocks_reassemble_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(dir.path());
        assert!(sink.open_for_write("A.rs").await);
        assert!(sink.write_block(b"fn main() ").await);
        assert!(sink.write_block(b"{}").await);
        assert!(sink.close_file().await);
        assert_eq!(
            std::fs::read(dir.path().join("A.rs")).unwrap(),
            b"fn main() {}"
        );
    }

    #[tokio::test]
    async fn open_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.rs"), "a much longer previous body").unwrap();
        let mut sink = sink(dir.path());
        assert!(sink.open_for_write("A.rs").await);
        assert!(sink.write_block(b"short").await);
        assert!(sink.close_file().await);
        assert_eq!(std::fs::read(dir.path().join("A.rs")).unwrap(), b"short");
    }

    #[tokio::test]
    async fn empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(dir.path());
        assert!(sink.open_for_write("empty").await);
        assert!(sink.close_file().await);
        assert_eq!(std::fs::read(dir.path().join("empty")).unwrap(), b"");
    }

    #[tokio::test]
    async fn creates_missing_storage_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("storage");
        let mut sink = sink(&root);
        assert!(sink.open_for_write("A.rs").await);
        assert!(sink.close_file().await);
        assert!(root.join("A.rs").exists());
    }

    #[tokio::test]
    async fn unsafe_names_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(dir.path());
        for name in ["", "..", "../escape", "/abs", "sub/file", "sub\\file", "."] {
            assert!(!sink.open_for_write(name).await, "{name:?}");
        }
    }

    #[tokio::test]
    async fn block_without_open_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink(dir.path());
        assert!(!sink.write_block(b"x").await);
        assert!(!sink.close_file().await);
    }

    #[tokio::test]
    async fn no_storage_refuses() {
        let mut sink = FileSink::new(None, test_logger());
        assert!(!sink.open_for_write("A.rs").await);
    }
}
