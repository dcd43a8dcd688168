//! Async filesystem helpers whose errors name the operation and path that failed.

use anyhow::{anyhow, Context as _, Result};
use std::{
    io,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};
use tokio::{fs, io::AsyncWriteExt as _};

macro_rules! fs_trampoline {
    ($f:path, $p:ident) => {{
        let path = $p.as_ref();
        $f(path)
            .await
            .with_context(|| format!("{}(\"{}\")", stringify!($f), path.display()))
    }};
    ($f:path, $p:ident, $($args:expr),+) => {{
        let path = $p.as_ref();
        $f(path, $($args),+)
            .await
            .with_context(|| format!("{}(\"{}\")", stringify!($f), path.display()))
    }};
}

/// A file found by [`Fs::list_files`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub modified: SystemTime,
}

pub struct Fs;

impl Fs {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }

    pub async fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        fs_trampoline!(fs::create_dir_all, path)
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        fs_trampoline!(fs::read, path)
    }

    pub async fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        fs_trampoline!(fs::read_to_string, path)
    }

    pub async fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let contents = contents.as_ref();
        fs_trampoline!(fs::write, path, contents)
    }

    /// Write `contents` to a file that must not exist yet. Returns `false`, having written
    /// nothing, if it does.
    pub async fn write_new(
        &self,
        path: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> Result<bool> {
        let path = path.as_ref();
        let context = || format!("write_new(\"{}\")", path.display());
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err).with_context(context),
        };
        file.write_all(contents.as_ref())
            .await
            .with_context(context)?;
        file.flush().await.with_context(context)?;
        Ok(true)
    }

    pub async fn exists(&self, path: impl AsRef<Path>) -> bool {
        fs::metadata(path).await.is_ok()
    }

    /// Regular files directly inside `dir` whose names satisfy `filter`, in directory order. A
    /// missing directory has no files.
    pub async fn list_files(
        &self,
        dir: impl AsRef<Path>,
        filter: impl Fn(&str) -> bool,
    ) -> Result<Vec<FileInfo>> {
        let mut files = vec![];
        for (name, metadata) in self.entries(dir.as_ref()).await? {
            if metadata.is_file() && filter(&name) {
                let modified = metadata
                    .modified()
                    .with_context(|| format!("modified(\"{name}\")"))?;
                files.push(FileInfo { name, modified });
            }
        }
        Ok(files)
    }

    /// Names of the directories directly inside `dir`, sorted. A missing directory has none.
    pub async fn list_directories(&self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let mut dirs: Vec<_> = self
            .entries(dir.as_ref())
            .await?
            .into_iter()
            .filter(|(_, metadata)| metadata.is_dir())
            .map(|(name, _)| name)
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    async fn entries(&self, dir: &Path) -> Result<Vec<(String, std::fs::Metadata)>> {
        let mut read_dir = match fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(err).with_context(|| format!("read_dir(\"{}\")", dir.display()))
            }
        };
        let mut entries = vec![];
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .with_context(|| format!("read_dir(\"{}\")", dir.display()))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let metadata = entry
                .metadata()
                .await
                .with_context(|| format!("metadata(\"{}\")", entry.path().display()))?;
            entries.push((name, metadata));
        }
        Ok(entries)
    }
}

/// Resolve `name` inside `root`, refusing anything that could escape it. A name may contain
/// subdirectories but no `..`, root, or prefix components.
pub fn path_in(root: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let mut components = relative.components().peekable();
    if components.peek().is_none() {
        return Err(anyhow!("empty file name"));
    }
    if !components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        return Err(anyhow!("file name {name:?} escapes the storage root"));
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn write_new_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        let path = dir.path().join("BuildRequest.json");
        assert!(fs.write_new(&path, "first").await.unwrap());
        assert!(!fs.write_new(&path, "second").await.unwrap());
        assert_eq!(fs.read_to_string(&path).await.unwrap(), "first");
        assert_matches!(
            fs.write_new(dir.path().join("missing/x.json"), "x").await,
            Err(_)
        );
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        let missing = dir.path().join("nope");
        assert_eq!(fs.list_files(&missing, |_| true).await.unwrap(), vec![]);
        assert_eq!(
            fs.list_directories(&missing).await.unwrap(),
            Vec::<String>::new()
        );
    }

    #[tokio::test]
    async fn list_files_filters_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        fs.write(dir.path().join("a.log"), "a").await.unwrap();
        fs.write(dir.path().join("b.txt"), "b").await.unwrap();
        fs.create_dir_all(dir.path().join("c.log")).await.unwrap();

        let files = fs
            .list_files(dir.path(), |name| name.ends_with(".log"))
            .await
            .unwrap();
        let names: Vec<_> = files.into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["a.log"]);
        assert_eq!(fs.list_directories(dir.path()).await.unwrap(), vec!["c.log"]);
    }

    #[tokio::test]
    async fn read_error_names_path() {
        let err = Fs::new().read("/nonexistent/conveyor").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/conveyor"), "{err}");
    }

    #[test]
    fn path_in_accepts_plain_and_nested_names() {
        let root = Path::new("/storage");
        assert_eq!(
            path_in(root, "A.toml").unwrap(),
            PathBuf::from("/storage/A.toml")
        );
        assert_eq!(
            path_in(root, "cat/A.rs").unwrap(),
            PathBuf::from("/storage/cat/A.rs")
        );
    }

    #[test]
    fn path_in_rejects_escapes() {
        let root = Path::new("/storage");
        assert_matches!(path_in(root, "../etc/passwd"), Err(_));
        assert_matches!(path_in(root, "/etc/passwd"), Err(_));
        assert_matches!(path_in(root, ""), Err(_));
    }
}
