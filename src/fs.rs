//! # Read-Only Filesystem
//!
//! A traversable, read-only directory tree handed from a source unpacker to
//! the content store. Backed either by a directory on disk (cache entries) or
//! by an in-memory map (test fixtures).

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Read-only view of a directory tree.
///
/// Paths are relative to the tree root and use `/` as separator.
pub trait ReadOnlyFs: Send + Sync + std::fmt::Debug {
    /// Relative paths of every regular file in the tree, sorted
    fn files(&self) -> Result<Vec<String>>;

    /// Contents of the file at `path`
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
}

/// Tree rooted at a directory on disk
#[derive(Debug, Clone)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ReadOnlyFs for DiskFs {
    fn files(&self) -> Result<Vec<String>> {
        let canonical_root = self
            .root
            .canonicalize()
            .with_context(|| format!("resolving {}", self.root.display()))?;

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.with_context(|| format!("walking {}", self.root.display()))?;
            let file_type = entry.file_type();

            let is_file = if file_type.is_symlink() {
                // Only follow links that resolve to a file inside the tree
                match entry.path().canonicalize() {
                    Ok(target) => target.starts_with(&canonical_root) && target.is_file(),
                    Err(_) => false,
                }
            } else {
                file_type.is_file()
            };
            if !is_file {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .with_context(|| format!("{} is outside the tree", entry.path().display()))?;
            files.push(to_slash_path(relative));
        }
        files.sort();
        Ok(files)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let relative = clean_relative(path)?;
        let full = self.root.join(relative);
        std::fs::read(&full).with_context(|| format!("reading {}", full.display()))
    }
}

/// In-memory tree, mostly used to feed the content store in tests
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemoryFs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files
            .insert(path.trim_start_matches('/').to_string(), contents.into());
    }
}

impl ReadOnlyFs for MemoryFs {
    fn files(&self) -> Result<Vec<String>> {
        Ok(self.files.keys().cloned().collect())
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path.trim_start_matches('/'))
            .cloned()
            .with_context(|| format!("file {path} does not exist"))
    }
}

/// Remove a file, symlink or directory tree. A missing path is not an error.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Create `path` and any missing parents, readable only by the owner on unix
pub fn create_private_dir(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

/// Validate a tree-relative path: no absolute paths, no `..`
pub fn clean_relative(path: &str) -> Result<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                anyhow::bail!("path {path:?} escapes the tree root");
            }
        }
    }
    Ok(cleaned)
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_private_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/unpack");
        create_private_dir(&path).unwrap();
        // Existing directories are fine
        create_private_dir(&path).unwrap();
        assert!(path.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }
    }

    #[test]
    fn test_disk_fs_lists_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/nested")).unwrap();
        std::fs::write(dir.path().join("catalog.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("pkg/nested/index.yaml"), b"a: b").unwrap();

        let fs = DiskFs::new(dir.path());
        assert_eq!(
            fs.files().unwrap(),
            vec!["catalog.json".to_string(), "pkg/nested/index.yaml".to_string()]
        );
        assert_eq!(fs.read_file("pkg/nested/index.yaml").unwrap(), b"a: b");
    }

    #[test]
    fn test_disk_fs_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let fs = DiskFs::new(dir.path());
        assert!(fs.read_file("../etc/passwd").is_err());
    }

    #[test]
    fn test_memory_fs() {
        let fs = MemoryFs::new()
            .with_file("b.json", "{}")
            .with_file("/a/c.yaml", "x: y");
        assert_eq!(fs.files().unwrap(), vec!["a/c.yaml".to_string(), "b.json".to_string()]);
        assert_eq!(fs.read_file("a/c.yaml").unwrap(), b"x: y");
        assert!(fs.read_file("missing").is_err());
    }

    #[test]
    fn test_remove_path_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("f"), b"x").unwrap();

        remove_path(&dir.path().join("a")).unwrap();
        remove_path(&dir.path().join("f")).unwrap();
        remove_path(&dir.path().join("missing")).unwrap();
        assert!(!dir.path().join("a").exists());
        assert!(!dir.path().join("f").exists());
    }

    #[test]
    fn test_clean_relative() {
        assert_eq!(clean_relative("./a/b").unwrap(), PathBuf::from("a/b"));
        assert_eq!(clean_relative("/a").unwrap(), PathBuf::from("a"));
        assert!(clean_relative("a/../../b").is_err());
    }
}
