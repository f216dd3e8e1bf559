//! Writing received files below the root directory.
//!
//! Placement is unlink-then-write and not transactional: a crash between the
//! two steps leaves the destination missing.

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::{HostError, Result};

/// Make sure the root exists and is a directory. Creates it if missing.
pub async fn ensure_root_dir(dir: &Path) -> Result<()> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(HostError::NotADirectory(dir.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(dir)
            .await
            .map_err(|e| HostError::io(dir, e)),
        Err(e) => Err(HostError::io(dir, e)),
    }
}

/// Join a normalized file name below `root`.
///
/// `.` segments are dropped and `..` segments are folded; a name that would
/// climb out of `root` is refused.
pub fn resolve_target(root: &Path, name: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(HostError::PathEscapesRoot(name.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(HostError::PathEscapesRoot(name.to_string()));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(HostError::NotAFile(root.to_path_buf()));
    }

    Ok(root.join(relative))
}

/// Lexically fold `.` and `..` without touching the filesystem.
///
/// `..` never climbs above a root (`/../a` is `/a`); leading `..` of a
/// relative path are kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.into_iter().collect()
}

/// Nearest existing ancestor of `path` (itself included) that is not a
/// directory.
async fn blocking_ancestor(path: &Path) -> Option<PathBuf> {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        if let Ok(meta) = fs::metadata(ancestor).await {
            return (!meta.is_dir()).then(|| ancestor.to_path_buf());
        }
    }
    None
}

/// Classify a failed lookup below `dir`: a file standing where a directory
/// is needed becomes `NotADirectory`, anything else stays an I/O error.
async fn lookup_error(dir: Option<&Path>, path: &Path, e: io::Error) -> HostError {
    if let Some(dir) = dir {
        if let Some(conflict) = blocking_ancestor(dir).await {
            return HostError::NotADirectory(conflict);
        }
    }
    HostError::io(path, e)
}

/// Write `data` to `target`, replacing an existing regular file.
///
/// Returns the number of bytes written.
pub async fn place_file(target: &Path, data: &[u8]) -> Result<u64> {
    let parent = target.parent();

    // 1. Unlink an existing file; anything else at that path is a conflict
    match fs::symlink_metadata(target).await {
        Ok(meta) if meta.is_file() => {
            fs::remove_file(target)
                .await
                .map_err(|e| HostError::io(target, e))?;
        }
        Ok(_) => return Err(HostError::NotAFile(target.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // ENOTDIR when an ancestor is a file
        Err(e) => return Err(lookup_error(parent, target, e).await),
    }

    // 2. Parent directory
    if let Some(parent) = parent {
        match fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(HostError::NotADirectory(parent.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Err(e) = fs::create_dir_all(parent).await {
                    return Err(lookup_error(Some(parent), parent, e).await);
                }
            }
            Err(e) => return Err(lookup_error(Some(parent), parent, e).await),
        }
    }

    // 3. Content
    fs::write(target, data)
        .await
        .map_err(|e| HostError::io(target, e))?;

    Ok(data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_target() {
        let root = Path::new("/srv/root");
        assert_eq!(
            resolve_target(root, "a/b.txt").unwrap(),
            Path::new("/srv/root/a/b.txt")
        );
        assert_eq!(
            resolve_target(root, "./a/../c.txt").unwrap(),
            Path::new("/srv/root/c.txt")
        );
    }

    #[test]
    fn test_resolve_target_refuses_escape() {
        let root = Path::new("/srv/root");
        assert!(matches!(
            resolve_target(root, "../etc/passwd"),
            Err(HostError::PathEscapesRoot(_))
        ));
        assert!(matches!(
            resolve_target(root, "a/../../b"),
            Err(HostError::PathEscapesRoot(_))
        ));
        assert!(resolve_target(root, ".").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            Path::new("/a/c")
        );
        assert_eq!(normalize_path(Path::new("/../../etc")), Path::new("/etc"));
        assert_eq!(normalize_path(Path::new("../a/../b")), Path::new("../b"));
        assert_eq!(normalize_path(Path::new("a/../../b")), Path::new("../b"));
    }

    #[tokio::test]
    async fn test_place_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a/b/c.txt");

        let written = place_file(&target, b"hello").await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(fs::read(&target).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_place_overwrites_existing_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("file.txt");
        fs::write(&target, "a much longer old content").unwrap();

        place_file(&target, b"new").await.unwrap();
        place_file(&target, b"new").await.unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_place_onto_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("dir");
        fs::create_dir(&target).unwrap();

        let err = place_file(&target, b"x").await.unwrap_err();
        assert!(matches!(err, HostError::NotAFile(ref p) if p == &target));
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_place_below_file_fails() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("plain");
        fs::write(&parent, "i am a file").unwrap();

        let err = place_file(&parent.join("child.txt"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::NotADirectory(ref p) if p == &parent));
        assert_eq!(fs::read_to_string(&parent).unwrap(), "i am a file");
    }

    #[tokio::test]
    async fn test_place_below_nested_file_fails() {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("plain");
        fs::write(&plain, "i am a file").unwrap();

        let err = place_file(&plain.join("sub/deeper/x.txt"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::NotADirectory(ref p) if p == &plain));
        assert_eq!(fs::read_to_string(&plain).unwrap(), "i am a file");
    }

    #[tokio::test]
    async fn test_ensure_root_dir() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("new/root");

        ensure_root_dir(&root).await.unwrap();
        assert!(root.is_dir());
        // Second call sees the existing directory
        ensure_root_dir(&root).await.unwrap();

        let file = tmp.path().join("file");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            ensure_root_dir(&file).await,
            Err(HostError::NotADirectory(_))
        ));
    }
}
