// Copyright 2022 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

#[derive(Debug)]
pub enum Error {
    DoesNotExist(PathBuf),
    IsNotAFolder(PathBuf),
    Unreadable(PathBuf, io::Error),
    Traversal(walkdir::Error),
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Self {
        Error::Traversal(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DoesNotExist(path) => write!(f, "Path {} does not exist", path.display()),
            Error::IsNotAFolder(path) => write!(f, "Path {} is not a folder", path.display()),
            Error::Unreadable(path, error) => {
                write!(f, "Unable to read {}: {}", path.display(), error)
            }
            Error::Traversal(error) => write!(f, "Error while walking the tree: {}", error),
        }
    }
}

/// The regular files found below `root`, in walk order.
#[derive(Debug, Clone)]
pub struct Walk {
    pub root: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Walks `root` in pre-order, entries of every directory sorted by name,
/// keeping regular files only. Symbolic links are not followed.
pub fn walk_blocking(root: &Path) -> Result<Walk, Error> {
    if !root.exists() {
        return Err(Error::DoesNotExist(PathBuf::from(root)));
    }
    if !root.is_dir() {
        return Err(Error::IsNotAFolder(PathBuf::from(root)));
    }
    let root = root
        .canonicalize()
        .map_err(|error| Error::Unreadable(PathBuf::from(root), error))?;

    let mut files = vec![];
    for entry in WalkDir::new(&root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    debug!("Found {} files under {}", files.len(), root.display());
    Ok(Walk { root, files })
}

pub async fn walk(root: &Path) -> Result<Walk, Error> {
    let root = PathBuf::from(root);
    let fallback = root.clone();
    match tokio::task::spawn_blocking(move || walk_blocking(&root)).await {
        Ok(walk) => walk,
        Err(error) => Err(Error::Unreadable(fallback, io::Error::from(error))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree() -> tempfile::TempDir {
        let tmp_dir = tempfile::tempdir().unwrap();
        let root = tmp_dir.path();
        fs::create_dir_all(root.join("b").join("c")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("z.txt"), "z").unwrap();
        fs::write(root.join("a.png"), "a").unwrap();
        fs::write(root.join("b").join("one.json"), "{}").unwrap();
        fs::write(root.join("b").join("c").join("two.css"), "").unwrap();
        tmp_dir
    }

    #[tokio::test]
    async fn test_walk_regular_files_only() {
        let tmp_dir = tree();
        let walk = walk(tmp_dir.path()).await.unwrap();
        let root = tmp_dir.path().canonicalize().unwrap();

        assert_eq!(walk.root, root);
        assert_eq!(
            walk.files,
            vec![
                root.join("a.png"),
                root.join("b").join("c").join("two.css"),
                root.join("b").join("one.json"),
                root.join("z.txt"),
            ]
        );
        assert!(walk.files.iter().all(|path| path.is_file()));
    }

    #[tokio::test]
    async fn test_walk_is_deterministic() {
        let tmp_dir = tree();
        let first = walk(tmp_dir.path()).await.unwrap();
        let second = walk(tmp_dir.path()).await.unwrap();
        assert_eq!(first.files, second.files);
    }

    #[test]
    fn test_walk_empty_folder() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let walk = walk_blocking(tmp_dir.path()).unwrap();
        assert!(walk.files.is_empty());
    }

    #[test]
    fn test_walk_missing_root() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let missing = tmp_dir.path().join("fakfakefakefake");
        assert!(matches!(
            walk_blocking(&missing),
            Err(Error::DoesNotExist(path)) if path == missing
        ));
    }

    #[test]
    fn test_walk_file_root() {
        let tmp_dir = tree();
        let file = tmp_dir.path().join("z.txt");
        assert!(matches!(
            walk_blocking(&file),
            Err(Error::IsNotAFolder(path)) if path == file
        ));
    }
}
