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
use std::path::{Component, Path, PathBuf};

pub const SEPARATOR: char = '/';

#[derive(Debug, PartialEq)]
pub enum Error {
    OutsideBase { base: PathBuf, path: PathBuf },
    EmptyRelativePath(PathBuf),
    NotUnicode(PathBuf),
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutsideBase { base, path } => write!(
                f,
                "Path {} is not located under {}",
                path.display(),
                base.display()
            ),
            Error::EmptyRelativePath(path) => {
                write!(f, "Path {} is the base directory itself", path.display())
            }
            Error::NotUnicode(path) => {
                write!(f, "Path {} is not valid unicode", path.display())
            }
        }
    }
}

pub fn relative_path(base: &Path, path: &Path) -> Result<PathBuf, Error> {
    let relative = path.strip_prefix(base).map_err(|_| Error::OutsideBase {
        base: PathBuf::from(base),
        path: PathBuf::from(path),
    })?;
    if relative.as_os_str().is_empty() {
        return Err(Error::EmptyRelativePath(PathBuf::from(path)));
    }
    Ok(relative.to_path_buf())
}

/// Object key of `path`: `prefix` followed by the path relative to `base`,
/// its components joined with `/`. Exactly one separator sits between the
/// prefix and the relative part.
pub fn map(base: &Path, prefix: &str, path: &Path) -> Result<String, Error> {
    let relative = relative_path(base, path)?;

    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => match segment.to_str() {
                Some(segment) => segments.push(segment),
                None => return Err(Error::NotUnicode(PathBuf::from(path))),
            },
            _ => {
                return Err(Error::OutsideBase {
                    base: PathBuf::from(base),
                    path: PathBuf::from(path),
                })
            }
        }
    }
    let relative = segments.join("/");

    let key = if prefix.is_empty() {
        relative
    } else if prefix.ends_with(SEPARATOR) {
        format!("{}{}", prefix, relative)
    } else {
        format!("{}{}{}", prefix, SEPARATOR, relative)
    };
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_preserves_structure() {
        let key = map(Path::new("/tmp/d"), "/site/", Path::new("/tmp/d/a/b.txt"));
        assert_eq!(key, Ok(String::from("/site/a/b.txt")));
    }

    #[test]
    fn test_map_single_separator() {
        let base = Path::new("/tmp/d");
        let file = Path::new("/tmp/d/a/b.txt");
        assert_eq!(map(base, "/site", file).unwrap(), "/site/a/b.txt");
        assert_eq!(map(base, "site/", file).unwrap(), "site/a/b.txt");
        assert_eq!(map(base, "/", file).unwrap(), "/a/b.txt");
        assert_eq!(map(base, "", file).unwrap(), "a/b.txt");
        assert_eq!(map(Path::new("/tmp/d/"), "/site/", file).unwrap(), "/site/a/b.txt");
    }

    #[test]
    fn test_map_is_deterministic() {
        let base = Path::new("/srv/www");
        let file = Path::new("/srv/www/css/main.css");
        assert_eq!(map(base, "assets", file), map(base, "assets", file));
    }

    #[test]
    fn test_map_outside_base() {
        let result = map(Path::new("/tmp/d"), "/site/", Path::new("/tmp/other/b.txt"));
        assert_eq!(
            result,
            Err(Error::OutsideBase {
                base: PathBuf::from("/tmp/d"),
                path: PathBuf::from("/tmp/other/b.txt"),
            })
        );

        // Prefix match on the string is not enough, components must match.
        assert!(map(Path::new("/tmp/d"), "", Path::new("/tmp/dd/b.txt")).is_err());
    }

    #[test]
    fn test_map_base_itself() {
        assert_eq!(
            map(Path::new("/tmp/d"), "/site/", Path::new("/tmp/d")),
            Err(Error::EmptyRelativePath(PathBuf::from("/tmp/d")))
        );
    }

    #[test]
    fn test_map_rejects_parent_components() {
        assert!(map(Path::new("/tmp/d"), "", Path::new("/tmp/d/../etc/passwd")).is_err());
    }
}
