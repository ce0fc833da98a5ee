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

//! Single object transfers, outside of a batch.

use crate::remotes::remote::{self, Body, ObjectStore, PutRequest};
use crate::services::content_type;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;
use tokio::fs;

#[derive(Debug)]
pub enum Error {
    NotAFile(PathBuf),
    Open(PathBuf, io::Error),
    Local(io::Error),
    Store(remote::Error),
}

impl From<remote::Error> for Error {
    fn from(error: remote::Error) -> Self {
        Error::Store(error)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Local(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotAFile(path) => write!(f, "{} is not a file", path.display()),
            Error::Open(path, error) => write!(f, "Unable to open {}: {}", path.display(), error),
            Error::Local(error) => write!(f, "Local (IO) error: {}", error),
            Error::Store(error) => write!(f, "{}", error),
        }
    }
}

/// Uploads the regular file `path` as `key`, with the content type of its
/// name. Returns the number of bytes written.
pub async fn upload_file(
    store: &dyn ObjectStore,
    path: &Path,
    key: &str,
    part_size_hint: usize,
) -> Result<u64, Error> {
    let is_file = fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(Error::NotAFile(PathBuf::from(path)));
    }

    let file = fs::File::open(path)
        .await
        .map_err(|error| Error::Open(PathBuf::from(path), error))?;
    let body: Body = Box::new(file);
    let request = PutRequest {
        key,
        content_type: content_type::classify(path),
        part_size_hint,
    };
    let written = store.put_object(request, body).await?;
    debug!(
        "[{}] Uploaded {} to {} ({} bytes)",
        store.name(),
        path.display(),
        key,
        written
    );
    Ok(written)
}

/// Saves the object `key` into `dest`, replacing it if present. `dest` is
/// only replaced once the whole object has been received.
pub async fn download(store: &dyn ObjectStore, key: &str, dest: &Path) -> Result<u64, Error> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut body = store.get_object(key).await?;
    fs::create_dir_all(&parent).await?;

    let staging = NamedTempFile::new_in(&parent)?;
    let mut file = fs::File::from_std(staging.reopen()?);
    let written = tokio::io::copy(&mut body, &mut file).await?;
    file.sync_all().await?;
    drop(file);

    staging.persist(dest).map_err(|error| Error::Local(error.error))?;
    debug!(
        "[{}] Downloaded {} to {} ({} bytes)",
        store.name(),
        key,
        dest.display(),
        written
    );
    Ok(written)
}
