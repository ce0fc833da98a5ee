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

use crate::config::LocalhostConfig;
use crate::remotes::remote::{self, Body, PutRequest};

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use log::debug;

use tempfile::NamedTempFile;
use tokio::fs;

use std::fmt;

#[derive(Debug, PartialEq)]
pub enum Error {
    IsNotAbsolute(PathBuf),
    DoesNotExist(PathBuf),
    IsNotAFolder(PathBuf),
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IsNotAbsolute(path) => write!(f, "Path {} is not absolute", path.display()),
            Error::DoesNotExist(path) => write!(f, "Path {} does not exist", path.display()),
            Error::IsNotAFolder(path) => write!(f, "Path {} is not a folder", path.display()),
        }
    }
}

/// A local folder used as an object store: every key becomes a file below it.
#[derive(Clone)]
pub struct Localhost {
    name: String,
    path: PathBuf,
}

impl Localhost {
    pub fn new(config: LocalhostConfig, name: &str) -> Result<Localhost, Error> {
        let path = PathBuf::from(shellexpand::tilde(&config.path).as_ref());

        if path.is_relative() {
            return Err(Error::IsNotAbsolute(path));
        }
        if !path.exists() {
            return Err(Error::DoesNotExist(path));
        }
        if !path.is_dir() {
            return Err(Error::IsNotAFolder(path));
        }

        Ok(Localhost {
            name: String::from(name),
            path,
        })
    }

    fn destination(&self, key: &str) -> Result<PathBuf, remote::Error> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes || relative.as_os_str().is_empty() {
            return Err(remote::Error::InvalidKey(String::from(key)));
        }
        Ok(self.path.join(relative))
    }
}

#[async_trait]
impl remote::ObjectStore for Localhost {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn exists(&self, key: &str) -> Result<bool, remote::Error> {
        let dest = self.destination(key)?;
        Ok(fs::metadata(dest).await.map(|m| m.is_file()).unwrap_or(false))
    }

    async fn get_object(&self, key: &str) -> Result<Body, remote::Error> {
        let dest = self.destination(key)?;
        let is_file = fs::metadata(&dest).await.map(|m| m.is_file()).unwrap_or(false);
        if !is_file {
            return Err(remote::Error::NotFound(String::from(key)));
        }
        Ok(Box::new(fs::File::open(dest).await?))
    }

    async fn put_object(
        &self,
        request: PutRequest<'_>,
        mut body: Body,
    ) -> Result<u64, remote::Error> {
        let dest = self.destination(request.key)?;
        let parent = match dest.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Err(remote::Error::InvalidKey(String::from(request.key))),
        };
        fs::create_dir_all(&parent).await?;

        // Write next to the destination and rename, so that readers never see
        // a partially written object.
        let staging = NamedTempFile::new_in(&parent)?;
        let mut file = fs::File::from_std(staging.reopen()?);
        let written = tokio::io::copy(&mut body, &mut file).await?;
        file.sync_all().await?;
        drop(file);

        staging
            .persist(&dest)
            .map_err(|error| remote::Error::LocalError(error.error))?;
        debug!(
            "[{}] Stored {} ({}, {} bytes)",
            self.name,
            dest.display(),
            request.content_type,
            written
        );
        Ok(written)
    }
}
