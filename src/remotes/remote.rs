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

use async_trait::async_trait;

use std::fmt;
use std::string::String;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::remotes::aws::Error as AwsError;

/// An open, readable resource. Dropping it closes the underlying handle.
pub type Body = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug)]
pub enum Error {
    LocalError(std::io::Error),
    RemoteError(AwsError),
    InvalidKey(String),
    NotFound(String),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::LocalError(error)
    }
}

impl From<AwsError> for Error {
    fn from(error: AwsError) -> Self {
        Error::RemoteError(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LocalError(error) => write!(f, "Local (IO) error: {}", error),
            Error::RemoteError(error) => write!(f, "Remote error: {}", error),
            Error::InvalidKey(key) => write!(f, "Invalid object key: {}", key),
            Error::NotFound(key) => write!(f, "Object {} not found", key),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PutRequest<'a> {
    pub key: &'a str,
    pub content_type: &'a str,
    /// Advisory chunk size for stores that stream in parts.
    pub part_size_hint: usize,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `request.key`, replacing any existing object.
    /// Returns the number of bytes written. `body` is consumed, so it is
    /// closed on return whatever the outcome.
    async fn put_object(&self, request: PutRequest<'_>, body: Body) -> Result<u64, Error>;
    async fn exists(&self, key: &str) -> Result<bool, Error>;
    /// Opens the object `key` for reading. Fails with `NotFound` when the
    /// store has no such object.
    async fn get_object(&self, key: &str) -> Result<Body, Error>;

    fn name(&self) -> String;
}

/// Reads from `body` until `size` bytes are buffered or the body ends.
pub async fn read_chunk(body: &mut Body, size: usize) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::with_capacity(size);
    (&mut *body).take(size as u64).read_to_end(&mut buffer).await?;
    Ok(buffer)
}
