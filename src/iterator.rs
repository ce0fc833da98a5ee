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

//! A single-producer cursor over the files of a walk. Each step pairs one
//! file with an open resource and annotates it with its object key and
//! content type. At most one resource is held at any time.
//!
//! ```text
//!            advance (open ok)
//!   Ready ---------------------> Holding
//!     ^  \                          |
//!     |   \ advance (open failed,   | release / detach
//!     |    \  abort policy)         |
//!     |     v                       v
//!     |   Errored          queue empty? -- yes --> Exhausted
//!     |                             |
//!     +------------- no ------------+
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use crate::remotes::remote::Body;
use crate::services::walker::Walk;
use crate::services::{content_type, object_key};

#[derive(Debug)]
pub enum Error {
    Open { path: PathBuf, source: io::Error },
    Mapping(object_key::Error),
}

impl From<object_key::Error> for Error {
    fn from(error: object_key::Error) -> Self {
        Error::Mapping(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Open { path, source } => {
                write!(f, "Unable to open {}: {}", path.display(), source)
            }
            Error::Mapping(error) => write!(f, "Unable to derive the object key: {}", error),
        }
    }
}

/// What to do when a discovered file cannot be opened.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OpenErrorPolicy {
    /// Stop iterating: the batch is aborted.
    #[default]
    Abort,
    /// Record the file as skipped and move on to the next one.
    Skip,
}

#[async_trait]
pub trait Opener: Send + Sync {
    async fn open(&self, path: &Path) -> io::Result<Body>;
}

/// Opens files from the local filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsOpener;

#[async_trait]
impl Opener for FsOpener {
    async fn open(&self, path: &Path) -> io::Result<Body> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub absolute_path: PathBuf,
    pub relative_path: PathBuf,
    pub content_type: &'static str,
}

pub struct UploadTask {
    pub entry: FileEntry,
    pub key: String,
    pub body: Body,
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("entry", &self.entry)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A file that could not be opened and was left out of the batch.
#[derive(Debug)]
pub struct Skipped {
    pub key: String,
    pub path: PathBuf,
    pub error: io::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Holding,
    Exhausted,
    Errored,
}

enum Cursor {
    Ready,
    Holding(UploadTask),
    Exhausted,
    Errored(Option<Error>),
}

pub struct UploadIterator {
    root: PathBuf,
    prefix: String,
    queue: VecDeque<PathBuf>,
    opener: Arc<dyn Opener>,
    policy: OpenErrorPolicy,
    cursor: Cursor,
    skipped: Vec<Skipped>,
}

impl UploadIterator {
    pub fn new(
        walk: Walk,
        prefix: &str,
        opener: Arc<dyn Opener>,
        policy: OpenErrorPolicy,
    ) -> UploadIterator {
        let queue = VecDeque::from(walk.files);
        let cursor = if queue.is_empty() {
            Cursor::Exhausted
        } else {
            Cursor::Ready
        };
        UploadIterator {
            root: walk.root,
            prefix: String::from(prefix),
            queue,
            opener,
            policy,
            cursor,
            skipped: vec![],
        }
    }

    pub fn state(&self) -> State {
        match self.cursor {
            Cursor::Ready => State::Ready,
            Cursor::Holding(_) => State::Holding,
            Cursor::Exhausted => State::Exhausted,
            Cursor::Errored(_) => State::Errored,
        }
    }

    /// Files not yet yielded.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    fn annotate(&self, path: PathBuf) -> Result<(FileEntry, String), Error> {
        let key = object_key::map(&self.root, &self.prefix, &path)?;
        let relative_path = object_key::relative_path(&self.root, &path)?;
        let content_type = content_type::classify(&path);
        Ok((
            FileEntry {
                absolute_path: path,
                relative_path,
                content_type,
            },
            key,
        ))
    }

    /// Moves to the next file that can be opened. Returns false once the
    /// iterator is Exhausted or Errored; both states are terminal.
    pub async fn advance(&mut self) -> bool {
        match self.state() {
            State::Ready => {}
            State::Exhausted | State::Errored => return false,
            State::Holding => {
                warn!("advance() called while holding a resource, releasing it first");
                self.release();
                if self.state() != State::Ready {
                    return false;
                }
            }
        }

        while let Some(path) = self.queue.pop_front() {
            let (entry, key) = match self.annotate(path) {
                Ok(annotated) => annotated,
                Err(error) => {
                    self.cursor = Cursor::Errored(Some(error));
                    return false;
                }
            };

            match self.opener.open(&entry.absolute_path).await {
                Ok(body) => {
                    debug!("Opened {} as {}", entry.absolute_path.display(), key);
                    self.cursor = Cursor::Holding(UploadTask { entry, key, body });
                    return true;
                }
                Err(source) => match self.policy {
                    OpenErrorPolicy::Abort => {
                        self.cursor = Cursor::Errored(Some(Error::Open {
                            path: entry.absolute_path,
                            source,
                        }));
                        return false;
                    }
                    OpenErrorPolicy::Skip => {
                        warn!(
                            "Skipping {}: {}",
                            entry.absolute_path.display(),
                            source
                        );
                        self.skipped.push(Skipped {
                            key,
                            path: entry.absolute_path,
                            error: source,
                        });
                    }
                },
            }
        }

        self.cursor = Cursor::Exhausted;
        false
    }

    /// The task opened by the last successful `advance`, while Holding.
    pub fn current(&self) -> Option<&UploadTask> {
        match &self.cursor {
            Cursor::Holding(task) => Some(task),
            _ => None,
        }
    }

    fn leave_holding(&mut self) -> Option<UploadTask> {
        let next = if self.queue.is_empty() {
            Cursor::Exhausted
        } else {
            Cursor::Ready
        };
        match std::mem::replace(&mut self.cursor, next) {
            Cursor::Holding(task) => Some(task),
            other => {
                self.cursor = other;
                None
            }
        }
    }

    /// Closes the held resource and moves to Ready or Exhausted.
    /// Does nothing outside of Holding.
    pub fn release(&mut self) {
        if let Some(task) = self.leave_holding() {
            debug!("Releasing {}", task.key);
            drop(task);
        }
    }

    /// Same transition as `release`, but hands the open resource over to
    /// the caller instead of closing it. The resource is closed when the
    /// returned task is dropped.
    pub fn detach(&mut self) -> Option<UploadTask> {
        self.leave_holding()
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.cursor {
            Cursor::Errored(error) => error.as_ref(),
            _ => None,
        }
    }

    /// Takes the terminal error out. The iterator stays Errored.
    pub fn take_error(&mut self) -> Option<Error> {
        match &mut self.cursor {
            Cursor::Errored(error) => error.take(),
            _ => None,
        }
    }

    pub fn take_skipped(&mut self) -> Vec<Skipped> {
        std::mem::take(&mut self.skipped)
    }

    /// Releases any held resource and drops the files not yet yielded.
    pub fn close(&mut self) {
        self.release();
        if !self.queue.is_empty() {
            debug!("Closing iterator with {} files left", self.queue.len());
            self.queue.clear();
        }
        if let Cursor::Ready = self.cursor {
            self.cursor = Cursor::Exhausted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::walker;
    use crate::testing::{CountingOpener, Fixture};

    fn iterator(fixture: &Fixture, opener: Arc<CountingOpener>, policy: OpenErrorPolicy) -> UploadIterator {
        let walk = walker::walk_blocking(fixture.root()).unwrap();
        UploadIterator::new(walk, "/site/", opener, policy)
    }

    #[tokio::test]
    async fn test_yields_every_file_once() {
        let fixture = Fixture::new(&["a.png", "b/c.json", "b/d/e.txt"]);
        let opener = Arc::new(CountingOpener::new());
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Abort);

        assert_eq!(iter.state(), State::Ready);
        let mut keys = vec![];
        while iter.advance().await {
            assert_eq!(iter.state(), State::Holding);
            let task = iter.current().unwrap();
            keys.push((task.key.clone(), task.entry.content_type));
            iter.release();
        }

        assert_eq!(iter.state(), State::Exhausted);
        assert_eq!(
            keys,
            vec![
                (String::from("/site/a.png"), "image/png"),
                (String::from("/site/b/c.json"), "application/json"),
                (String::from("/site/b/d/e.txt"), "text/plain"),
            ]
        );
        assert_eq!(opener.opened(), 3);
        assert_eq!(opener.closed(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_is_terminal() {
        let fixture = Fixture::new(&["only.txt"]);
        let opener = Arc::new(CountingOpener::new());
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Abort);

        assert!(iter.advance().await);
        iter.release();
        assert_eq!(iter.state(), State::Exhausted);
        assert!(!iter.advance().await);
        assert!(!iter.advance().await);
        assert_eq!(iter.state(), State::Exhausted);
        assert!(iter.current().is_none());
        assert!(iter.error().is_none());
    }

    #[tokio::test]
    async fn test_empty_walk_starts_exhausted() {
        let fixture = Fixture::new(&[]);
        let opener = Arc::new(CountingOpener::new());
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Abort);
        assert_eq!(iter.state(), State::Exhausted);
        assert!(!iter.advance().await);
        assert_eq!(opener.opened(), 0);
    }

    #[tokio::test]
    async fn test_open_error_aborts() {
        let fixture = Fixture::new(&["1.txt", "2.txt", "3.txt"]);
        let opener = Arc::new(CountingOpener::failing_on("2.txt"));
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Abort);

        assert!(iter.advance().await);
        iter.release();
        assert!(!iter.advance().await);
        assert_eq!(iter.state(), State::Errored);
        assert!(matches!(iter.error(), Some(Error::Open { path, .. }) if path.ends_with("2.txt")));

        // Errored is terminal, 3.txt is never opened.
        assert!(!iter.advance().await);
        assert_eq!(iter.remaining(), 1);
        assert_eq!(opener.opened(), 1);
        assert_eq!(opener.closed(), 1);

        assert!(iter.take_error().is_some());
        assert_eq!(iter.state(), State::Errored);
    }

    #[tokio::test]
    async fn test_open_error_skips() {
        let fixture = Fixture::new(&["1.txt", "2.txt", "3.txt"]);
        let opener = Arc::new(CountingOpener::failing_on("2.txt"));
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Skip);

        let mut keys = vec![];
        while iter.advance().await {
            keys.push(iter.current().unwrap().key.clone());
            iter.release();
        }

        assert_eq!(iter.state(), State::Exhausted);
        assert_eq!(keys, vec!["/site/1.txt", "/site/3.txt"]);
        let skipped = iter.take_skipped();
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].key, "/site/2.txt");
        assert_eq!(opener.opened(), opener.closed());
    }

    #[tokio::test]
    async fn test_detach_hands_over_resource() {
        let fixture = Fixture::new(&["1.txt", "2.txt"]);
        let opener = Arc::new(CountingOpener::new());
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Abort);

        assert!(iter.advance().await);
        let task = iter.detach().unwrap();
        assert_eq!(iter.state(), State::Ready);
        assert!(iter.detach().is_none());
        assert_eq!(opener.closed(), 0);

        drop(task);
        assert_eq!(opener.closed(), 1);
    }

    #[tokio::test]
    async fn test_advance_while_holding_releases_first() {
        let fixture = Fixture::new(&["1.txt", "2.txt"]);
        let opener = Arc::new(CountingOpener::new());
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Abort);

        assert!(iter.advance().await);
        assert!(iter.advance().await);
        assert_eq!(iter.current().unwrap().key, "/site/2.txt");
        assert_eq!(opener.closed(), 1);
        iter.release();
        iter.release();
        assert_eq!(opener.closed(), 2);
    }

    #[tokio::test]
    async fn test_close_releases_held_resource() {
        let fixture = Fixture::new(&["1.txt", "2.txt", "3.txt"]);
        let opener = Arc::new(CountingOpener::new());
        let mut iter = iterator(&fixture, opener.clone(), OpenErrorPolicy::Abort);

        assert!(iter.advance().await);
        iter.close();
        assert_eq!(iter.state(), State::Exhausted);
        assert_eq!(iter.remaining(), 0);
        assert_eq!(opener.opened(), 1);
        assert_eq!(opener.closed(), 1);
    }
}
