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

use crate::iterator::{
    self, FsOpener, OpenErrorPolicy, Opener, Skipped, State, UploadIterator, UploadTask,
};
use crate::observer::{Observer, Silent};
use crate::remotes::remote::{ObjectStore, PutRequest};
use crate::services::walker;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{error, warn};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

#[derive(Debug)]
pub enum Error {
    Walk(walker::Error),
    InvalidConfig(String),
}

impl From<walker::Error> for Error {
    fn from(error: walker::Error) -> Self {
        Error::Walk(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Walk(error) => write!(f, "Batch could not run: {}", error),
            Error::InvalidConfig(msg) => write!(f, "Batch could not run: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub base_dir: PathBuf,
    pub destination_prefix: String,
    pub concurrency: usize,
    pub stop_on_first_error: bool,
    pub part_size_hint_bytes: usize,
    pub on_open_error: OpenErrorPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub key: String,
    pub path: PathBuf,
    pub content_type: &'static str,
    pub bytes: u64,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// Every discovered file went through the iterator.
    Completed,
    /// An upload failed and `stop_on_first_error` is set.
    StoppedEarly,
    Cancelled,
    /// A file could not be opened or mapped; the remaining ones were not attempted.
    Aborted(iterator::Error),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::StoppedEarly => write!(f, "stopped after the first failed upload"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::Aborted(error) => write!(f, "aborted: {}", error),
        }
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub id: Uuid,
    pub store: String,
    pub root: PathBuf,
    pub discovered: usize,
    /// In completion order.
    pub results: Vec<UploadResult>,
    pub skipped: Vec<Skipped>,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &UploadResult> {
        self.results.iter().filter(|result| result.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &UploadResult> {
        self.results.iter().filter(|result| !result.is_success())
    }

    pub fn not_attempted(&self) -> usize {
        self.discovered
            .saturating_sub(self.results.len() + self.skipped.len())
    }

    pub fn bytes(&self) -> u64 {
        self.succeeded().map(|result| result.bytes).sum()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Completed)
            && self.skipped.is_empty()
            && self.failed().next().is_none()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Batch {} [{}] {}: {}",
            self.id,
            self.store,
            self.root.display(),
            self.outcome
        )?;
        write!(
            f,
            "  {} of {} files uploaded ({} bytes in {}s), {} failed, {} skipped, {} not attempted",
            self.succeeded().count(),
            self.discovered,
            self.bytes(),
            (self.finished_at - self.started_at).num_seconds(),
            self.failed().count(),
            self.skipped.len(),
            self.not_attempted()
        )?;
        for result in self.failed() {
            write!(
                f,
                "\n  FAILED {}: {}",
                result.key,
                result.error.as_deref().unwrap_or_default()
            )?;
        }
        for skipped in &self.skipped {
            write!(f, "\n  SKIPPED {}: {}", skipped.key, skipped.error)?;
        }
        Ok(())
    }
}

/// Uploads every regular file below `config.base_dir` to a store.
pub struct Batch {
    store: Arc<dyn ObjectStore>,
    opener: Arc<dyn Opener>,
    observer: Arc<dyn Observer>,
    config: BatchConfig,
}

/// Resolves once `cancel` holds `true`. Never resolves if the sender is
/// dropped without cancelling.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

async fn upload(
    store: &dyn ObjectStore,
    task: UploadTask,
    part_size_hint: usize,
) -> UploadResult {
    let started = Instant::now();
    let UploadTask { entry, key, body } = task;
    let request = PutRequest {
        key: &key,
        content_type: entry.content_type,
        part_size_hint,
    };
    let (bytes, error) = match store.put_object(request, body).await {
        Ok(bytes) => (bytes, None),
        Err(error) => (0, Some(error.to_string())),
    };
    UploadResult {
        key,
        path: entry.absolute_path,
        content_type: entry.content_type,
        bytes,
        error,
        elapsed: started.elapsed(),
    }
}

fn collect(joined: Result<UploadResult, JoinError>, results: &mut Vec<UploadResult>) {
    match joined {
        Ok(result) => results.push(result),
        Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
        Err(error) => error!("Upload task lost: {}", error),
    }
}

impl Batch {
    pub fn new(store: Arc<dyn ObjectStore>, config: BatchConfig) -> Batch {
        Batch {
            store,
            opener: Arc::new(FsOpener),
            observer: Arc::new(Silent),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Batch {
        self.observer = observer;
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn Opener>) -> Batch {
        self.opener = opener;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Walks the base directory and uploads every file found, up to
    /// `concurrency` at a time. Files are opened one at a time, on this task;
    /// only the uploads run on the workers.
    ///
    /// Returns `Err` when the batch could not start. Otherwise the report
    /// holds one result per attempted file and how the batch ended.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<BatchReport, Error> {
        if self.config.concurrency < 1 {
            return Err(Error::InvalidConfig(String::from(
                "concurrency must be at least 1",
            )));
        }

        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let walk = walker::walk(&self.config.base_dir).await?;
        let root = walk.root.clone();
        let discovered = walk.files.len();
        self.observer.batch_started(&id, &root, discovered);

        let iter = UploadIterator::new(
            walk,
            &self.config.destination_prefix,
            self.opener.clone(),
            self.config.on_open_error,
        );
        // Whatever way we leave this function, the iterator must not keep a file open.
        let mut iter = scopeguard::guard(iter, |mut iter| iter.close());

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let stop = Arc::new(AtomicBool::new(false));
        let mut in_flight = JoinSet::new();
        let mut results = Vec::with_capacity(discovered);
        let mut skipped = vec![];

        let outcome = loop {
            while let Some(joined) = in_flight.try_join_next() {
                collect(joined, &mut results);
            }

            // The permit is taken before opening, so that at most `concurrency`
            // files are open at once.
            let permit = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let permit = match permit {
                Some(permit) => permit,
                None => break Outcome::Cancelled,
            };
            if stop.load(Ordering::SeqCst) && iter.state() == State::Ready {
                break Outcome::StoppedEarly;
            }

            let advanced = iter.advance().await;
            for file in iter.take_skipped() {
                self.observer.file_skipped(&file);
                skipped.push(file);
            }
            if !advanced {
                match iter.take_error() {
                    Some(error) => break Outcome::Aborted(error),
                    None => break Outcome::Completed,
                }
            }
            if *cancel.borrow() {
                break Outcome::Cancelled;
            }

            let task = match iter.detach() {
                Some(task) => task,
                None => break Outcome::Completed,
            };
            self.observer.upload_dispatched(&task);

            let store = self.store.clone();
            let observer = self.observer.clone();
            let stop = stop.clone();
            let stop_on_first_error = self.config.stop_on_first_error;
            let part_size_hint = self.config.part_size_hint_bytes;
            in_flight.spawn(async move {
                let _permit = permit;
                let result = upload(store.as_ref(), task, part_size_hint).await;
                if !result.is_success() && stop_on_first_error {
                    stop.store(true, Ordering::SeqCst);
                }
                observer.upload_finished(&result);
                result
            });
        };

        iter.close();
        if let Outcome::Cancelled = outcome {
            warn!("Batch {} cancelled, waiting for {} uploads", id, in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            collect(joined, &mut results);
        }

        let report = BatchReport {
            id,
            store: self.store.name(),
            root,
            discovered,
            results,
            skipped,
            outcome,
            started_at,
            finished_at: Utc::now(),
        };
        self.observer.batch_finished(&report);
        Ok(report)
    }

    /// Keys of the successful uploads of `report` that the store does not
    /// know about.
    pub async fn verify(&self, report: &BatchReport) -> Vec<String> {
        let store = self.store.as_ref();
        let checks = stream::iter(report.succeeded().map(|result| result.key.clone()))
            .map(|key| async move {
                match store.exists(&key).await {
                    Ok(true) => None,
                    Ok(false) => Some(key),
                    Err(error) => {
                        error!("Unable to verify {}: {}", key, error);
                        Some(key)
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<Option<String>>>()
            .await;

        let mut missing: Vec<String> = checks.into_iter().flatten().collect();
        missing.sort();
        missing
    }
}
