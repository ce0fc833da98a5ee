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

use std::path::Path;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::{BatchReport, Outcome, UploadResult};
use crate::iterator::{Skipped, UploadTask};

/// Receives the progress of a batch. Every method defaults to a no-op.
/// `upload_finished` is called from the upload workers.
pub trait Observer: Send + Sync {
    fn batch_started(&self, _id: &Uuid, _root: &Path, _discovered: usize) {}
    fn upload_dispatched(&self, _task: &UploadTask) {}
    fn upload_finished(&self, _result: &UploadResult) {}
    fn file_skipped(&self, _skipped: &Skipped) {}
    fn batch_finished(&self, _report: &BatchReport) {}
}

pub struct Silent;

impl Observer for Silent {}

/// Forwards the progress of a batch to the `log` facade.
pub struct LogObserver {
    name: String,
}

impl LogObserver {
    pub fn new(name: &str) -> LogObserver {
        LogObserver {
            name: String::from(name),
        }
    }
}

impl Observer for LogObserver {
    fn batch_started(&self, id: &Uuid, root: &Path, discovered: usize) {
        info!(
            "[{}] Batch {} started: {} files found in {}",
            self.name,
            id,
            discovered,
            root.display()
        );
    }

    fn upload_dispatched(&self, task: &UploadTask) {
        debug!(
            "[{}] Uploading {} as {} ({})",
            self.name,
            task.entry.absolute_path.display(),
            task.key,
            task.entry.content_type
        );
    }

    fn upload_finished(&self, result: &UploadResult) {
        match &result.error {
            None => info!(
                "[{}] Successfully uploaded file {} to {} ({} bytes)",
                self.name,
                result.path.display(),
                result.key,
                result.bytes
            ),
            Some(error) => error!(
                "[{}] Error during upload of file {} to {}. Error: {}",
                self.name,
                result.path.display(),
                result.key,
                error
            ),
        }
    }

    fn file_skipped(&self, skipped: &Skipped) {
        warn!(
            "[{}] Skipped file {}: {}",
            self.name,
            skipped.path.display(),
            skipped.error
        );
    }

    fn batch_finished(&self, report: &BatchReport) {
        let failed = report.failed().count();
        match &report.outcome {
            Outcome::Aborted(error) => error!(
                "[{}] Batch {} aborted after {} uploads: {}",
                self.name,
                report.id,
                report.results.len(),
                error
            ),
            _ if failed > 0 => warn!(
                "[{}] Batch {} {}: {} of {} files failed",
                self.name,
                report.id,
                report.outcome,
                failed,
                report.discovered
            ),
            _ => info!(
                "[{}] Batch {} {}: {} files uploaded",
                self.name,
                report.id,
                report.outcome,
                report.succeeded().count()
            ),
        }
    }
}
