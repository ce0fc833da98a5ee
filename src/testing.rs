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

//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::watch;

use crate::iterator::Opener;
use crate::remotes::remote::{self, Body, ObjectStore, PutRequest};

/// A temporary folder populated with the given relative file names.
pub struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new(files: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("content of {}", file)).unwrap();
        }
        Fixture { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[derive(Default)]
struct Handles {
    closed: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
}

struct Counted {
    inner: tokio::fs::File,
    handles: Arc<Handles>,
}

impl AsyncRead for Counted {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.handles.live.fetch_sub(1, Ordering::SeqCst);
        self.handles.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opens real files and counts how many handles were opened and closed.
pub struct CountingOpener {
    opened: AtomicUsize,
    handles: Arc<Handles>,
    fail_on: Option<String>,
    cancel_on: Option<(String, watch::Sender<bool>)>,
}

impl CountingOpener {
    pub fn new() -> CountingOpener {
        CountingOpener {
            opened: AtomicUsize::new(0),
            handles: Arc::new(Handles::default()),
            fail_on: None,
            cancel_on: None,
        }
    }

    /// Sends the cancellation right after opening the file named `name`.
    pub fn cancelling_on(name: &str, cancel: watch::Sender<bool>) -> CountingOpener {
        CountingOpener {
            cancel_on: Some((String::from(name), cancel)),
            ..CountingOpener::new()
        }
    }

    /// Fails to open any file whose name is `name`.
    pub fn failing_on(name: &str) -> CountingOpener {
        CountingOpener {
            fail_on: Some(String::from(name)),
            ..CountingOpener::new()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.handles.closed.load(Ordering::SeqCst)
    }

    /// Largest number of handles open at the same time.
    pub fn peak_open(&self) -> usize {
        self.handles.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Opener for CountingOpener {
    async fn open(&self, path: &Path) -> io::Result<Body> {
        let name = path.file_name().and_then(|name| name.to_str());
        if name.is_some() && name == self.fail_on.as_deref() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "simulated open failure",
            ));
        }
        let inner = tokio::fs::File::open(path).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        let live = self.handles.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.handles.peak.fetch_max(live, Ordering::SeqCst);
        if let Some((cancel_name, cancel)) = &self.cancel_on {
            if name == Some(cancel_name.as_str()) {
                cancel.send_replace(true);
            }
        }
        Ok(Box::new(Counted {
            inner,
            handles: self.handles.clone(),
        }))
    }
}

/// Keeps every object in memory. Keys ending with one of `failing`
/// are rejected after the body has been read.
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
    pub attempts: Mutex<Vec<String>>,
    failing: Vec<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn failing_on(suffixes: &[&str]) -> MemoryStore {
        MemoryStore {
            failing: suffixes.iter().map(|s| String::from(*s)).collect(),
            ..MemoryStore::default()
        }
    }

    /// Every `put_object` sleeps for `delay` before storing the object.
    pub fn slow(delay: Duration) -> MemoryStore {
        MemoryStore {
            delay: Some(delay),
            ..MemoryStore::default()
        }
    }

    /// Largest number of `put_object` calls running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> String {
        String::from("memory")
    }

    async fn exists(&self, key: &str) -> Result<bool, remote::Error> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn get_object(&self, key: &str) -> Result<Body, remote::Error> {
        match self.objects.lock().unwrap().get(key) {
            Some((_, content)) => Ok(Box::new(std::io::Cursor::new(content.clone()))),
            None => Err(remote::Error::NotFound(String::from(key))),
        }
    }

    async fn put_object(
        &self,
        request: PutRequest<'_>,
        mut body: Body,
    ) -> Result<u64, remote::Error> {
        self.attempts.lock().unwrap().push(String::from(request.key));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut content = vec![];
        let read = body.read_to_end(&mut content).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        read?;
        if self.failing.iter().any(|suffix| request.key.ends_with(suffix.as_str())) {
            return Err(remote::Error::LocalError(io::Error::new(
                io::ErrorKind::Other,
                "simulated upload failure",
            )));
        }
        let written = content.len() as u64;
        self.objects.lock().unwrap().insert(
            String::from(request.key),
            (String::from(request.content_type), content),
        );
        Ok(written)
    }
}
