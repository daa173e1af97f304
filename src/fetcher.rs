use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use winit::event_loop::EventLoopProxy;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::archive::{Document, Entry, Locator};
use crate::error::{Result, ViewerError};

/// Upper bound on the buffer reserved up front for one archive entry.
const MAX_SIZE_HINT: u64 = 64 << 20;

// ---------------------------------------------------------------------------
// Raw page bytes (before the surface decodes them)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PagePayload {
    pub ordinal: usize,
    pub bytes: Vec<u8>,
    pub extension: String,
    pub source_name: String,
}

impl PagePayload {
    pub fn mem_size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Read one page's bytes. Archives are reopened per call and only the
/// requested entry is inflated.
pub fn fetch_page(doc: &Document, entry: &Entry) -> Result<PagePayload> {
    let bytes = match entry.locator {
        Locator::WholeFile => {
            fs::read(&doc.path).map_err(|e| ViewerError::unavailable(&doc.path, &e))?
        }
        Locator::ZipIndex(index) => read_zip_entry(&doc.path, index, &entry.name)?,
    };

    Ok(PagePayload {
        ordinal: entry.ordinal,
        bytes,
        extension: entry.extension(),
        source_name: entry.name.clone(),
    })
}

fn read_zip_entry(path: &Path, index: usize, name: &str) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| ViewerError::unavailable(path, &e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| match e {
        ZipError::Io(io) => ViewerError::unavailable(path, &io),
        other => ViewerError::SourceUnavailable {
            path: path.to_path_buf(),
            detail: other.to_string(),
        },
    })?;

    let mut zf = match archive.by_index(index) {
        Ok(zf) => zf,
        Err(ZipError::FileNotFound) => {
            return Err(ViewerError::EntryMissing { name: name.to_owned() });
        }
        Err(e) => return Err(ViewerError::decode_failed(name, e)),
    };
    // The archive was rewritten under us.
    if zf.name() != name {
        return Err(ViewerError::EntryMissing { name: name.to_owned() });
    }

    // The declared size is only a hint; a corrupt header must not reserve gigabytes.
    let mut bytes = Vec::with_capacity(zf.size().min(MAX_SIZE_HINT) as usize);
    zf.read_to_end(&mut bytes)
        .map_err(|e| ViewerError::decode_failed(name, e))?;
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// User event for waking the UI from worker threads
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum UserEvent {
    PageFetched {
        generation: u64,
        ordinal: usize,
        result: Result<PagePayload>,
    },
}

/// The single dispatch point through which workers hand results back.
pub trait PageSink: Clone + Send + 'static {
    fn deliver(&self, event: UserEvent);
}

impl PageSink for EventLoopProxy<UserEvent> {
    fn deliver(&self, event: UserEvent) {
        if self.send_event(event).is_err() {
            log::debug!("Event loop closed, dropping fetched page");
        }
    }
}

impl PageSink for mpsc::Sender<UserEvent> {
    fn deliver(&self, event: UserEvent) {
        let _ = self.send(event);
    }
}

// ---------------------------------------------------------------------------
// Fetch queue (shared between the viewer and worker threads via Mutex + Condvar)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub generation: u64,
    pub ordinal: usize,
    pub document: Arc<Document>,
}

/// Where the viewer sends page requests.
pub trait PageRequester {
    fn request(&mut self, request: FetchRequest);

    /// Forget every queued request older than `generation`.
    fn retire(&mut self, generation: u64);
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<FetchRequest>,
    shutdown: bool,
}

#[derive(Default)]
pub struct FetchQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    active_generation: AtomicU64,
}

impl FetchQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, request: FetchRequest) {
        self.lock().jobs.push_back(request);
        self.ready.notify_one();
    }

    pub fn active_generation(&self) -> u64 {
        self.active_generation.load(Ordering::Acquire)
    }

    pub fn set_active_generation(&self, generation: u64) {
        self.active_generation.store(generation, Ordering::Release);
        let mut state = self.lock();
        let before = state.jobs.len();
        state.jobs.retain(|job| job.generation >= generation);
        let dropped = before - state.jobs.len();
        if dropped > 0 {
            log::debug!("Dropped {} queued fetches from older documents", dropped);
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.ready.notify_all();
    }

    /// Block until a job is available. `None` once the queue is shut down.
    fn next_job(&self) -> Option<FetchRequest> {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl PageRequester for Arc<FetchQueue> {
    fn request(&mut self, request: FetchRequest) {
        self.push(request);
    }

    fn retire(&mut self, generation: u64) {
        self.set_active_generation(generation);
    }
}

// ---------------------------------------------------------------------------
// Background fetch workers
// ---------------------------------------------------------------------------

pub fn spawn_fetch_workers<S: PageSink>(
    queue: Arc<FetchQueue>,
    sink: S,
    num_threads: usize,
) -> Vec<JoinHandle<()>> {
    (0..num_threads.max(1))
        .map(|_| {
            let queue = Arc::clone(&queue);
            let sink = sink.clone();
            thread::spawn(move || {
                while let Some(job) = queue.next_job() {
                    if job.generation != queue.active_generation() {
                        log::debug!(
                            "[fetch] skip page {} of retired generation {}",
                            job.ordinal,
                            job.generation
                        );
                        continue;
                    }

                    let result = match job.document.entry(job.ordinal) {
                        Some(entry) => fetch_page(&job.document, entry),
                        None => Err(ViewerError::EntryMissing {
                            name: format!("#{}", job.ordinal),
                        }),
                    };

                    sink.deliver(UserEvent::PageFetched {
                        generation: job.generation,
                        ordinal: job.ordinal,
                        result,
                    });
                }
            })
        })
        .collect()
}
