//! Background track loading
//!
//! One worker thread decodes tracks off the audio path and hands them to the
//! [`SyncBarrier`]. Requests go through a single pending slot rather than a
//! queue: a request made while a load is running is refused, and a newer
//! request replaces an older one that has not started yet. The control side
//! retries when it still wants the track.
//!
//! The worker can also *stage* a track: decode it ahead of time and keep it
//! until a matching load request arrives, which then skips the decode.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::controls::LoopRange;
use super::sync::SyncBarrier;
use crate::audio::{LoadError, Loader, Track};

/// Idle wake-up interval of the worker
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Load `path` and start it on the given bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub path: PathBuf,
    pub left: usize,
    /// `None` plays to the end of the track
    pub right: Option<usize>,
}

impl LoadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            left: 0,
            right: None,
        }
    }

    pub fn with_bounds(mut self, left: usize, right: Option<usize>) -> Self {
        self.left = left;
        self.right = right;
        self
    }
}

/// Worker reports for the control side
#[derive(Debug, Clone, PartialEq)]
pub enum PrefetchEvent {
    Loaded {
        path: PathBuf,
        generation: u64,
        frames: usize,
        channels: usize,
        sample_rate: u32,
        range: LoopRange,
    },
    Staged {
        path: PathBuf,
        frames: usize,
    },
    Failed {
        path: PathBuf,
        error: String,
    },
}

#[derive(Debug, Default)]
struct WorkerState {
    pending: Option<LoadRequest>,
    stage: Option<PathBuf>,
    in_flight: bool,
    shutdown: bool,
    target_rate: u32,
}

struct Shared {
    state: Mutex<WorkerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Job {
    Load(LoadRequest, u32),
    Stage(PathBuf, u32),
}

/// A decoded track held back until it is asked for
struct StagedTrack {
    path: PathBuf,
    rate: u32,
    track: Track,
}

pub struct Prefetcher {
    shared: Arc<Shared>,
    events: Receiver<PrefetchEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Prefetcher {
    /// Start the worker. Tracks are converted to `target_rate`.
    pub fn spawn<L: Loader>(loader: L, barrier: Arc<SyncBarrier>, target_rate: u32) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState {
                target_rate,
                ..WorkerState::default()
            }),
            wake: Condvar::new(),
        });
        let (tx, rx) = unbounded();

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("prefetch".to_string())
            .spawn(move || run_worker(loader, barrier, worker_shared, tx))
            .ok();
        if worker.is_none() {
            log::error!("Failed to spawn prefetch thread");
        }

        Self {
            shared,
            events: rx,
            worker,
        }
    }

    /// Ask for a track. Returns `false` when a load is already running.
    pub fn request_load(&self, request: LoadRequest) -> bool {
        let mut state = self.shared.lock();
        if state.in_flight {
            log::debug!("Load of {:?} refused, a load is in flight", request.path);
            return false;
        }
        if let Some(older) = state.pending.replace(request) {
            log::debug!("Pending load of {:?} replaced", older.path);
        }
        self.shared.wake.notify_one();
        true
    }

    /// Decode `path` ahead of time without making it live
    pub fn stage(&self, path: impl Into<PathBuf>) -> bool {
        let mut state = self.shared.lock();
        if state.in_flight {
            return false;
        }
        state.stage = Some(path.into());
        self.shared.wake.notify_one();
        true
    }

    pub fn is_busy(&self) -> bool {
        let state = self.shared.lock();
        state.in_flight || state.pending.is_some()
    }

    pub fn try_recv(&self) -> Option<PrefetchEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Prefetch thread panicked");
            }
        }
    }
}

fn run_worker<L: Loader>(
    loader: L,
    barrier: Arc<SyncBarrier>,
    shared: Arc<Shared>,
    events: Sender<PrefetchEvent>,
) {
    let mut staged: Option<StagedTrack> = None;

    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(request) = state.pending.take() {
                    state.in_flight = true;
                    break Job::Load(request, state.target_rate);
                }
                if let Some(path) = state.stage.take() {
                    state.in_flight = true;
                    break Job::Stage(path, state.target_rate);
                }
                state = shared
                    .wake
                    .wait_timeout(state, IDLE_WAIT)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        };

        let event = match job {
            Job::Load(request, rate) => {
                let track = match staged.take() {
                    Some(s) if s.path == request.path && s.rate == rate => {
                        log::debug!("Using staged {:?}", s.path);
                        Ok(s.track)
                    }
                    other => {
                        staged = other;
                        load_track(&loader, &request.path, rate)
                    }
                };
                Some(match track {
                    Ok(track) => hand_off(&barrier, request, track),
                    Err(e) => {
                        log::warn!("Failed to load {:?}: {}", request.path, e);
                        PrefetchEvent::Failed {
                            path: request.path,
                            error: e.to_string(),
                        }
                    }
                })
            }
            Job::Stage(path, rate) => {
                let already = staged
                    .as_ref()
                    .map(|s| s.path == path && s.rate == rate)
                    .unwrap_or(false);
                if already {
                    None
                } else {
                    match load_track(&loader, &path, rate) {
                        Ok(track) => {
                            let frames = track.frames();
                            staged = Some(StagedTrack {
                                path: path.clone(),
                                rate,
                                track,
                            });
                            Some(PrefetchEvent::Staged { path, frames })
                        }
                        Err(e) => {
                            log::warn!("Failed to stage {:?}: {}", path, e);
                            None
                        }
                    }
                }
            }
        };

        shared.lock().in_flight = false;
        if let Some(event) = event {
            // Receiver gone means the prefetcher is shutting down
            let _ = events.send(event);
        }
    }
}

fn load_track<L: Loader>(loader: &L, path: &Path, rate: u32) -> Result<Track, LoadError> {
    let decoded = loader.load(path, rate)?;
    Track::from_decoded(decoded)
}

fn hand_off(barrier: &SyncBarrier, request: LoadRequest, track: Track) -> PrefetchEvent {
    let frames = track.frames();
    let channels = track.channels();
    let sample_rate = track.sample_rate();
    let range = LoopRange::from_bounds(request.left, request.right, frames);

    match barrier.hand_off(track, range) {
        Ok((generation, replaced)) => {
            // The superseded track is freed here, off the audio thread
            drop(replaced);
            log::info!(
                "Loaded {:?}: {} frames, {} ch, {} Hz",
                request.path,
                frames,
                channels,
                sample_rate
            );
            PrefetchEvent::Loaded {
                path: request.path,
                generation,
                frames,
                channels,
                sample_rate,
                range,
            }
        }
        Err(e) => PrefetchEvent::Failed {
            path: request.path,
            error: e.to_string(),
        },
    }
}
