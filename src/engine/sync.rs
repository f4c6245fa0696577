//! Track handoff between the loader and the audio callback
//!
//! Two track slots, an atomic index naming the live one, and a `ready` flag.
//! The audio callback only ever `try_lock`s the live slot and posts a
//! "block complete" tick after every block. The loader fills the other slot,
//! rendezvous with a block boundary, flips the index, and later takes the
//! superseded track back out so it is freed off the audio thread.
//!
//! Every wait on the loader side is bounded, so a stalled audio server can
//! delay a swap but never deadlock it.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use thiserror::Error;

use super::controls::LoopRange;
use crate::audio::Track;

/// Default bound on each rendezvous wait
pub const DEFAULT_HANDOFF_TIMEOUT: Duration = Duration::from_millis(60);

/// Rendezvous attempts before giving up on a busy slot
const SLOT_ATTEMPTS: usize = 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("Track slot stayed busy; handoff abandoned")]
    SlotBusy,
}

/// A track in a slot, with the range it starts on
#[derive(Debug)]
pub struct LoadedTrack {
    pub track: Track,
    pub range: LoopRange,
    pub generation: u64,
}

pub type SlotGuard<'a> = MutexGuard<'a, Option<LoadedTrack>>;

pub struct SyncBarrier {
    slots: [Mutex<Option<LoadedTrack>>; 2],
    active: AtomicUsize,
    ready: AtomicBool,
    /// Blocks completed by the audio callback
    blocks: AtomicU64,
    lock: Mutex<()>,
    signal: Condvar,
    next_generation: AtomicU64,
    timeout: Duration,
}

impl SyncBarrier {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HANDOFF_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            slots: [Mutex::new(None), Mutex::new(None)],
            active: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            blocks: AtomicU64::new(0),
            lock: Mutex::new(()),
            signal: Condvar::new(),
            next_generation: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // Audio thread

    /// Non-blocking access to the live slot. `None` while a swap is in
    /// flight or the slot is momentarily held by the loader.
    pub fn acquire(&self) -> Option<SlotGuard<'_>> {
        if !self.ready.load(Ordering::Acquire) {
            return None;
        }
        let index = self.active.load(Ordering::Acquire);
        match self.slots[index].try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Post the end-of-block tick. Never waits.
    #[inline]
    pub fn block_complete(&self) {
        self.blocks.fetch_add(1, Ordering::Release);
        self.signal.notify_all();
    }

    // Loader thread

    /// Wait up to `timeout` for the next block-complete tick.
    ///
    /// The callback notifies without taking `lock`, so a tick can slip in
    /// between the check and the wait; the timeout covers that case.
    pub fn wait_for_block(&self, timeout: Duration) -> bool {
        let seen = self.blocks.load(Ordering::Acquire);
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (_guard, result) = self
            .signal
            .wait_timeout_while(guard, timeout, |_| {
                self.blocks.load(Ordering::Acquire) == seen
            })
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Make `track` the live track.
    ///
    /// Returns the new generation and the track it replaced, which the
    /// caller drops on its own thread. On error the live track is untouched.
    pub fn hand_off(
        &self,
        track: Track,
        range: LoopRange,
    ) -> Result<(u64, Option<LoadedTrack>), SyncError> {
        let live = self.active.load(Ordering::Acquire);
        let spare = 1 - live;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        let leftover = {
            let mut slot = self.lock_slot(spare)?;
            slot.replace(LoadedTrack {
                track,
                range,
                generation,
            })
        };

        self.wait_for_block(self.timeout);
        self.ready.store(false, Ordering::Release);
        self.active.store(spare, Ordering::Release);
        self.ready.store(true, Ordering::Release);
        log::debug!("Track generation {} is live in slot {}", generation, spare);

        // Let the callback finish any block that started on the old slot
        self.wait_for_block(self.timeout);
        let replaced = match self.lock_slot(live) {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                log::debug!("Old slot busy, it will be cleared on the next handoff");
                None
            }
        };

        Ok((generation, replaced.or(leftover)))
    }

    /// Drop both tracks and go silent
    pub fn clear(&self) {
        self.ready.store(false, Ordering::Release);
        self.wait_for_block(self.timeout);
        for index in 0..2 {
            if let Ok(mut slot) = self.lock_slot(index) {
                slot.take();
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Lock a slot from the loader side, backing off to block boundaries
    /// while the callback holds it.
    fn lock_slot(&self, index: usize) -> Result<SlotGuard<'_>, SyncError> {
        for _ in 0..SLOT_ATTEMPTS {
            match self.slots[index].try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    self.wait_for_block(self.timeout);
                }
            }
        }
        Err(SyncError::SlotBusy)
    }
}

impl Default for SyncBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn filled(value: f32, frames: usize) -> Track {
        Track::from_channels(vec![vec![value; frames], vec![value; frames]], 48000).unwrap()
    }

    fn quick() -> SyncBarrier {
        SyncBarrier::with_timeout(Duration::from_millis(5))
    }

    #[test]
    fn test_not_ready_until_first_handoff() {
        let barrier = quick();
        assert!(!barrier.is_ready());
        assert!(barrier.acquire().is_none());

        let (generation, replaced) = barrier.hand_off(filled(0.5, 10), LoopRange::full(10)).unwrap();
        assert_eq!(generation, 1);
        assert!(replaced.is_none());
        assert!(barrier.is_ready());

        let guard = barrier.acquire().unwrap();
        let loaded = guard.as_ref().unwrap();
        assert_eq!(loaded.generation, 1);
        assert_eq!(loaded.track.frame(3), [0.5, 0.5]);
    }

    #[test]
    fn test_second_handoff_returns_previous() {
        let barrier = quick();
        barrier.hand_off(filled(1.0, 10), LoopRange::full(10)).unwrap();
        let (generation, replaced) = barrier.hand_off(filled(2.0, 20), LoopRange::full(20)).unwrap();

        assert_eq!(generation, 2);
        let replaced = replaced.unwrap();
        assert_eq!(replaced.generation, 1);
        assert_eq!(replaced.track.frames(), 10);
        assert_eq!(barrier.acquire().unwrap().as_ref().unwrap().generation, 2);
    }

    #[test]
    fn test_acquire_fails_while_slot_held() {
        let barrier = quick();
        barrier.hand_off(filled(1.0, 10), LoopRange::full(10)).unwrap();
        let held = barrier.acquire().unwrap();
        assert!(barrier.acquire().is_none());
        drop(held);
        assert!(barrier.acquire().is_some());
    }

    #[test]
    fn test_wait_times_out_without_callback() {
        let barrier = quick();
        let start = Instant::now();
        assert!(!barrier.wait_for_block(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_clear_goes_silent() {
        let barrier = quick();
        barrier.hand_off(filled(1.0, 10), LoopRange::full(10)).unwrap();
        barrier.clear();
        assert!(!barrier.is_ready());
        assert!(barrier.acquire().is_none());
    }

    #[test]
    fn test_stress_swaps_are_never_torn() {
        let barrier = Arc::new(SyncBarrier::new());
        let stop = Arc::new(AtomicBool::new(false));

        let audio = {
            let barrier = Arc::clone(&barrier);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observed = 0;
                let mut slowest = Duration::ZERO;
                while !stop.load(Ordering::Relaxed) {
                    let start = Instant::now();
                    if let Some(guard) = barrier.acquire() {
                        if let Some(loaded) = guard.as_ref() {
                            // Every track is filled with its own length
                            let expected = loaded.track.frames() as f32;
                            for i in 0..loaded.track.frames() {
                                assert_eq!(loaded.track.frame(i), [expected, expected]);
                            }
                            assert!(loaded.range.right <= loaded.track.frames());
                            observed += 1;
                        }
                    }
                    slowest = slowest.max(start.elapsed());
                    barrier.block_complete();
                    thread::sleep(Duration::from_micros(500));
                }
                (observed, slowest)
            })
        };

        for i in 0..40 {
            let frames = 100 + i * 7;
            let (_, replaced) = barrier
                .hand_off(filled(frames as f32, frames), LoopRange::full(frames))
                .unwrap();
            drop(replaced);
        }

        stop.store(true, Ordering::Relaxed);
        let (observed, slowest) = audio.join().unwrap();
        assert!(observed > 0);
        // Reading a few hundred frames never waits on the loader
        assert!(slowest < Duration::from_millis(50));
    }
}
